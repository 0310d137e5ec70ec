//! The two well-known library members the interpreter simulates instead
//! of loading: `java/lang/Object.<init>` and
//! `java/io/PrintStream.println`. The constant pool flags them with the
//! sentinels below so the dispatch loop never needs the class names.
use crate::value::Value;

/// Sentinel for methods of `java/lang/Object`; `<init>` is a no-op that
/// only discards its receiver.
pub const JAVA_LANG_OBJECT: i32 = -1;

/// Sentinel for methods of `java/io/PrintStream`.
pub const JAVA_IO_PRINT_STREAM: i32 = -2;

/// True for the `println` overloads, the only PrintStream members that
/// execute.
pub fn is_println(name_and_type: &str) -> bool {
    name_and_type.starts_with("println")
}

/// Renders a value the way `PrintStream.println` would: integers in base
/// 10, floats and doubles with a decimal point, strings verbatim, object
/// references as their class name.
pub fn render(value: &Value) -> String {
    match value {
        Value::Byte(v) => v.to_string(),
        Value::Short(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::Char(v) => char::from_u32(u32::from(*v))
            .unwrap_or(char::REPLACEMENT_CHARACTER)
            .to_string(),
        Value::Float(v) => render_float(f64::from(*v)),
        Value::Double(v) => render_float(*v),
        Value::Str(v) => v.clone(),
        Value::Null => "null".to_string(),
        Value::Object(obj) => obj.borrow().class_name.clone(),
        Value::Array(arr) => format!("[{}", arr.elem.descriptor()),
    }
}

// Java's default rendering always keeps a decimal point: 1.0, not 1.
fn render_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}
