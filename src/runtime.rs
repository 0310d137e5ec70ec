//! The stack-machine interpreter: a fetch-decode-execute loop over the
//! raw bytecode of one method at a time, with a frame pushed per
//! invocation and popped on return.
use log::trace;

use std::collections::HashMap;
use std::fmt;

use crate::bridge;
use crate::bytecode::OPCode;
use crate::frame::Frame;
use crate::pool::PoolError;
use crate::program::{parse_method_descriptor, JType, Program};
use crate::value::{TypeTag, Value, ValueError};

/// Everything that can abort a run. `Exception` carries the Java-named
/// runtime failures; the remaining kinds are verification-level defects
/// that a conforming class file never triggers.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    Exception(ValueError),
    EmptyStack(OPCode),
    InvalidOperand { op: OPCode, expected: &'static str },
    BadLocal { op: OPCode, index: usize },
    UnknownMethod(u16),
    UnsupportedOpcode(OPCode),
    TruncatedCode { at: usize },
    BadDescriptor(String),
    Unwound(String),
    NoActiveFrame,
    Pool(PoolError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    kind: RuntimeErrorKind,
}

impl RuntimeError {
    fn new(kind: RuntimeErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &RuntimeErrorKind {
        &self.kind
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            RuntimeErrorKind::Exception(e) => write!(f, "{e}"),
            RuntimeErrorKind::EmptyStack(op) => {
                write!(f, "operand stack is empty for {op}")
            }
            RuntimeErrorKind::InvalidOperand { op, expected } => {
                write!(f, "invalid operand for {op}, expected {expected}")
            }
            RuntimeErrorKind::BadLocal { op, index } => {
                write!(f, "local variable {index} is out of range for {op}")
            }
            RuntimeErrorKind::UnknownMethod(index) => {
                write!(f, "no executable method at name index {index}")
            }
            RuntimeErrorKind::UnsupportedOpcode(op) => {
                write!(f, "unsupported opcode {op}")
            }
            RuntimeErrorKind::TruncatedCode { at } => {
                write!(f, "bytecode ends inside the instruction at pc {at}")
            }
            RuntimeErrorKind::BadDescriptor(desc) => write!(f, "{desc}"),
            RuntimeErrorKind::Unwound(class) => {
                write!(f, "uncaught exception of type {class}")
            }
            RuntimeErrorKind::NoActiveFrame => write!(f, "no active frame"),
            RuntimeErrorKind::Pool(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<ValueError> for RuntimeError {
    fn from(e: ValueError) -> Self {
        Self::new(RuntimeErrorKind::Exception(e))
    }
}

impl From<PoolError> for RuntimeError {
    fn from(e: PoolError) -> Self {
        Self::new(RuntimeErrorKind::Pool(e))
    }
}

/// `Runtime` owns the program, the frame stack and the static field area,
/// and drives execution from the `main` entry point down.
pub struct Runtime {
    program: Program,
    frames: Vec<Frame>,
    statics: HashMap<u16, Value>,
    // Printed lines and returned values are recorded for the tests,
    // mirroring what lands on stdout and in callers' stacks.
    printed: Vec<String>,
    return_values: Vec<Value>,
}

impl Runtime {
    pub fn new(program: Program) -> Self {
        let statics = program.field_defaults.clone();
        Self {
            program,
            frames: Vec::new(),
            statics,
            printed: Vec::new(),
            return_values: Vec::new(),
        }
    }

    /// Executes the program's `main` method to completion.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let entry = self.program.entry_point();
        let method = self
            .program
            .methods
            .get(&entry)
            .cloned()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::UnknownMethod(entry)))?;
        let mut locals = vec![Value::Null; (method.max_locals as usize).max(1)];
        // Stand-in for the String[] args array; nothing is passed through.
        locals[0] = Value::new_array(TypeTag::Reference, 0)?;
        trace!("entering {}{}", method.name, method.descriptor);
        self.frames.push(Frame::with_locals(method.code, locals));
        self.run_frame()?;
        Ok(())
    }

    /// Lines `println` has emitted, in order.
    pub fn printed(&self) -> &[String] {
        &self.printed
    }

    /// The most recent value returned by a `*return` opcode.
    pub fn top_return_value(&self) -> Option<&Value> {
        self.return_values.last()
    }

    fn frame(&self) -> Result<&Frame, RuntimeError> {
        self.frames
            .last()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::NoActiveFrame))
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::NoActiveFrame))
    }

    /// Pushes onto the current operand stack; a missing frame means the
    /// top-level return value has nowhere to go and is dropped.
    fn push(&mut self, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push(value);
        }
    }

    fn pop(&mut self, op: OPCode) -> Result<Value, RuntimeError> {
        self.frame_mut()?
            .pop()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::EmptyStack(op)))
    }

    fn pop_int(&mut self, op: OPCode) -> Result<i32, RuntimeError> {
        self.pop(op)?.as_int().ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::InvalidOperand { op, expected: "int" })
        })
    }

    fn peek(&self, op: OPCode) -> Result<&Value, RuntimeError> {
        self.frame()?
            .peek()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::EmptyStack(op)))
    }

    fn pc(&self) -> Result<usize, RuntimeError> {
        Ok(self.frame()?.pc)
    }

    fn set_pc(&mut self, pc: usize) -> Result<(), RuntimeError> {
        self.frame_mut()?.pc = pc;
        Ok(())
    }

    fn advance(&mut self, n: usize) -> Result<(), RuntimeError> {
        let frame = self.frame_mut()?;
        frame.pc += n;
        Ok(())
    }

    /// Operand byte at `pc + offset` of the current instruction.
    fn operand(&self, offset: usize) -> Result<u8, RuntimeError> {
        let frame = self.frame()?;
        let at = frame.pc + offset;
        frame
            .code
            .get(at)
            .copied()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::TruncatedCode { at: frame.pc }))
    }

    fn operand_u16(&self, offset: usize) -> Result<u16, RuntimeError> {
        let hi = self.operand(offset)?;
        let lo = self.operand(offset + 1)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn operand_i16(&self, offset: usize) -> Result<i16, RuntimeError> {
        Ok(self.operand_u16(offset)? as i16)
    }

    /// Signed 32-bit word at an absolute code index, used by the switch
    /// tables and the wide branches.
    fn code_i32_at(&self, at: usize) -> Result<i32, RuntimeError> {
        let frame = self.frame()?;
        let bytes = frame
            .code
            .get(at..at + 4)
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::TruncatedCode { at: frame.pc }))?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Conditional 16-bit branch: the offset is signed and relative to the
    /// start of the branch instruction itself.
    fn branch16(&mut self, taken: bool) -> Result<(), RuntimeError> {
        if taken {
            let offset = self.operand_i16(1)?;
            let pc = self.pc()?;
            self.set_pc((pc as i64 + i64::from(offset)) as usize)
        } else {
            self.advance(3)
        }
    }

    fn load_local(&mut self, index: usize, op: OPCode) -> Result<(), RuntimeError> {
        let value = self
            .frame()?
            .load(index)
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::BadLocal { op, index }))?;
        self.push(value);
        Ok(())
    }

    fn store_local(&mut self, index: usize, op: OPCode) -> Result<(), RuntimeError> {
        let value = self.pop(op)?;
        self.frame_mut()?.store(index, value);
        Ok(())
    }

    /// Index operand of a load/store, doubled in width under the `wide`
    /// prefix; advances past the whole instruction.
    fn indexed_operand(&mut self, wide: bool) -> Result<usize, RuntimeError> {
        if wide {
            let index = self.operand_u16(1)?;
            self.advance(3)?;
            Ok(index as usize)
        } else {
            let index = self.operand(1)?;
            self.advance(2)?;
            Ok(usize::from(index))
        }
    }

    /// Does `value` satisfy a `checkcast`/`instanceof` against the class
    /// named by the pool? Comparison is by resolved name only; there is no
    /// class hierarchy to walk.
    fn instance_matches(value: &Value, class_name: &str) -> bool {
        match value {
            Value::Object(obj) => obj.borrow().class_name == class_name,
            Value::Str(_) => class_name == "java/lang/String",
            Value::Array(_) => class_name.starts_with('['),
            _ => false,
        }
    }

    fn value_class_name(value: &Value) -> String {
        match value {
            Value::Object(obj) => obj.borrow().class_name.clone(),
            Value::Str(_) => "java/lang/String".to_string(),
            Value::Array(arr) => format!("[{}", arr.elem.descriptor()),
            Value::Null => "null".to_string(),
            other => format!("{:?}", other.tag()),
        }
    }

    /// Builds the (possibly nested) storage of `multianewarray`.
    fn build_multi_array(counts: &[i32], elem: TypeTag) -> Result<Value, RuntimeError> {
        let length = counts[0];
        if counts.len() == 1 {
            return Ok(Value::new_array(elem, length)?);
        }
        let array = Value::new_array(TypeTag::Reference, length)?;
        for i in 0..length {
            array.array_set(i, Self::build_multi_array(&counts[1..], elem)?)?;
        }
        Ok(array)
    }

    /// Invokes a method of the loaded class: consumes the declared
    /// arguments (and the receiver for instance calls) off the caller's
    /// stack into the callee's fresh locals, then executes the callee in a
    /// new frame. A returned value lands on the caller's stack.
    fn invoke_user(
        &mut self,
        name_index: u16,
        has_receiver: bool,
        op: OPCode,
    ) -> Result<(), RuntimeError> {
        let method = self
            .program
            .methods
            .get(&name_index)
            .cloned()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::UnknownMethod(name_index)))?;
        let receiver_slots = usize::from(has_receiver);
        let arg_slots: usize = method.arg_types.iter().map(JType::slots).sum();
        let mut locals =
            vec![Value::Null; (method.max_locals as usize).max(receiver_slots + arg_slots)];
        let mut slot = receiver_slots + arg_slots;
        for arg in method.arg_types.iter().rev() {
            slot -= arg.slots();
            locals[slot] = self.pop(op)?;
        }
        if has_receiver {
            locals[0] = self.pop(op)?;
        }
        trace!("invoking {}{}", method.name, method.descriptor);
        self.frames.push(Frame::with_locals(method.code, locals));
        if let Some(value) = self.run_frame()? {
            self.push(value);
        }
        Ok(())
    }

    /// The `println` simulation behind the PrintStream sentinel: consumes
    /// the declared arguments and writes one line to stdout.
    fn invoke_println(&mut self, index: u16, op: OPCode) -> Result<(), RuntimeError> {
        let name_and_type = self.program.pool.name_and_type_by_index(index)?;
        if !bridge::is_println(&name_and_type) {
            // No other PrintStream member executes; calls are dropped.
            return Ok(());
        }
        let paren = name_and_type.find('(').ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::BadDescriptor(name_and_type.clone()))
        })?;
        let (args, _) = parse_method_descriptor(&name_and_type[paren..])
            .map_err(|e| RuntimeError::new(RuntimeErrorKind::BadDescriptor(e.to_string())))?;
        let line = if args.is_empty() {
            String::new()
        } else {
            bridge::render(&self.pop(op)?)
        };
        println!("{line}");
        self.printed.push(line);
        Ok(())
    }

    /// Runs the topmost frame until it returns or its bytecode ends.
    /// Returns the value a `*return` opcode carried, if any.
    fn run_frame(&mut self) -> Result<Option<Value>, RuntimeError> {
        let mut wide = false;
        loop {
            let (pc, byte) = {
                let Some(frame) = self.frames.last() else {
                    return Ok(None);
                };
                if frame.pc >= frame.code.len() {
                    // Ran off the end of the bytecode; treated as a return.
                    self.frames.pop();
                    return Ok(None);
                }
                (frame.pc, frame.code[frame.pc])
            };
            let op = OPCode::from(byte);
            trace!("pc {pc}: {op}");
            match op {
                OPCode::Nop => self.advance(1)?,
                OPCode::AconstNull => {
                    self.push(Value::Null);
                    self.advance(1)?;
                }
                OPCode::IconstM1
                | OPCode::Iconst0
                | OPCode::Iconst1
                | OPCode::Iconst2
                | OPCode::Iconst3
                | OPCode::Iconst4
                | OPCode::Iconst5 => {
                    self.push(Value::Int(i32::from(byte) - 3));
                    self.advance(1)?;
                }
                OPCode::Lconst0 | OPCode::Lconst1 => {
                    self.push(Value::Long(i64::from(byte) - 9));
                    self.advance(1)?;
                }
                OPCode::Fconst0 | OPCode::Fconst1 | OPCode::Fconst2 => {
                    self.push(Value::Float(f32::from(byte - 11)));
                    self.advance(1)?;
                }
                OPCode::Dconst0 | OPCode::Dconst1 => {
                    self.push(Value::Double(f64::from(byte - 14)));
                    self.advance(1)?;
                }
                OPCode::Bipush => {
                    let value = self.operand(1)? as i8;
                    self.push(Value::Int(i32::from(value)));
                    self.advance(2)?;
                }
                OPCode::Sipush => {
                    let value = self.operand_i16(1)?;
                    self.push(Value::Int(i32::from(value)));
                    self.advance(3)?;
                }
                OPCode::Ldc => {
                    let index = u16::from(self.operand(1)?);
                    let value = self.program.pool.value_by_index(index)?;
                    self.push(value);
                    self.advance(2)?;
                }
                OPCode::LdcW => {
                    let index = self.operand_u16(1)?;
                    let value = self.program.pool.value_by_index(index)?;
                    self.push(value);
                    self.advance(3)?;
                }
                OPCode::Ldc2W => {
                    let index = self.operand_u16(1)?;
                    let value = self.program.pool.number_by_index(index)?;
                    self.push(value);
                    self.advance(3)?;
                }
                // Load and store operations.
                OPCode::Iload
                | OPCode::Lload
                | OPCode::Fload
                | OPCode::Dload
                | OPCode::Aload => {
                    let index = self.indexed_operand(wide)?;
                    self.load_local(index, op)?;
                }
                OPCode::Iload0 | OPCode::Lload0 | OPCode::Fload0 | OPCode::Dload0
                | OPCode::Aload0 => {
                    self.load_local(0, op)?;
                    self.advance(1)?;
                }
                OPCode::Iload1 | OPCode::Lload1 | OPCode::Fload1 | OPCode::Dload1
                | OPCode::Aload1 => {
                    self.load_local(1, op)?;
                    self.advance(1)?;
                }
                OPCode::Iload2 | OPCode::Lload2 | OPCode::Fload2 | OPCode::Dload2
                | OPCode::Aload2 => {
                    self.load_local(2, op)?;
                    self.advance(1)?;
                }
                OPCode::Iload3 | OPCode::Lload3 | OPCode::Fload3 | OPCode::Dload3
                | OPCode::Aload3 => {
                    self.load_local(3, op)?;
                    self.advance(1)?;
                }
                OPCode::Istore
                | OPCode::Lstore
                | OPCode::Fstore
                | OPCode::Dstore
                | OPCode::Astore => {
                    let index = self.indexed_operand(wide)?;
                    self.store_local(index, op)?;
                }
                OPCode::Istore0 | OPCode::Lstore0 | OPCode::Fstore0 | OPCode::Dstore0
                | OPCode::Astore0 => {
                    self.store_local(0, op)?;
                    self.advance(1)?;
                }
                OPCode::Istore1 | OPCode::Lstore1 | OPCode::Fstore1 | OPCode::Dstore1
                | OPCode::Astore1 => {
                    self.store_local(1, op)?;
                    self.advance(1)?;
                }
                OPCode::Istore2 | OPCode::Lstore2 | OPCode::Fstore2 | OPCode::Dstore2
                | OPCode::Astore2 => {
                    self.store_local(2, op)?;
                    self.advance(1)?;
                }
                OPCode::Istore3 | OPCode::Lstore3 | OPCode::Fstore3 | OPCode::Dstore3
                | OPCode::Astore3 => {
                    self.store_local(3, op)?;
                    self.advance(1)?;
                }
                // Array load and store operations.
                OPCode::Iaload
                | OPCode::Laload
                | OPCode::Faload
                | OPCode::Daload
                | OPCode::Aaload
                | OPCode::Baload
                | OPCode::Caload
                | OPCode::Saload => {
                    let index = self.pop_int(op)?;
                    let array = self.pop(op)?;
                    let value = array.array_get(index)?;
                    self.push(value);
                    self.advance(1)?;
                }
                OPCode::Iastore
                | OPCode::Lastore
                | OPCode::Fastore
                | OPCode::Dastore
                | OPCode::Aastore
                | OPCode::Bastore
                | OPCode::Castore
                | OPCode::Sastore => {
                    let value = self.pop(op)?;
                    let index = self.pop_int(op)?;
                    let array = self.pop(op)?;
                    array.array_set(index, value)?;
                    self.advance(1)?;
                }
                // Stack manipulation; the dup family is category-aware.
                OPCode::Pop => {
                    self.pop(op)?;
                    self.advance(1)?;
                }
                OPCode::Pop2 => {
                    let value = self.pop(op)?;
                    if value.category() == 1 {
                        self.pop(op)?;
                    }
                    self.advance(1)?;
                }
                OPCode::Dup => {
                    let value = self.peek(op)?.clone();
                    self.push(value);
                    self.advance(1)?;
                }
                OPCode::DupX1 => {
                    let v1 = self.pop(op)?;
                    let v2 = self.pop(op)?;
                    self.push(v1.clone());
                    self.push(v2);
                    self.push(v1);
                    self.advance(1)?;
                }
                OPCode::DupX2 => {
                    let v1 = self.pop(op)?;
                    let v2 = self.pop(op)?;
                    if v2.category() == 2 {
                        self.push(v1.clone());
                        self.push(v2);
                        self.push(v1);
                    } else {
                        let v3 = self.pop(op)?;
                        self.push(v1.clone());
                        self.push(v3);
                        self.push(v2);
                        self.push(v1);
                    }
                    self.advance(1)?;
                }
                OPCode::Dup2 => {
                    let v1 = self.pop(op)?;
                    if v1.category() == 2 {
                        self.push(v1.clone());
                        self.push(v1);
                    } else {
                        let v2 = self.pop(op)?;
                        self.push(v2.clone());
                        self.push(v1.clone());
                        self.push(v2);
                        self.push(v1);
                    }
                    self.advance(1)?;
                }
                OPCode::Dup2X1 => {
                    let v1 = self.pop(op)?;
                    if v1.category() == 2 {
                        let v2 = self.pop(op)?;
                        self.push(v1.clone());
                        self.push(v2);
                        self.push(v1);
                    } else {
                        let v2 = self.pop(op)?;
                        let v3 = self.pop(op)?;
                        self.push(v2.clone());
                        self.push(v1.clone());
                        self.push(v3);
                        self.push(v2);
                        self.push(v1);
                    }
                    self.advance(1)?;
                }
                OPCode::Dup2X2 => {
                    let v1 = self.pop(op)?;
                    if v1.category() == 2 {
                        let v2 = self.pop(op)?;
                        if v2.category() == 2 {
                            self.push(v1.clone());
                            self.push(v2);
                            self.push(v1);
                        } else {
                            let v3 = self.pop(op)?;
                            self.push(v1.clone());
                            self.push(v3);
                            self.push(v2);
                            self.push(v1);
                        }
                    } else {
                        let v2 = self.pop(op)?;
                        let v3 = self.pop(op)?;
                        if v3.category() == 2 {
                            self.push(v2.clone());
                            self.push(v1.clone());
                            self.push(v3);
                            self.push(v2);
                            self.push(v1);
                        } else {
                            let v4 = self.pop(op)?;
                            self.push(v2.clone());
                            self.push(v1.clone());
                            self.push(v4);
                            self.push(v3);
                            self.push(v2);
                            self.push(v1);
                        }
                    }
                    self.advance(1)?;
                }
                OPCode::Swap => {
                    let v1 = self.pop(op)?;
                    let v2 = self.pop(op)?;
                    if v1.category() == 2 || v2.category() == 2 {
                        return Err(RuntimeError::new(RuntimeErrorKind::InvalidOperand {
                            op,
                            expected: "two category-1 values",
                        }));
                    }
                    self.push(v1);
                    self.push(v2);
                    self.advance(1)?;
                }
                // Arithmetic operations.
                OPCode::Iadd | OPCode::Ladd | OPCode::Fadd | OPCode::Dadd => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::add(&lhs, &rhs)?);
                    self.advance(1)?;
                }
                OPCode::Isub | OPCode::Lsub | OPCode::Fsub | OPCode::Dsub => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::sub(&lhs, &rhs)?);
                    self.advance(1)?;
                }
                OPCode::Imul | OPCode::Lmul | OPCode::Fmul | OPCode::Dmul => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::mul(&lhs, &rhs)?);
                    self.advance(1)?;
                }
                OPCode::Idiv | OPCode::Ldiv | OPCode::Fdiv | OPCode::Ddiv => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::div(&lhs, &rhs)?);
                    self.advance(1)?;
                }
                OPCode::Irem | OPCode::Lrem | OPCode::Frem | OPCode::Drem => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::rem(&lhs, &rhs)?);
                    self.advance(1)?;
                }
                OPCode::Ineg | OPCode::Lneg | OPCode::Fneg | OPCode::Dneg => {
                    let value = self.pop(op)?;
                    self.push(Value::neg(&value)?);
                    self.advance(1)?;
                }
                // Bitwise and shift operations.
                OPCode::Ishl | OPCode::Lshl => {
                    let count = self.pop_int(op)?;
                    let value = self.pop(op)?;
                    self.push(Value::shl(&value, count)?);
                    self.advance(1)?;
                }
                OPCode::Ishr | OPCode::Lshr => {
                    let count = self.pop_int(op)?;
                    let value = self.pop(op)?;
                    self.push(Value::shr(&value, count)?);
                    self.advance(1)?;
                }
                OPCode::Iushr | OPCode::Lushr => {
                    let count = self.pop_int(op)?;
                    let value = self.pop(op)?;
                    self.push(Value::ushr(&value, count)?);
                    self.advance(1)?;
                }
                OPCode::Iand | OPCode::Land => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::band(&lhs, &rhs)?);
                    self.advance(1)?;
                }
                OPCode::Ior | OPCode::Lor => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::bor(&lhs, &rhs)?);
                    self.advance(1)?;
                }
                OPCode::Ixor | OPCode::Lxor => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::bxor(&lhs, &rhs)?);
                    self.advance(1)?;
                }
                OPCode::Iinc => {
                    let (index, delta, width) = if wide {
                        (
                            self.operand_u16(1)? as usize,
                            i32::from(self.operand_i16(3)?),
                            5,
                        )
                    } else {
                        (
                            usize::from(self.operand(1)?),
                            i32::from(self.operand(2)? as i8),
                            3,
                        )
                    };
                    let current = self
                        .frame()?
                        .load(index)
                        .and_then(|v| v.as_int())
                        .ok_or_else(|| {
                            RuntimeError::new(RuntimeErrorKind::BadLocal { op, index })
                        })?;
                    self.frame_mut()?
                        .store(index, Value::Int(current.wrapping_add(delta)));
                    self.advance(width)?;
                }
                // Type conversion operations.
                OPCode::L2i | OPCode::F2i | OPCode::D2i => {
                    let value = self.pop(op)?;
                    self.push(value.to_int()?);
                    self.advance(1)?;
                }
                OPCode::I2l | OPCode::F2l | OPCode::D2l => {
                    let value = self.pop(op)?;
                    self.push(value.to_long()?);
                    self.advance(1)?;
                }
                OPCode::I2f | OPCode::L2f | OPCode::D2f => {
                    let value = self.pop(op)?;
                    self.push(value.to_float()?);
                    self.advance(1)?;
                }
                OPCode::I2d | OPCode::L2d | OPCode::F2d => {
                    let value = self.pop(op)?;
                    self.push(value.to_double()?);
                    self.advance(1)?;
                }
                OPCode::I2b => {
                    let value = self.pop(op)?;
                    self.push(value.truncate_int(TypeTag::Byte)?);
                    self.advance(1)?;
                }
                OPCode::I2c => {
                    let value = self.pop(op)?;
                    self.push(value.truncate_int(TypeTag::Char)?);
                    self.advance(1)?;
                }
                OPCode::I2s => {
                    let value = self.pop(op)?;
                    self.push(value.truncate_int(TypeTag::Short)?);
                    self.advance(1)?;
                }
                // Comparison operations.
                OPCode::Lcmp => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::Int(Value::lcmp(&lhs, &rhs)?));
                    self.advance(1)?;
                }
                OPCode::Fcmpl | OPCode::Fcmpg => {
                    let nan = if op == OPCode::Fcmpg { 1 } else { -1 };
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::Int(Value::fcmp(&lhs, &rhs, nan)?));
                    self.advance(1)?;
                }
                OPCode::Dcmpl | OPCode::Dcmpg => {
                    let nan = if op == OPCode::Dcmpg { 1 } else { -1 };
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.push(Value::Int(Value::dcmp(&lhs, &rhs, nan)?));
                    self.advance(1)?;
                }
                // Control flow operations.
                OPCode::Ifeq => {
                    let value = self.pop_int(op)?;
                    self.branch16(value == 0)?;
                }
                OPCode::Ifne => {
                    let value = self.pop_int(op)?;
                    self.branch16(value != 0)?;
                }
                OPCode::Iflt => {
                    let value = self.pop_int(op)?;
                    self.branch16(value < 0)?;
                }
                OPCode::Ifge => {
                    let value = self.pop_int(op)?;
                    self.branch16(value >= 0)?;
                }
                OPCode::Ifgt => {
                    let value = self.pop_int(op)?;
                    self.branch16(value > 0)?;
                }
                OPCode::Ifle => {
                    let value = self.pop_int(op)?;
                    self.branch16(value <= 0)?;
                }
                OPCode::IfIcmpeq => {
                    let rhs = self.pop_int(op)?;
                    let lhs = self.pop_int(op)?;
                    self.branch16(lhs == rhs)?;
                }
                OPCode::IfIcmpne => {
                    let rhs = self.pop_int(op)?;
                    let lhs = self.pop_int(op)?;
                    self.branch16(lhs != rhs)?;
                }
                OPCode::IfIcmplt => {
                    let rhs = self.pop_int(op)?;
                    let lhs = self.pop_int(op)?;
                    self.branch16(lhs < rhs)?;
                }
                OPCode::IfIcmpge => {
                    let rhs = self.pop_int(op)?;
                    let lhs = self.pop_int(op)?;
                    self.branch16(lhs >= rhs)?;
                }
                OPCode::IfIcmpgt => {
                    let rhs = self.pop_int(op)?;
                    let lhs = self.pop_int(op)?;
                    self.branch16(lhs > rhs)?;
                }
                OPCode::IfIcmple => {
                    let rhs = self.pop_int(op)?;
                    let lhs = self.pop_int(op)?;
                    self.branch16(lhs <= rhs)?;
                }
                OPCode::IfAcmpeq => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.branch16(Value::ref_eq(&lhs, &rhs))?;
                }
                OPCode::IfAcmpne => {
                    let rhs = self.pop(op)?;
                    let lhs = self.pop(op)?;
                    self.branch16(!Value::ref_eq(&lhs, &rhs))?;
                }
                OPCode::Ifnull => {
                    let value = self.pop(op)?;
                    self.branch16(value.is_null())?;
                }
                OPCode::Ifnonnull => {
                    let value = self.pop(op)?;
                    self.branch16(!value.is_null())?;
                }
                OPCode::Goto => self.branch16(true)?,
                OPCode::GotoW => {
                    let offset = self.code_i32_at(pc + 1)?;
                    self.set_pc((pc as i64 + i64::from(offset)) as usize)?;
                }
                // Subroutine opcodes are deprecated and unused by modern
                // compilers; their operands are consumed without a transfer.
                OPCode::Jsr => self.advance(3)?,
                OPCode::JsrW => self.advance(5)?,
                OPCode::Ret => {
                    let width = if wide { 3 } else { 2 };
                    self.advance(width)?;
                }
                OPCode::Tableswitch => {
                    let base = pc + 1 + ((4 - ((pc + 1) % 4)) % 4);
                    let default = self.code_i32_at(base)?;
                    let low = self.code_i32_at(base + 4)?;
                    let high = self.code_i32_at(base + 8)?;
                    let key = self.pop_int(op)?;
                    let offset = if key < low || key > high {
                        default
                    } else {
                        let slot = (key - low) as usize;
                        self.code_i32_at(base + 12 + slot * 4)?
                    };
                    self.set_pc((pc as i64 + i64::from(offset)) as usize)?;
                }
                OPCode::Lookupswitch => {
                    let base = pc + 1 + ((4 - ((pc + 1) % 4)) % 4);
                    let default = self.code_i32_at(base)?;
                    let npairs = self.code_i32_at(base + 4)?;
                    let key = self.pop_int(op)?;
                    let mut offset = default;
                    for pair in 0..npairs as usize {
                        let candidate = self.code_i32_at(base + 8 + pair * 8)?;
                        if candidate == key {
                            offset = self.code_i32_at(base + 12 + pair * 8)?;
                            break;
                        }
                    }
                    self.set_pc((pc as i64 + i64::from(offset)) as usize)?;
                }
                // Return operations.
                OPCode::Ireturn
                | OPCode::Lreturn
                | OPCode::Freturn
                | OPCode::Dreturn
                | OPCode::Areturn => {
                    let value = self.pop(op)?;
                    self.frames.pop();
                    self.return_values.push(value.clone());
                    return Ok(Some(value));
                }
                OPCode::Return => {
                    self.frames.pop();
                    return Ok(None);
                }
                // Field access.
                OPCode::Getstatic => {
                    let index = self.operand_u16(1)?;
                    let class = self.program.pool.field_class_name(index)?;
                    if !class.starts_with("java") {
                        let name_index = self.program.pool.field_name_index(index)?;
                        let value = self
                            .statics
                            .get(&name_index)
                            .cloned()
                            .unwrap_or(Value::Null);
                        self.push(value);
                    }
                    // Fields of the java namespace (System.out) contribute
                    // nothing; println consumes only its declared arguments.
                    self.advance(3)?;
                }
                OPCode::Putstatic => {
                    let index = self.operand_u16(1)?;
                    let class = self.program.pool.field_class_name(index)?;
                    let value = self.pop(op)?;
                    if !class.starts_with("java") {
                        let name_index = self.program.pool.field_name_index(index)?;
                        self.statics.insert(name_index, value);
                    }
                    self.advance(3)?;
                }
                OPCode::Getfield => {
                    let index = self.operand_u16(1)?;
                    let name_index = self.program.pool.field_name_index(index)?;
                    let object = self.pop(op)?;
                    let value = match &object {
                        Value::Null => return Err(ValueError::NullReference.into()),
                        Value::Object(obj) => obj
                            .borrow()
                            .fields
                            .get(&name_index)
                            .or_else(|| self.program.field_defaults.get(&name_index))
                            .cloned()
                            .unwrap_or(Value::Null),
                        _ => {
                            return Err(RuntimeError::new(RuntimeErrorKind::InvalidOperand {
                                op,
                                expected: "object reference",
                            }))
                        }
                    };
                    self.push(value);
                    self.advance(3)?;
                }
                OPCode::Putfield => {
                    let index = self.operand_u16(1)?;
                    let name_index = self.program.pool.field_name_index(index)?;
                    let value = self.pop(op)?;
                    let object = self.pop(op)?;
                    match &object {
                        Value::Null => return Err(ValueError::NullReference.into()),
                        Value::Object(obj) => {
                            obj.borrow_mut().fields.insert(name_index, value);
                        }
                        _ => {
                            return Err(RuntimeError::new(RuntimeErrorKind::InvalidOperand {
                                op,
                                expected: "object reference",
                            }))
                        }
                    }
                    self.advance(3)?;
                }
                // Method invocation.
                OPCode::Invokevirtual => {
                    let index = self.operand_u16(1)?;
                    self.advance(3)?;
                    match self.program.pool.method_name_index(index)? {
                        bridge::JAVA_IO_PRINT_STREAM => self.invoke_println(index, op)?,
                        // Methods of java/lang/Object are accepted and
                        // dropped.
                        bridge::JAVA_LANG_OBJECT => {}
                        name_index => self.invoke_user(name_index as u16, true, op)?,
                    }
                }
                OPCode::Invokespecial => {
                    let index = self.operand_u16(1)?;
                    self.advance(3)?;
                    match self.program.pool.method_name_index(index)? {
                        // Object.<init> discards the receiver being
                        // initialized and does nothing else.
                        bridge::JAVA_LANG_OBJECT => {
                            self.pop(op)?;
                        }
                        bridge::JAVA_IO_PRINT_STREAM => {}
                        name_index => self.invoke_user(name_index as u16, true, op)?,
                    }
                }
                OPCode::Invokestatic => {
                    let index = self.operand_u16(1)?;
                    self.advance(3)?;
                    match self.program.pool.method_name_index(index)? {
                        bridge::JAVA_LANG_OBJECT | bridge::JAVA_IO_PRINT_STREAM => {}
                        name_index => self.invoke_user(name_index as u16, false, op)?,
                    }
                }
                // Interface and dynamic call sites are accepted without
                // effect; their operands are consumed.
                OPCode::Invokeinterface | OPCode::Invokedynamic => self.advance(5)?,
                // Object and array creation.
                OPCode::New => {
                    let index = self.operand_u16(1)?;
                    let name = self.program.pool.class_name(index)?;
                    self.push(Value::new_object(&name));
                    self.advance(3)?;
                }
                OPCode::Newarray => {
                    let atype = self.operand(1)?;
                    let elem = TypeTag::from_atype(atype).ok_or_else(|| {
                        RuntimeError::new(RuntimeErrorKind::InvalidOperand {
                            op,
                            expected: "array type code 4-11",
                        })
                    })?;
                    let count = self.pop_int(op)?;
                    self.push(Value::new_array(elem, count)?);
                    self.advance(2)?;
                }
                OPCode::Anewarray => {
                    let index = self.operand_u16(1)?;
                    self.program.pool.class_name(index)?;
                    let count = self.pop_int(op)?;
                    self.push(Value::new_array(TypeTag::Reference, count)?);
                    self.advance(3)?;
                }
                OPCode::Multianewarray => {
                    let index = self.operand_u16(1)?;
                    let dims = usize::from(self.operand(3)?);
                    let descriptor = self.program.pool.class_name(index)?;
                    let elem = descriptor
                        .trim_start_matches('[')
                        .chars()
                        .next()
                        .and_then(TypeTag::from_descriptor)
                        .ok_or_else(|| {
                            RuntimeError::new(RuntimeErrorKind::InvalidOperand {
                                op,
                                expected: "array class descriptor",
                            })
                        })?;
                    let mut counts = vec![0; dims];
                    for slot in (0..dims).rev() {
                        counts[slot] = self.pop_int(op)?;
                    }
                    self.push(Self::build_multi_array(&counts, elem)?);
                    self.advance(4)?;
                }
                OPCode::Arraylength => {
                    let array = self.pop(op)?;
                    self.push(Value::Int(array.array_length()?));
                    self.advance(1)?;
                }
                OPCode::Athrow => {
                    let value = self.pop(op)?;
                    if value.is_null() {
                        return Err(ValueError::NullReference.into());
                    }
                    return Err(RuntimeError::new(RuntimeErrorKind::Unwound(
                        Self::value_class_name(&value),
                    )));
                }
                OPCode::Checkcast => {
                    let index = self.operand_u16(1)?;
                    let target = self.program.pool.class_name(index)?;
                    let value = self.peek(op)?;
                    if !value.is_null() && !Self::instance_matches(value, &target) {
                        let from = Self::value_class_name(value);
                        return Err(ValueError::ClassCast { from, to: target }.into());
                    }
                    self.advance(3)?;
                }
                OPCode::Instanceof => {
                    let index = self.operand_u16(1)?;
                    let target = self.program.pool.class_name(index)?;
                    let value = self.pop(op)?;
                    let matches = Self::instance_matches(&value, &target);
                    self.push(Value::Int(i32::from(matches)));
                    self.advance(3)?;
                }
                // Monitors are accepted as no-ops; single-threaded.
                OPCode::Monitorenter | OPCode::Monitorexit => {
                    self.pop(op)?;
                    self.advance(1)?;
                }
                OPCode::Wide => {
                    self.advance(1)?;
                    wide = true;
                    continue;
                }
                OPCode::Breakpoint | OPCode::Unknown(_) => {
                    return Err(RuntimeError::new(RuntimeErrorKind::UnsupportedOpcode(op)))
                }
            }
            wide = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{image::ClassImage, ClassFile, ACC_STATIC};

    const MAIN_DESC: &str = "([Ljava/lang/String;)V";

    fn runtime_for(image: &ClassImage) -> Runtime {
        let class = ClassFile::parse(&image.build()).unwrap();
        let program = Program::new(&class).unwrap();
        Runtime::new(program)
    }

    fn exec_image(image: &ClassImage) -> Runtime {
        let mut runtime = runtime_for(image);
        runtime.run().unwrap();
        runtime
    }

    fn exec(code: &[u8]) -> Runtime {
        let mut image = ClassImage::new();
        image.method(ACC_STATIC, "main", MAIN_DESC, code);
        exec_image(&image)
    }

    fn exec_err(code: &[u8]) -> RuntimeError {
        let mut image = ClassImage::new();
        image.method(ACC_STATIC, "main", MAIN_DESC, code);
        let mut runtime = runtime_for(&image);
        runtime.run().unwrap_err()
    }

    macro_rules! test_exec_case {
        ($name:ident, $code:expr, $expected:pat) => {
            #[test]
            fn $name() {
                let runtime = exec($code);
                assert!(matches!(runtime.top_return_value(), Some($expected)));
            }
        };
    }

    // 1 + 2 * 3 compiled by javac: the constants fold onto the stack and
    // the products combine before the sum.
    test_exec_case!(
        arithmetic_precedence,
        &[0x04, 0x05, 0x06, 0x68, 0x60, 0xAC],
        Value::Int(7)
    );

    // iconst_2, iconst_3, swap, isub => 3 - 2.
    test_exec_case!(swap_flips_operands, &[0x05, 0x06, 0x5F, 0x64, 0xAC], Value::Int(1));

    // iconst_1, iconst_2, dup_x1, iadd, iadd => 2 + (1 + 2).
    test_exec_case!(
        dup_x1_inserts_below,
        &[0x04, 0x05, 0x5A, 0x60, 0x60, 0xAC],
        Value::Int(5)
    );

    // -1 >>> 28 == 15.
    test_exec_case!(
        ushr_is_logical,
        &[0x02, 0x10, 0x1C, 0x7C, 0xAC],
        Value::Int(15)
    );

    // lconst_1, lconst_0, lcmp => 1.
    test_exec_case!(lcmp_orders_longs, &[0x0A, 0x09, 0x94, 0xAC], Value::Int(1));

    // bipush 50, i2b => sign-extended truncation is identity here.
    test_exec_case!(i2b_round_trips, &[0x10, 0x32, 0x91, 0xAC], Value::Int(50));

    // sipush 300, i2b => 300 wraps to 44.
    test_exec_case!(
        i2b_truncates,
        &[0x11, 0x01, 0x2C, 0x91, 0xAC],
        Value::Int(44)
    );

    // iconst_4, i2d, dconst_1, dadd, d2i => 5.
    test_exec_case!(
        int_double_round_trip,
        &[0x07, 0x87, 0x0F, 0x63, 0x8E, 0xAC],
        Value::Int(5)
    );

    #[test]
    fn loop_sums_first_ten_integers() {
        // int s = 0; for (int i = 0; i < 10; i++) s += i; return s;
        let code = [
            0x03, 0x3C, // iconst_0, istore_1
            0x03, 0x3D, // iconst_0, istore_2
            0x1C, 0x10, 0x0A, // iload_2, bipush 10
            0xA2, 0x00, 0x0D, // if_icmpge +13 -> pc 20
            0x1B, 0x1C, 0x60, 0x3C, // iload_1, iload_2, iadd, istore_1
            0x84, 0x02, 0x01, // iinc 2, 1
            0xA7, 0xFF, 0xF3, // goto -13 -> pc 4
            0x1B, 0xAC, // iload_1, ireturn
        ];
        let runtime = exec(&code);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(45))));
    }

    #[test]
    fn conditional_branch_offsets_are_relative_to_the_opcode() {
        // value, ifeq +5: taken lands on iconst_2, fallthrough returns 1.
        let taken = exec(&[0x03, 0x99, 0x00, 0x05, 0x04, 0xAC, 0x05, 0xAC]);
        assert!(matches!(taken.top_return_value(), Some(Value::Int(2))));
        let fallthrough = exec(&[0x04, 0x99, 0x00, 0x05, 0x04, 0xAC, 0x05, 0xAC]);
        assert!(matches!(fallthrough.top_return_value(), Some(Value::Int(1))));
    }

    #[test]
    fn null_references_compare_equal() {
        // aconst_null x2, if_acmpeq +5 -> iconst_1.
        let code = [0x01, 0x01, 0xA5, 0x00, 0x05, 0x03, 0xAC, 0x04, 0xAC];
        let runtime = exec(&code);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(1))));
    }

    #[test]
    fn division_by_zero_is_an_arithmetic_exception() {
        let err = exec_err(&[0x04, 0x03, 0x6C, 0xAC]);
        assert!(err.to_string().contains("ArithmeticException"));
    }

    #[test]
    fn array_reads_are_bounds_checked() {
        // int[] a = new int[3]; a[5]
        let code = [0x06, 0xBC, 0x0A, 0x4C, 0x2B, 0x10, 0x05, 0x2E, 0xAC];
        let err = exec_err(&code);
        let message = err.to_string();
        assert!(message.contains("ArrayIndexOutOfBoundsException"));
        assert!(message.contains("Index 5"));
    }

    #[test]
    fn negative_array_lengths_are_rejected() {
        let err = exec_err(&[0x02, 0xBC, 0x0A, 0xAC]);
        assert!(err.to_string().contains("NegativeArraySizeException"));
    }

    #[test]
    fn array_elements_round_trip() {
        // int[] a = new int[2]; a[1] = 9; return a[1];
        let code = [
            0x05, 0xBC, 0x0A, 0x4C, // new int[2], astore_1
            0x2B, 0x04, 0x10, 0x09, 0x4F, // aload_1, iconst_1, bipush 9, iastore
            0x2B, 0x04, 0x2E, 0xAC, // aload_1, iconst_1, iaload, ireturn
        ];
        let runtime = exec(&code);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(9))));
    }

    #[test]
    fn wide_iinc_doubles_operand_width() {
        let code = [
            0x03, 0x3C, // iconst_0, istore_1
            0xC4, 0x84, 0x00, 0x01, 0x00, 0x05, // wide iinc 1, 5
            0x1B, 0xAC, // iload_1, ireturn
        ];
        let runtime = exec(&code);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(5))));
    }

    #[test]
    fn tableswitch_dispatches_on_the_key() {
        let code = [
            0x04, 0xAA, 0x00, 0x00, // iconst_1, tableswitch + pad
            0x00, 0x00, 0x00, 0x17, // default -> pc 24
            0x00, 0x00, 0x00, 0x00, // low 0
            0x00, 0x00, 0x00, 0x01, // high 1
            0x00, 0x00, 0x00, 0x1A, // case 0 -> pc 27
            0x00, 0x00, 0x00, 0x1D, // case 1 -> pc 30
            0x10, 0x09, 0xAC, // bipush 9, ireturn
            0x10, 0x0A, 0xAC, // bipush 10, ireturn
            0x10, 0x0B, 0xAC, // bipush 11, ireturn
        ];
        let runtime = exec(&code);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(11))));
    }

    #[test]
    fn lookupswitch_scans_match_pairs() {
        let code = [
            0x10, 0x05, 0xAB, 0x00, // bipush 5, lookupswitch + pad
            0x00, 0x00, 0x00, 0x1A, // default -> pc 28
            0x00, 0x00, 0x00, 0x02, // npairs 2
            0x00, 0x00, 0x00, 0x01, // match 1
            0x00, 0x00, 0x00, 0x1C, // -> pc 30
            0x00, 0x00, 0x00, 0x05, // match 5
            0x00, 0x00, 0x00, 0x1E, // -> pc 32
            0x03, 0xAC, // iconst_0, ireturn
            0x08, 0xAC, // iconst_5, ireturn
            0x10, 0x07, 0xAC, // bipush 7, ireturn
        ];
        let runtime = exec(&code);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(7))));
    }

    #[test]
    fn unknown_opcodes_are_fatal_with_the_byte_value() {
        let err = exec_err(&[0xCB]);
        assert!(matches!(
            err.kind(),
            RuntimeErrorKind::UnsupportedOpcode(OPCode::Unknown(0xCB))
        ));
        assert!(err.to_string().contains("0xCB"));
    }

    #[test]
    fn running_off_the_end_terminates_cleanly() {
        let runtime = exec(&[0x00, 0x00]);
        assert!(runtime.top_return_value().is_none());
    }

    #[test]
    fn hello_world_prints_one_line() {
        let mut image = ClassImage::new();
        let out = image.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
        let println =
            image.method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V");
        let hello = image.string("Hello, World!");
        let code = [
            0xB2, 0x00, out as u8, // getstatic System.out
            0x12, hello as u8, // ldc "Hello, World!"
            0xB6, 0x00, println as u8, // invokevirtual println
            0xB1, // return
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert_eq!(runtime.printed(), ["Hello, World!".to_string()]);
    }

    #[test]
    fn println_renders_integers_in_decimal() {
        let mut image = ClassImage::new();
        let out = image.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
        let println = image.method_ref("java/io/PrintStream", "println", "(I)V");
        let code = [
            0xB2, 0x00, out as u8, // getstatic System.out
            0x10, 0x2A, // bipush 42
            0xB6, 0x00, println as u8, // invokevirtual println
            0xB1,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert_eq!(runtime.printed(), ["42".to_string()]);
    }

    #[test]
    fn println_without_arguments_prints_an_empty_line() {
        let mut image = ClassImage::new();
        let println = image.method_ref("java/io/PrintStream", "println", "()V");
        let code = [0xB6, 0x00, println as u8, 0xB1];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert_eq!(runtime.printed(), [String::new()]);
    }

    #[test]
    fn double_constants_add_via_ldc2_w() {
        let mut image = ClassImage::new();
        let a = image.double_const(1.5);
        let b = image.double_const(2.25);
        let code = [
            0x14, 0x00, a as u8, // ldc2_w 1.5
            0x14, 0x00, b as u8, // ldc2_w 2.25
            0x63, 0xAF, // dadd, dreturn
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(
            runtime.top_return_value(),
            Some(Value::Double(v)) if *v == 3.75
        ));
        assert_eq!(bridge::render(runtime.top_return_value().unwrap()), "3.75");
    }

    #[test]
    fn long_constants_add_via_ldc2_w() {
        let mut image = ClassImage::new();
        let a = image.long_const(1 << 40);
        let b = image.long_const(5);
        let code = [
            0x14, 0x00, a as u8, // ldc2_w
            0x14, 0x00, b as u8, // ldc2_w
            0x61, 0xAD, // ladd, lreturn
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(
            runtime.top_return_value(),
            Some(Value::Long(v)) if *v == (1i64 << 40) + 5
        ));
    }

    #[test]
    fn dcmpg_and_dcmpl_disagree_only_on_nan() {
        let mut image = ClassImage::new();
        let nan = image.double_const(f64::NAN);
        let one = image.double_const(1.0);
        let code = [
            0x14, 0x00, nan as u8, 0x14, 0x00, one as u8, 0x98, 0xAC, // dcmpg
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(1))));

        let mut image = ClassImage::new();
        let nan = image.double_const(f64::NAN);
        let one = image.double_const(1.0);
        let code = [
            0x14, 0x00, nan as u8, 0x14, 0x00, one as u8, 0x97, 0xAC, // dcmpl
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(-1))));
    }

    #[test]
    fn static_invocation_builds_fresh_locals_from_arguments() {
        let mut image = ClassImage::new();
        image.method(ACC_STATIC, "add", "(II)I", &[0x1A, 0x1B, 0x60, 0xAC]);
        let add = image.method_ref("Main", "add", "(II)I");
        let code = [
            0x05, 0x06, // iconst_2, iconst_3
            0xB8, 0x00, add as u8, // invokestatic add(II)I
            0xAC, // ireturn
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(5))));
    }

    #[test]
    fn callee_locals_do_not_alias_the_caller() {
        let mut image = ClassImage::new();
        // clobber() writes its own local slot 1 and returns nothing.
        image.method(ACC_STATIC, "clobber", "()V", &[0x06, 0x3C, 0xB1]);
        let clobber = image.method_ref("Main", "clobber", "()V");
        let code = [
            0x10, 0x09, 0x3C, // bipush 9, istore_1
            0xB8, 0x00, clobber as u8, // invokestatic clobber()
            0x1B, 0xAC, // iload_1, ireturn
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(9))));
    }

    #[test]
    fn virtual_invocation_passes_the_receiver_in_slot_zero() {
        let mut image = ClassImage::new();
        // half(I)I on Main: receiver in 0, argument in 1.
        image.method(0, "half", "(I)I", &[0x1B, 0x05, 0x6C, 0xAC]);
        let half = image.method_ref("Main", "half", "(I)I");
        let main_class = image.class("Main");
        let object_init = image.method_ref("java/lang/Object", "<init>", "()V");
        let code = [
            0xBB, 0x00, main_class as u8, // new Main
            0x59, // dup
            0xB7, 0x00, object_init as u8, // invokespecial Object.<init>
            0x10, 0x08, // bipush 8
            0xB6, 0x00, half as u8, // invokevirtual half(I)I
            0xAC, // ireturn
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(4))));
    }

    #[test]
    fn long_arguments_consume_two_local_slots() {
        let mut image = ClassImage::new();
        // second(JI)I returns its int argument, which sits in slot 2.
        image.method(ACC_STATIC, "second", "(JI)I", &[0x1C, 0xAC]);
        let second = image.method_ref("Main", "second", "(JI)I");
        let code = [
            0x0A, // lconst_1
            0x10, 0x2A, // bipush 42
            0xB8, 0x00, second as u8, // invokestatic second(JI)I
            0xAC,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(42))));
    }

    #[test]
    fn instance_fields_live_in_the_object_field_map() {
        let mut image = ClassImage::new();
        image.field(0, "x", "I");
        let x = image.field_ref("Main", "x", "I");
        let main_class = image.class("Main");
        let object_init = image.method_ref("java/lang/Object", "<init>", "()V");
        let code = [
            0xBB, 0x00, main_class as u8, // new Main
            0x59, // dup
            0xB7, 0x00, object_init as u8, // invokespecial Object.<init>
            0x59, // dup
            0x10, 0x05, // bipush 5
            0xB5, 0x00, x as u8, // putfield x
            0xB4, 0x00, x as u8, // getfield x
            0xAC,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(5))));
    }

    #[test]
    fn unset_instance_fields_read_their_declared_default() {
        let mut image = ClassImage::new();
        image.field(0, "x", "I");
        let x = image.field_ref("Main", "x", "I");
        let main_class = image.class("Main");
        let code = [
            0xBB, 0x00, main_class as u8, // new Main
            0xB4, 0x00, x as u8, // getfield x
            0xAC,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(0))));
    }

    #[test]
    fn static_fields_round_trip_through_the_static_area() {
        let mut image = ClassImage::new();
        image.field(ACC_STATIC, "counter", "I");
        let counter = image.field_ref("Main", "counter", "I");
        let code = [
            0x10, 0x07, // bipush 7
            0xB3, 0x00, counter as u8, // putstatic counter
            0xB2, 0x00, counter as u8, // getstatic counter
            0xAC,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(7))));
    }

    #[test]
    fn getfield_on_null_is_a_null_pointer_exception() {
        let mut image = ClassImage::new();
        image.field(0, "x", "I");
        let x = image.field_ref("Main", "x", "I");
        let code = [0x01, 0xB4, 0x00, x as u8, 0xAC];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let mut runtime = runtime_for(&image);
        let err = runtime.run().unwrap_err();
        assert_eq!(err.to_string(), "NullPointerException");
    }

    #[test]
    fn checkcast_accepts_the_resolved_class_and_null() {
        let mut image = ClassImage::new();
        let main_class = image.class("Main");
        let code = [
            0xBB, 0x00, main_class as u8, // new Main
            0xC0, 0x00, main_class as u8, // checkcast Main
            0x01, // aconst_null
            0xC0, 0x00, main_class as u8, // checkcast on null passes
            0xB1,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        exec_image(&image);
    }

    #[test]
    fn checkcast_failure_is_a_class_cast_exception() {
        let mut image = ClassImage::new();
        let main_class = image.class("Main");
        let other = image.class("Helper");
        let code = [
            0xBB, 0x00, main_class as u8, // new Main
            0xC0, 0x00, other as u8, // checkcast Helper
            0xB1,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let mut runtime = runtime_for(&image);
        let err = runtime.run().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ClassCastException"));
        assert!(message.contains("Main"));
        assert!(message.contains("Helper"));
    }

    #[test]
    fn instanceof_compares_class_names() {
        let mut image = ClassImage::new();
        let main_class = image.class("Main");
        let other = image.class("Helper");
        let code = [
            0xBB, 0x00, main_class as u8, // new Main
            0xC1, 0x00, other as u8, // instanceof Helper
            0xAC,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(0))));
    }

    #[test]
    fn athrow_aborts_with_the_thrown_class() {
        let mut image = ClassImage::new();
        let boom = image.class("Boom");
        let code = [0xBB, 0x00, boom as u8, 0xBF];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let mut runtime = runtime_for(&image);
        let err = runtime.run().unwrap_err();
        assert!(err.to_string().contains("Boom"));
    }

    #[test]
    fn multianewarray_builds_nested_storage() {
        let mut image = ClassImage::new();
        let matrix = image.class("[[I");
        let code = [
            0x05, 0x06, // iconst_2, iconst_3
            0xC5, 0x00, matrix as u8, 0x02, // multianewarray [[I, 2 dims
            0x4C, // astore_1
            0x2B, 0x03, 0x32, // aload_1, iconst_0, aaload
            0xBE, // arraylength
            0xAC,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        let runtime = exec_image(&image);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(3))));
    }

    #[test]
    fn monitor_opcodes_only_consume_the_reference() {
        let mut image = ClassImage::new();
        let main_class = image.class("Main");
        let code = [
            0xBB, 0x00, main_class as u8, // new Main
            0x59, 0xC2, // dup, monitorenter
            0xC3, // monitorexit
            0xB1,
        ];
        image.method(ACC_STATIC, "main", MAIN_DESC, &code);
        exec_image(&image);
    }

    #[test]
    fn jsr_and_ret_are_operand_consuming_no_ops() {
        // jsr +3 falls through to the next instruction; ret skips its
        // index byte.
        let code = [0xA8, 0x00, 0x03, 0xA9, 0x01, 0x04, 0xAC];
        let runtime = exec(&code);
        assert!(matches!(runtime.top_return_value(), Some(Value::Int(1))));
    }
}
