//! Constant pool parsing, two-pass resolution and typed queries.
//!
//! The pool is the self-referential symbol table of a class file: entries
//! reference each other by index and only Utf8 entries carry actual text.
//! Parsing keeps the raw indices; a second pass fills the textual shadow
//! fields so later queries never chase references again.
use log::debug;

use std::fmt;

use crate::reader::{ClassReader, ReadError};
use crate::value::Value;

/// A single constant pool entry. Reference-bearing variants carry both the
/// raw indices read from the file and the resolved strings filled in by
/// [`ConstantPool::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8 {
        bytes: String,
    },
    Integer {
        value: i32,
    },
    Float {
        value: f32,
    },
    Long {
        value: i64,
    },
    Double {
        value: f64,
    },
    Class {
        name_index: u16,
        name: String,
    },
    String {
        string_index: u16,
        value: String,
    },
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
        class_name: String,
        name_and_type: String,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
        class_name: String,
        name_and_type: String,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
        class_name: String,
        name_and_type: String,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
        name: String,
        descriptor: String,
    },
    // Fills index 0 and the dead slot after each Long/Double entry.
    Placeholder,
}

impl Constant {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Utf8 { .. } => "Utf8",
            Self::Integer { .. } => "Integer",
            Self::Float { .. } => "Float",
            Self::Long { .. } => "Long",
            Self::Double { .. } => "Double",
            Self::Class { .. } => "Class",
            Self::String { .. } => "String",
            Self::FieldRef { .. } => "Fieldref",
            Self::MethodRef { .. } => "Methodref",
            Self::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Self::NameAndType { .. } => "NameAndType",
            Self::Placeholder => "Placeholder",
        }
    }
}

/// `PoolError` covers malformed pool data and misdirected queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    Truncated(ReadError),
    UnknownTag { tag: u8, offset: u64 },
    OutOfRange { index: u16, max: u16 },
    WrongKind { index: u16, expected: &'static str, found: &'static str },
    Cycle { index: u16 },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Truncated(e) => write!(f, "constant pool truncated: {e}"),
            Self::UnknownTag { tag, offset } => {
                write!(f, "unknown constant pool tag {tag} at offset {offset}")
            }
            Self::OutOfRange { index, max } => write!(
                f,
                "constant pool index {index} is out of range, allowed range: 1-{max}"
            ),
            Self::WrongKind {
                index,
                expected,
                found,
            } => write!(
                f,
                "constant pool index {index} is not a {expected}, is a {found} instead"
            ),
            Self::Cycle { index } => {
                write!(f, "cyclic constant pool reference through index {index}")
            }
        }
    }
}

impl std::error::Error for PoolError {}

impl From<ReadError> for PoolError {
    fn from(e: ReadError) -> Self {
        Self::Truncated(e)
    }
}

/// The parsed constant pool. Entries are addressed 1..count-1; index 0 and
/// the slot after each Long/Double hold placeholders that reject every
/// query.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Reads `constant_pool_count` and the following entries off the class
    /// file. The result still carries raw indices only; call
    /// [`ConstantPool::resolve`] before querying names.
    pub fn parse(reader: &mut ClassReader) -> Result<ConstantPool, PoolError> {
        let count = reader.read_u16()?;
        let mut entries = vec![Constant::Placeholder];
        while (entries.len() as u16) < count {
            let offset = reader.position();
            let tag = reader.read_u8()?;
            match tag {
                1 => {
                    let length = reader.read_u16()?;
                    let bytes = reader.read_bytes(length as usize)?;
                    entries.push(Constant::Utf8 {
                        bytes: String::from_utf8_lossy(&bytes).into_owned(),
                    });
                }
                3 => entries.push(Constant::Integer {
                    value: reader.read_u32()? as i32,
                }),
                4 => entries.push(Constant::Float {
                    value: f32::from_bits(reader.read_u32()?),
                }),
                5 => {
                    entries.push(Constant::Long {
                        value: reader.read_u64()? as i64,
                    });
                    entries.push(Constant::Placeholder);
                }
                6 => {
                    entries.push(Constant::Double {
                        value: f64::from_bits(reader.read_u64()?),
                    });
                    entries.push(Constant::Placeholder);
                }
                7 => entries.push(Constant::Class {
                    name_index: reader.read_u16()?,
                    name: String::new(),
                }),
                8 => entries.push(Constant::String {
                    string_index: reader.read_u16()?,
                    value: String::new(),
                }),
                9 => entries.push(Constant::FieldRef {
                    class_index: reader.read_u16()?,
                    name_and_type_index: reader.read_u16()?,
                    class_name: String::new(),
                    name_and_type: String::new(),
                }),
                10 => entries.push(Constant::MethodRef {
                    class_index: reader.read_u16()?,
                    name_and_type_index: reader.read_u16()?,
                    class_name: String::new(),
                    name_and_type: String::new(),
                }),
                11 => entries.push(Constant::InterfaceMethodRef {
                    class_index: reader.read_u16()?,
                    name_and_type_index: reader.read_u16()?,
                    class_name: String::new(),
                    name_and_type: String::new(),
                }),
                12 => entries.push(Constant::NameAndType {
                    name_index: reader.read_u16()?,
                    descriptor_index: reader.read_u16()?,
                    name: String::new(),
                    descriptor: String::new(),
                }),
                _ => return Err(PoolError::UnknownTag { tag, offset }),
            }
        }
        debug!("parsed {} constant pool entries", entries.len() - 1);
        Ok(ConstantPool { entries })
    }

    /// Assembles a pool from pre-built entries; index 0 must not be
    /// included. Used by the tests to stage pools without a class file.
    #[cfg(test)]
    pub(crate) fn from_entries(entries: Vec<Constant>) -> ConstantPool {
        let mut all = vec![Constant::Placeholder];
        all.extend(entries);
        ConstantPool { entries: all }
    }

    /// Number of addressable slots plus one, i.e. the `constant_pool_count`
    /// of the class file.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// The post-parse pass: walks every entry once and fills the textual
    /// shadow fields by recursively chasing indices down to Utf8 entries.
    /// Cycles cannot occur in a well-formed file and are fatal.
    pub fn resolve(&mut self) -> Result<(), PoolError> {
        for index in 1..self.entries.len() {
            match self.entries[index] {
                Constant::Utf8 { .. }
                | Constant::Integer { .. }
                | Constant::Float { .. }
                | Constant::Long { .. }
                | Constant::Double { .. }
                | Constant::Placeholder => continue,
                _ => {
                    let mut visiting = Vec::new();
                    self.resolve_entry(index as u16, &mut visiting)?;
                }
            }
        }
        debug!("resolved constant pool references");
        Ok(())
    }

    /// Resolves one entry and returns the text it contributes to its
    /// parents: Utf8 bytes, a class name, a string literal, or a
    /// NameAndType rendered as `name + descriptor`.
    fn resolve_entry(
        &mut self,
        index: u16,
        visiting: &mut Vec<u16>,
    ) -> Result<String, PoolError> {
        if visiting.contains(&index) {
            return Err(PoolError::Cycle { index });
        }
        visiting.push(index);
        let text = match self.entry(index)?.clone() {
            Constant::Utf8 { bytes } => bytes,
            Constant::Class { name_index, .. } => {
                let name = self.resolve_entry(name_index, visiting)?;
                if let Constant::Class { name: slot, .. } =
                    &mut self.entries[index as usize]
                {
                    *slot = name.clone();
                }
                name
            }
            Constant::String { string_index, .. } => {
                let value = self.resolve_entry(string_index, visiting)?;
                if let Constant::String { value: slot, .. } =
                    &mut self.entries[index as usize]
                {
                    *slot = value.clone();
                }
                value
            }
            Constant::NameAndType {
                name_index,
                descriptor_index,
                ..
            } => {
                let name = self.resolve_entry(name_index, visiting)?;
                let descriptor = self.resolve_entry(descriptor_index, visiting)?;
                let text = format!("{name}{descriptor}");
                if let Constant::NameAndType {
                    name: n, descriptor: d, ..
                } = &mut self.entries[index as usize]
                {
                    *n = name;
                    *d = descriptor;
                }
                text
            }
            Constant::FieldRef {
                class_index,
                name_and_type_index,
                ..
            }
            | Constant::MethodRef {
                class_index,
                name_and_type_index,
                ..
            }
            | Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
                ..
            } => {
                let class_name = self.resolve_entry(class_index, visiting)?;
                let name_and_type =
                    self.resolve_entry(name_and_type_index, visiting)?;
                let text = name_and_type.clone();
                match &mut self.entries[index as usize] {
                    Constant::FieldRef {
                        class_name: c,
                        name_and_type: n,
                        ..
                    }
                    | Constant::MethodRef {
                        class_name: c,
                        name_and_type: n,
                        ..
                    }
                    | Constant::InterfaceMethodRef {
                        class_name: c,
                        name_and_type: n,
                        ..
                    } => {
                        *c = class_name;
                        *n = name_and_type;
                    }
                    _ => {}
                }
                text
            }
            other => {
                visiting.pop();
                return Err(PoolError::WrongKind {
                    index,
                    expected: "resolvable constant",
                    found: other.kind(),
                });
            }
        };
        visiting.pop();
        Ok(text)
    }

    /// Range-checked entry access; placeholders are addressable but reject
    /// every typed query below via kind mismatch.
    pub fn entry(&self, index: u16) -> Result<&Constant, PoolError> {
        if index == 0 || index as usize >= self.entries.len() {
            return Err(PoolError::OutOfRange {
                index,
                max: self.entries.len() as u16 - 1,
            });
        }
        Ok(&self.entries[index as usize])
    }

    fn wrong_kind(&self, index: u16, expected: &'static str) -> PoolError {
        let found = self.entries[index as usize].kind();
        PoolError::WrongKind {
            index,
            expected,
            found,
        }
    }

    /// Renders the entry at `index` as text. References render as
    /// `"<class/name_and_type>"`, numeric constants in decimal, strings as
    /// the resolved literal.
    pub fn name_by_index(&self, index: u16) -> Result<String, PoolError> {
        match self.entry(index)? {
            Constant::Utf8 { bytes } => Ok(bytes.clone()),
            Constant::Class { name, .. } => Ok(name.clone()),
            Constant::String { value, .. } => Ok(value.clone()),
            Constant::Integer { value } => Ok(value.to_string()),
            Constant::Float { value } => Ok(value.to_string()),
            Constant::Long { value } => Ok(value.to_string()),
            Constant::Double { value } => Ok(value.to_string()),
            Constant::FieldRef {
                class_name,
                name_and_type,
                ..
            }
            | Constant::MethodRef {
                class_name,
                name_and_type,
                ..
            }
            | Constant::InterfaceMethodRef {
                class_name,
                name_and_type,
                ..
            } => Ok(format!("<{class_name}/{name_and_type}>")),
            _ => Err(self.wrong_kind(
                index,
                "Utf8, Class, Methodref, Fieldref, String, Double, Float, \
                 Integer, Long or InterfaceMethodref",
            )),
        }
    }

    /// For a Methodref entry, the `name_index` of its NameAndType, or one
    /// of the two well-known-class sentinels the runtime bridge handles:
    /// -1 for `java/lang/Object`, -2 for `java/io/PrintStream`.
    pub fn method_name_index(&self, index: u16) -> Result<i32, PoolError> {
        match self.entry(index)? {
            Constant::MethodRef {
                class_name,
                name_and_type_index,
                ..
            } => {
                if class_name == "java/lang/Object" {
                    return Ok(-1);
                }
                if class_name == "java/io/PrintStream" {
                    return Ok(-2);
                }
                match self.entry(*name_and_type_index)? {
                    Constant::NameAndType { name_index, .. } => {
                        Ok(i32::from(*name_index))
                    }
                    _ => Err(self.wrong_kind(*name_and_type_index, "NameAndType")),
                }
            }
            _ => Err(self.wrong_kind(index, "Methodref")),
        }
    }

    /// The resolved class name of a Methodref entry.
    pub fn class_name_from_method(&self, index: u16) -> Result<String, PoolError> {
        match self.entry(index)? {
            Constant::MethodRef { class_name, .. } => Ok(class_name.clone()),
            _ => Err(self.wrong_kind(index, "Methodref")),
        }
    }

    /// The `name + descriptor` text of a Methodref entry, e.g.
    /// `println(I)V`.
    pub fn name_and_type_by_index(&self, index: u16) -> Result<String, PoolError> {
        match self.entry(index)? {
            Constant::MethodRef { name_and_type, .. } => Ok(name_and_type.clone()),
            _ => Err(self.wrong_kind(index, "Methodref")),
        }
    }

    /// The field name a Fieldref entry points at.
    pub fn field_by_index(&self, index: u16) -> Result<String, PoolError> {
        let name_index = self.field_name_index(index)?;
        match self.entry(name_index)? {
            Constant::Utf8 { bytes } => Ok(bytes.clone()),
            _ => Err(self.wrong_kind(name_index, "Utf8")),
        }
    }

    /// The `name_index` behind a Fieldref's NameAndType; object field maps
    /// and the static area are keyed by it.
    pub fn field_name_index(&self, index: u16) -> Result<u16, PoolError> {
        match self.entry(index)? {
            Constant::FieldRef {
                name_and_type_index,
                ..
            } => match self.entry(*name_and_type_index)? {
                Constant::NameAndType { name_index, .. } => Ok(*name_index),
                _ => Err(self.wrong_kind(*name_and_type_index, "NameAndType")),
            },
            _ => Err(self.wrong_kind(index, "Fieldref")),
        }
    }

    /// The resolved class name of a Fieldref entry.
    pub fn field_class_name(&self, index: u16) -> Result<String, PoolError> {
        match self.entry(index)? {
            Constant::FieldRef { class_name, .. } => Ok(class_name.clone()),
            _ => Err(self.wrong_kind(index, "Fieldref")),
        }
    }

    /// The name of a Class entry, used by `new`, `checkcast`,
    /// `instanceof` and `multianewarray`.
    pub fn class_name(&self, index: u16) -> Result<String, PoolError> {
        match self.entry(index)? {
            Constant::Class { name, .. } => Ok(name.clone()),
            _ => Err(self.wrong_kind(index, "Class")),
        }
    }

    /// A category-2 constant (`ldc2_w`): Long or Double.
    pub fn number_by_index(&self, index: u16) -> Result<Value, PoolError> {
        match self.entry(index)? {
            Constant::Long { value } => Ok(Value::Long(*value)),
            Constant::Double { value } => Ok(Value::Double(*value)),
            _ => Err(self.wrong_kind(index, "Long or Double")),
        }
    }

    /// A category-1 constant (`ldc`, `ldc_w`): Integer, Float or String.
    pub fn value_by_index(&self, index: u16) -> Result<Value, PoolError> {
        match self.entry(index)? {
            Constant::Integer { value } => Ok(Value::Int(*value)),
            Constant::Float { value } => Ok(Value::Float(*value)),
            Constant::String { value, .. } => Ok(Value::Str(value.clone())),
            _ => Err(self.wrong_kind(index, "Integer, Float or String")),
        }
    }

    /// Linear scan for the Utf8 entry holding `name`.
    pub fn method_index_by_name(&self, name: &str) -> Option<u16> {
        self.entries.iter().enumerate().find_map(|(i, e)| match e {
            Constant::Utf8 { bytes } if bytes == name => Some(i as u16),
            _ => None,
        })
    }

    /// Index of the `"LineNumberTable"` Utf8 entry, if present.
    pub fn line_table_index(&self) -> Option<u16> {
        self.method_index_by_name("LineNumberTable")
    }

    /// Index of the `"Code"` Utf8 entry, if present.
    pub fn code_index(&self) -> Option<u16> {
        self.method_index_by_name("Code")
    }

    /// Every class named by the pool that is not `this_class`, not part of
    /// the `java` namespace and not an array descriptor.
    pub fn external_classes(&self, this_class: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                Constant::Class { name, .. }
                    if name != this_class
                        && !name.contains("java")
                        && !name.starts_with('[') =>
                {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect()
    }
}
