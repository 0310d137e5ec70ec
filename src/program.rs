//! Interpreter-facing view of a parsed class: executable methods keyed by
//! the name index of their constant pool entry, decoded descriptors and
//! the default values of the class fields.
use log::debug;
use regex::Regex;

use std::collections::HashMap;
use std::fmt;

use crate::class::ClassFile;
use crate::pool::{ConstantPool, PoolError};
use crate::value::{TypeTag, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    MissingMain,
    MissingCode(String),
    BadDescriptor(String),
    Pool(PoolError),
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingMain => {
                write!(f, "no static main([Ljava/lang/String;)V method")
            }
            Self::MissingCode(name) => {
                write!(f, "method {name} carries no Code attribute")
            }
            Self::BadDescriptor(desc) => {
                write!(f, "malformed method descriptor {desc:?}")
            }
            Self::Pool(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ProgramError {}

impl From<PoolError> for ProgramError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

/// A decoded parameter or return type: the base tag plus the array
/// dimension count of the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JType {
    pub tag: TypeTag,
    pub dims: u8,
}

impl JType {
    /// Local/stack slots the type consumes as an argument; arrays are
    /// references regardless of their element type.
    pub fn slots(&self) -> usize {
        if self.dims > 0 {
            1
        } else {
            self.tag.category()
        }
    }
}

/// An executable method: resolved identity plus the contents of its Code
/// attribute.
#[derive(Debug, Clone)]
pub struct Method {
    pub name_index: u16,
    pub name: String,
    pub descriptor: String,
    pub arg_types: Vec<JType>,
    pub return_type: Option<JType>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

/// The program the runtime executes: the resolved constant pool, the
/// method table and the zero values of the declared fields (keyed by name
/// index, seeding object field maps and the static area).
#[derive(Debug, Clone)]
pub struct Program {
    pub pool: ConstantPool,
    pub methods: HashMap<u16, Method>,
    pub field_defaults: HashMap<u16, Value>,
    entry: u16,
}

impl Program {
    pub fn new(class: &ClassFile) -> Result<Program, ProgramError> {
        let mut methods = HashMap::new();
        for info in &class.methods {
            let name = class.pool.name_by_index(info.name_index)?;
            let Some(code) = info.code() else {
                // Abstract and native methods carry no code; they can never
                // be invoked here, so they are simply not registered.
                continue;
            };
            let descriptor = class.pool.name_by_index(info.descriptor_index)?;
            let (arg_types, return_type) = parse_method_descriptor(&descriptor)?;
            methods.insert(
                info.name_index,
                Method {
                    name_index: info.name_index,
                    name,
                    descriptor,
                    arg_types,
                    return_type,
                    max_stack: code.max_stack,
                    max_locals: code.max_locals,
                    code: code.code.clone(),
                },
            );
        }

        let mut field_defaults = HashMap::new();
        for field in &class.fields {
            let descriptor = class.pool.name_by_index(field.descriptor_index)?;
            let tag = descriptor
                .chars()
                .next()
                .and_then(TypeTag::from_descriptor)
                .ok_or_else(|| ProgramError::BadDescriptor(descriptor.clone()))?;
            field_defaults.insert(field.name_index, Value::default_of(tag));
        }

        let entry = class
            .main_method()
            .map(|m| m.name_index)
            .ok_or(ProgramError::MissingMain)?;
        if !methods.contains_key(&entry) {
            return Err(ProgramError::MissingCode("main".to_string()));
        }
        debug!(
            "program has {} executable methods, entry at name index {entry}",
            methods.len()
        );
        Ok(Program {
            pool: class.pool.clone(),
            methods,
            field_defaults,
            entry,
        })
    }

    /// Name index of the `main` method the runtime starts in.
    pub fn entry_point(&self) -> u16 {
        self.entry
    }
}

/// Splits a method descriptor `(args)ret` into its decoded argument and
/// return types. The return type is `None` for `V`.
pub fn parse_method_descriptor(
    descriptor: &str,
) -> Result<(Vec<JType>, Option<JType>), ProgramError> {
    let re = Regex::new(r"\(([^)]*)\)(.+)").unwrap();
    let caps = re
        .captures(descriptor)
        .ok_or_else(|| ProgramError::BadDescriptor(descriptor.to_string()))?;
    let args = parse_field_types(caps.get(1).map_or("", |m| m.as_str()))
        .ok_or_else(|| ProgramError::BadDescriptor(descriptor.to_string()))?;
    let ret = caps.get(2).map_or("", |m| m.as_str());
    let ret = if ret == "V" {
        None
    } else {
        let types = parse_field_types(ret)
            .ok_or_else(|| ProgramError::BadDescriptor(descriptor.to_string()))?;
        match types.as_slice() {
            [t] => Some(*t),
            _ => return Err(ProgramError::BadDescriptor(descriptor.to_string())),
        }
    };
    Ok((args, ret))
}

/// Decodes a run of field descriptors, e.g. `I[JLjava/lang/String;D`.
fn parse_field_types(s: &str) -> Option<Vec<JType>> {
    let bytes = s.as_bytes();
    let mut types = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let mut dims = 0u8;
        while i < bytes.len() && bytes[i] == b'[' {
            dims += 1;
            i += 1;
        }
        let tag = match *bytes.get(i)? {
            b'L' => {
                let end = s[i..].find(';')? + i;
                i = end;
                TypeTag::Reference
            }
            c => TypeTag::from_descriptor(c as char)?,
        };
        i += 1;
        types.push(JType { tag, dims });
    }
    Some(types)
}
