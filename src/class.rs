//! Structural parser for Java class files: header, constant pool,
//! interfaces, fields, methods and (nested) attributes.
use log::debug;

use std::fmt;

use crate::pool::{ConstantPool, PoolError};
use crate::reader::{ClassReader, ReadError};

/// Magic bytes every class file starts with.
pub const CLASS_FILE_MAGIC: u32 = 0xCAFE_BABE;

/// The access flag marking static fields and methods; `main` must carry it.
pub const ACC_STATIC: u16 = 0x0008;

/// Name and descriptor identifying the entry point.
pub const MAIN_NAME: &str = "main";
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassError {
    Truncated(ReadError),
    BadMagic(u32),
    Pool(PoolError),
}

impl fmt::Display for ClassError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Truncated(e) => write!(f, "class file truncated: {e}"),
            Self::BadMagic(magic) => {
                write!(f, "incorrect magic value {magic:#010X}, expected 0xCAFEBABE")
            }
            Self::Pool(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ClassError {}

impl From<ReadError> for ClassError {
    fn from(e: ReadError) -> Self {
        Self::Truncated(e)
    }
}

impl From<PoolError> for ClassError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

/// One row of a `Code` attribute's exception table. Retained verbatim;
/// the interpreter does not unwind through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// The parsed body of a `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<AttributeInfo>,
}

/// An attribute as read from the file: the bytes of a `Code` attribute are
/// decoded, everything else is kept raw under its name index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub data: AttributeData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeData {
    Code(CodeAttribute),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    /// The method's `Code` attribute, if it has one.
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match &a.data {
            AttributeData::Code(code) => Some(code),
            AttributeData::Raw(_) => None,
        })
    }
}

/// A fully parsed class file with a resolved constant pool.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub magic: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, ClassError> {
        let mut reader = ClassReader::new(bytes);
        let magic = reader.read_u32()?;
        if magic != CLASS_FILE_MAGIC {
            return Err(ClassError::BadMagic(magic));
        }
        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        let mut pool = ConstantPool::parse(&mut reader)?;
        pool.resolve()?;
        let access_flags = reader.read_u16()?;
        let this_class = reader.read_u16()?;
        let super_class = reader.read_u16()?;
        let interfaces_count = reader.read_u16()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(reader.read_u16()?);
        }
        let fields_count = reader.read_u16()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            fields.push(FieldInfo {
                access_flags: reader.read_u16()?,
                name_index: reader.read_u16()?,
                descriptor_index: reader.read_u16()?,
                attributes: parse_attributes(&mut reader, &pool)?,
            });
        }
        let methods_count = reader.read_u16()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            methods.push(MethodInfo {
                access_flags: reader.read_u16()?,
                name_index: reader.read_u16()?,
                descriptor_index: reader.read_u16()?,
                attributes: parse_attributes(&mut reader, &pool)?,
            });
        }
        let attributes = parse_attributes(&mut reader, &pool)?;
        debug!(
            "parsed class file: version {major_version}.{minor_version}, \
             {fields_count} fields, {methods_count} methods"
        );
        Ok(ClassFile {
            magic,
            minor_version,
            major_version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// The resolved name of the class this file defines.
    pub fn class_name(&self) -> Result<String, PoolError> {
        self.pool.class_name(self.this_class)
    }

    /// Locates the static `main([Ljava/lang/String;)V` entry point.
    pub fn main_method(&self) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| {
            m.access_flags & ACC_STATIC != 0
                && self
                    .pool
                    .name_by_index(m.name_index)
                    .is_ok_and(|n| n == MAIN_NAME)
                && self
                    .pool
                    .name_by_index(m.descriptor_index)
                    .is_ok_and(|d| d == MAIN_DESCRIPTOR)
        })
    }
}

/// Reads an `attribute_count`-prefixed attribute list. Bodies named
/// `"Code"` are decoded into [`CodeAttribute`]s, including their own
/// nested attribute lists; all other bodies are kept raw.
fn parse_attributes(
    reader: &mut ClassReader,
    pool: &ConstantPool,
) -> Result<Vec<AttributeInfo>, ClassError> {
    let count = reader.read_u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.read_u16()?;
        let length = reader.read_u32()?;
        let name = pool.name_by_index(name_index)?;
        let data = if name == "Code" {
            AttributeData::Code(parse_code_attribute(reader, pool)?)
        } else {
            AttributeData::Raw(reader.read_bytes(length as usize)?)
        };
        attributes.push(AttributeInfo { name_index, data });
    }
    Ok(attributes)
}

fn parse_code_attribute(
    reader: &mut ClassReader,
    pool: &ConstantPool,
) -> Result<CodeAttribute, ClassError> {
    let max_stack = reader.read_u16()?;
    let max_locals = reader.read_u16()?;
    let code_length = reader.read_u32()?;
    let code = reader.read_bytes(code_length as usize)?;
    let exception_table_length = reader.read_u16()?;
    let mut exception_table = Vec::with_capacity(exception_table_length as usize);
    for _ in 0..exception_table_length {
        exception_table.push(ExceptionEntry {
            start_pc: reader.read_u16()?,
            end_pc: reader.read_u16()?,
            handler_pc: reader.read_u16()?,
            catch_type: reader.read_u16()?,
        });
    }
    let attributes = parse_attributes(reader, pool)?;
    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        attributes,
    })
}


#[cfg(test)]
mod tests {
    use super::image::ClassImage;
    use super::*;

    fn hello_image() -> ClassImage {
        let mut image = ClassImage::new();
        // return
        image.method(ACC_STATIC, "main", "([Ljava/lang/String;)V", &[0xB1]);
        image
    }

    #[test]
    fn parses_a_minimal_class() {
        let class = ClassFile::parse(&hello_image().build()).unwrap();
        assert_eq!(class.magic, CLASS_FILE_MAGIC);
        assert_eq!(class.major_version, 52);
        assert_eq!(class.methods.len(), 1);
        let main = &class.methods[0];
        assert_eq!(class.pool.name_by_index(main.name_index).unwrap(), "main");
        let code = main.code().unwrap();
        assert_eq!(code.code, vec![0xB1]);
        assert_eq!(code.max_locals, 8);
        assert!(code.exception_table.is_empty());
    }

    #[test]
    fn finds_the_static_main_entry_point() {
        let class = ClassFile::parse(&hello_image().build()).unwrap();
        let main = class.main_method().unwrap();
        assert_eq!(
            class.pool.name_by_index(main.descriptor_index).unwrap(),
            MAIN_DESCRIPTOR
        );
    }

    #[test]
    fn instance_main_is_not_an_entry_point() {
        let mut image = ClassImage::new();
        image.method(0, "main", "([Ljava/lang/String;)V", &[0xB1]);
        let class = ClassFile::parse(&image.build()).unwrap();
        assert!(class.main_method().is_none());
    }

    #[test]
    fn rejects_a_wrong_magic_word() {
        let mut bytes = hello_image().build();
        bytes[0] = 0xDE;
        let err = ClassFile::parse(&bytes).unwrap_err();
        assert!(matches!(err, ClassError::BadMagic(_)));
        assert!(err.to_string().contains("0xCAFEBABE"));
    }

    #[test]
    fn truncation_is_fatal_with_the_offset() {
        let bytes = hello_image().build();
        let err = ClassFile::parse(&bytes[..bytes.len() - 6]).unwrap_err();
        assert!(matches!(err, ClassError::Truncated(_)));
    }

    #[test]
    fn non_code_attributes_are_kept_raw() {
        let mut image = hello_image();
        let name_index = image.utf8("SourceFile");
        let source_index = image.utf8("Main.java");
        let mut bytes = image.build();
        // Rewrite the class-level attribute list: one SourceFile attribute.
        bytes.truncate(bytes.len() - 2);
        bytes.extend((1u16).to_be_bytes());
        bytes.extend(name_index.to_be_bytes());
        bytes.extend((2u32).to_be_bytes());
        bytes.extend(source_index.to_be_bytes());
        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.attributes.len(), 1);
        assert_eq!(class.attributes[0].name_index, name_index);
        assert!(matches!(
            &class.attributes[0].data,
            AttributeData::Raw(raw) if raw == &source_index.to_be_bytes().to_vec()
        ));
    }
}
