//! Positioned big-endian reads over the raw bytes of a class file.
use byteorder::{BigEndian, ReadBytesExt};

use std::fmt;
use std::io::{Cursor, Read};

/// `ReadError` signals a truncated class file; the offset points at the
/// first byte that could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadError {
    offset: u64,
}

impl ReadError {
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unexpected end of class file at offset {}", self.offset)
    }
}

impl std::error::Error for ReadError {}

/// `ClassReader` wraps the class file bytes with a cursor and exposes the
/// big-endian primitive reads the binary format is built from.
#[derive(Debug)]
pub struct ClassReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ClassReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    /// Current byte offset into the class file, used for error reporting.
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        let offset = self.position();
        self.cursor.read_u8().map_err(|_| ReadError { offset })
    }

    pub fn read_u16(&mut self) -> Result<u16, ReadError> {
        let offset = self.position();
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| ReadError { offset })
    }

    pub fn read_u32(&mut self) -> Result<u32, ReadError> {
        let offset = self.position();
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|_| ReadError { offset })
    }

    pub fn read_u64(&mut self) -> Result<u64, ReadError> {
        let offset = self.position();
        self.cursor
            .read_u64::<BigEndian>()
            .map_err(|_| ReadError { offset })
    }

    /// Reads a raw byte slice of length `n`, e.g. Utf8 payloads and method
    /// bytecode.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        let offset = self.position();
        let mut buf = vec![0u8; n];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| ReadError { offset })?;
        Ok(buf)
    }

    /// True once every byte of the underlying slice has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.position() >= self.cursor.get_ref().len() as u64
    }
}
