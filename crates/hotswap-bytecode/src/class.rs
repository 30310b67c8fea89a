//! Class file format

use crate::constants::ConstantPool;
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use thiserror::Error;

/// Magic number for hotswap class files: "HSWP"
pub const MAGIC: [u8; 4] = *b"HSWP";

/// Current class file version
pub const VERSION: u32 = 1;

/// Header size in bytes: magic + version + flags + checksum
pub const HEADER_SIZE: usize = 16;

/// Class file encoding/decoding errors
#[derive(Debug, Error)]
pub enum ClassFileError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected HSWP, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Bytes left over after the class body
    #[error("{0} trailing bytes after class body")]
    TrailingBytes(usize),
}

/// Class file flags
pub mod flags {
    /// Class carries source file information
    pub const HAS_SOURCE_FILE: u32 = 1 << 0;
    /// Class was patched to resolve auxiliary types
    pub const RETROFITTED: u32 = 1 << 1;
}

/// Access flags for classes, fields and methods
pub mod access {
    /// Visible everywhere
    pub const PUBLIC: u16 = 0x0001;
    /// Visible only inside the declaring class
    pub const PRIVATE: u16 = 0x0002;
    /// Visible to subclasses
    pub const PROTECTED: u16 = 0x0004;
    /// Belongs to the class rather than an instance
    pub const STATIC: u16 = 0x0008;
    /// Cannot be overridden or reassigned
    pub const FINAL: u16 = 0x0010;
    /// Has no body
    pub const ABSTRACT: u16 = 0x0400;
    /// Generated, not present in source
    pub const SYNTHETIC: u16 = 0x1000;

    /// All visibility bits
    pub const VISIBILITY: u16 = PUBLIC | PRIVATE | PROTECTED;

    /// Widen `current` by `granted`
    ///
    /// PRIVATE and FINAL are cleared and the granted bits are set. Granting
    /// PUBLIC also drops PROTECTED so the result carries one visibility.
    pub fn widen_visibility(current: u16, granted: u16) -> u16 {
        let mut flags = (current & !(PRIVATE | FINAL)) | granted;
        if flags & PUBLIC != 0 {
            flags &= !PROTECTED;
        }
        flags
    }
}

/// Field declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Access flags
    pub access: u16,
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
}

impl FieldInfo {
    /// Create a new field declaration
    pub fn new(access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Check for the STATIC flag
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Check for the FINAL flag
    pub fn is_final(&self) -> bool {
        self.access & access::FINAL != 0
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.access);
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let access = reader.read_u16()?;
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;
        Ok(Self {
            access,
            name,
            descriptor,
        })
    }
}

/// Method declaration with its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Access flags
    pub access: u16,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Number of local variable slots, including the receiver and parameters
    pub max_locals: u16,
    /// Encoded instructions
    pub code: Vec<u8>,
}

impl MethodInfo {
    /// Create a new method declaration
    pub fn new(
        access: u16,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        max_locals: u16,
        code: Vec<u8>,
    ) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            max_locals,
            code,
        }
    }

    /// Check for the STATIC flag
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Check for the FINAL flag
    pub fn is_final(&self) -> bool {
        self.access & access::FINAL != 0
    }

    /// Check for the ABSTRACT flag
    pub fn is_abstract(&self) -> bool {
        self.access & access::ABSTRACT != 0
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.access);
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor);
        writer.emit_u16(self.max_locals);
        writer.emit_u32(self.code.len() as u32);
        writer.emit_bytes(&self.code);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let access = reader.read_u16()?;
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;
        Ok(Self {
            access,
            name,
            descriptor,
            max_locals,
            code,
        })
    }
}

/// A single type definition
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    /// Magic number (must be "HSWP")
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Class file flags (see [`flags`])
    pub flags: u32,
    /// Class access flags
    pub access: u16,
    /// Qualified name, dotted
    pub name: String,
    /// Superclass name; `None` only for the root of the hierarchy
    pub super_name: Option<String>,
    /// Implemented interfaces
    pub interfaces: Vec<String>,
    /// Constant pool
    pub constants: ConstantPool,
    /// Field declarations
    pub fields: Vec<FieldInfo>,
    /// Method declarations
    pub methods: Vec<MethodInfo>,
    /// Source file name
    pub source_file: Option<String>,
}

impl ClassFile {
    /// Create a new empty public class extending `java.lang.Object`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            access: access::PUBLIC,
            name: name.into(),
            super_name: Some("java.lang.Object".to_string()),
            interfaces: Vec::new(),
            constants: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    // ===== Lookup =====

    /// Find a method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Find a method by name and descriptor, mutably
    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut MethodInfo> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// All overloads with the given name
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodInfo> + 'a {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a field by name, mutably
    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldInfo> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Check for the FINAL flag on the class itself
    pub fn is_final(&self) -> bool {
        self.access & access::FINAL != 0
    }

    /// Check a class file flag
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    // ===== Encoding =====

    /// Encode the class to binary format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
    /// - Access, name, optional super name, interfaces
    /// - Constant pool
    /// - Field table
    /// - Method table
    /// - Source file (if flags indicate)
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        let mut flags = self.flags & !flags::HAS_SOURCE_FILE;
        if self.source_file.is_some() {
            flags |= flags::HAS_SOURCE_FILE;
        }

        writer.emit_bytes(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0); // Placeholder for checksum

        writer.emit_u16(self.access);
        writer.emit_string(&self.name);
        match &self.super_name {
            Some(super_name) => {
                writer.emit_u8(1);
                writer.emit_string(super_name);
            }
            None => writer.emit_u8(0),
        }
        writer.emit_u32(self.interfaces.len() as u32);
        for interface in &self.interfaces {
            writer.emit_string(interface);
        }

        self.constants.encode(&mut writer);

        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(&mut writer);
        }

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        if let Some(source_file) = &self.source_file {
            writer.emit_string(source_file);
        }

        // CRC32 of everything after the header
        let checksum = crc32fast::hash(&writer.buffer()[HEADER_SIZE..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a class from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = BytecodeReader::new(data);

        let magic = reader.read_bytes(4)?;
        let magic = [magic[0], magic[1], magic[2], magic[3]];
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ClassFileError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let calculated_checksum = crc32fast::hash(&data[HEADER_SIZE..]);
        if stored_checksum != calculated_checksum {
            return Err(ClassFileError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let access = reader.read_u16()?;
        let name = reader.read_string()?;
        let super_name = if reader.read_u8()? != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };
        let interface_count = reader.read_u32()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count.min(reader.remaining()));
        for _ in 0..interface_count {
            interfaces.push(reader.read_string()?);
        }

        let constants = ConstantPool::decode(&mut reader)?;

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count.min(reader.remaining()));
        for _ in 0..field_count {
            fields.push(FieldInfo::decode(&mut reader)?);
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(reader.remaining()));
        for _ in 0..method_count {
            methods.push(MethodInfo::decode(&mut reader)?);
        }

        let source_file = if flags & flags::HAS_SOURCE_FILE != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };

        if reader.has_more() {
            return Err(ClassFileError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            magic,
            version,
            flags,
            access,
            name,
            super_name,
            interfaces,
            constants,
            fields,
            methods,
            source_file,
        })
    }

    /// Read only the qualified name from an encoded class
    ///
    /// Skips checksum validation; useful for naming dumps of damaged binaries.
    pub fn peek_name(data: &[u8]) -> Option<String> {
        let mut reader = BytecodeReader::new(data);
        reader.seek(HEADER_SIZE + 2);
        if data.len() < HEADER_SIZE || data[..4] != MAGIC {
            return None;
        }
        reader.read_string().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BytecodeWriter;

    fn sample_class() -> ClassFile {
        let mut class = ClassFile::new("com.example.Widget");
        class.fields.push(FieldInfo::new(access::PRIVATE, "size", "I"));
        let size = class.constants.intern_member("com.example.Widget", "size", "I");

        let mut code = BytecodeWriter::new();
        code.emit_load_local(0);
        code.emit_get_field(size);
        code.emit_return();
        class.methods.push(MethodInfo::new(
            access::PUBLIC | access::FINAL,
            "size",
            "()I",
            1,
            code.into_bytes(),
        ));
        class
    }

    #[test]
    fn test_class_creation() {
        let class = ClassFile::new("com.example.Empty");
        assert_eq!(class.magic, MAGIC);
        assert_eq!(class.version, VERSION);
        assert_eq!(class.super_name.as_deref(), Some("java.lang.Object"));
        assert!(!class.is_final());
    }

    #[test]
    fn test_encode_decode() {
        let mut class = sample_class();
        class.source_file = Some("Widget.java".to_string());
        class.interfaces.push("java.io.Serializable".to_string());

        let bytes = class.encode();
        let decoded = ClassFile::decode(&bytes).unwrap();

        assert!(decoded.has_flag(flags::HAS_SOURCE_FILE));
        assert_eq!(decoded.name, class.name);
        assert_eq!(decoded.methods, class.methods);
        assert_eq!(decoded.fields, class.fields);
        assert_eq!(decoded.source_file.as_deref(), Some("Widget.java"));
        assert_eq!(decoded.interfaces, vec!["java.io.Serializable".to_string()]);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample_class().encode();
        bytes[0] = b'X';
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = sample_class().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = sample_class().encode();
        assert!(ClassFile::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_lookup_helpers() {
        let class = sample_class();
        assert!(class.method("size", "()I").is_some());
        assert!(class.method("size", "()J").is_none());
        assert_eq!(class.methods_named("size").count(), 1);
        assert!(class.method("size", "()I").unwrap().is_final());
        assert!(!class.field("size").unwrap().is_static());
    }

    #[test]
    fn test_peek_name() {
        let bytes = sample_class().encode();
        assert_eq!(ClassFile::peek_name(&bytes).as_deref(), Some("com.example.Widget"));
        assert_eq!(ClassFile::peek_name(b"junk"), None);
    }

    #[test]
    fn test_widen_visibility() {
        let widened = access::widen_visibility(access::PRIVATE | access::FINAL, access::PUBLIC);
        assert_eq!(widened, access::PUBLIC);

        let widened = access::widen_visibility(access::PROTECTED | access::STATIC, access::PUBLIC);
        assert_eq!(widened, access::PUBLIC | access::STATIC);

        let widened = access::widen_visibility(access::PRIVATE, access::PROTECTED);
        assert_eq!(widened, access::PROTECTED);
    }
}
