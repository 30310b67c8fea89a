//! Constant pool for class files

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use std::fmt;

/// Symbolic reference to a field or method
///
/// `owner` is the dotted qualified name of the declaring type and
/// `descriptor` the member's type descriptor (`I`, `(I)V`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Declaring type
    pub owner: String,
    /// Member name
    pub name: String,
    /// Member descriptor
    pub descriptor: String,
}

impl MemberRef {
    /// Create a new member reference
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Constant pool containing literal values and symbolic references
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    /// String constants
    pub strings: Vec<String>,
    /// Integer constants
    pub integers: Vec<i32>,
    /// Long constants
    pub longs: Vec<i64>,
    /// Float constants
    pub floats: Vec<f32>,
    /// Double constants
    pub doubles: Vec<f64>,
    /// Class names (dotted)
    pub classes: Vec<String>,
    /// Field and method references
    pub members: Vec<MemberRef>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string constant and return its index
    pub fn add_string(&mut self, s: String) -> u32 {
        let index = self.strings.len();
        self.strings.push(s);
        index as u32
    }

    /// Add an integer constant and return its index
    pub fn add_integer(&mut self, i: i32) -> u32 {
        let index = self.integers.len();
        self.integers.push(i);
        index as u32
    }

    /// Add a long constant and return its index
    pub fn add_long(&mut self, l: i64) -> u32 {
        let index = self.longs.len();
        self.longs.push(l);
        index as u32
    }

    /// Add a float constant and return its index
    pub fn add_float(&mut self, f: f32) -> u32 {
        let index = self.floats.len();
        self.floats.push(f);
        index as u32
    }

    /// Add a double constant and return its index
    pub fn add_double(&mut self, d: f64) -> u32 {
        let index = self.doubles.len();
        self.doubles.push(d);
        index as u32
    }

    /// Add a class name and return its index
    pub fn add_class(&mut self, name: String) -> u32 {
        let index = self.classes.len();
        self.classes.push(name);
        index as u32
    }

    /// Add a member reference and return its index
    pub fn add_member(&mut self, member: MemberRef) -> u32 {
        let index = self.members.len();
        self.members.push(member);
        index as u32
    }

    // ===== Interning =====

    /// Return the index of an equal string, adding it if absent
    pub fn intern_string(&mut self, s: &str) -> u32 {
        match self.strings.iter().position(|existing| existing == s) {
            Some(index) => index as u32,
            None => self.add_string(s.to_string()),
        }
    }

    /// Return the index of an equal class name, adding it if absent
    pub fn intern_class(&mut self, name: &str) -> u32 {
        match self.classes.iter().position(|existing| existing == name) {
            Some(index) => index as u32,
            None => self.add_class(name.to_string()),
        }
    }

    /// Return the index of an equal member reference, adding it if absent
    pub fn intern_member(&mut self, owner: &str, name: &str, descriptor: &str) -> u32 {
        let found = self.members.iter().position(|m| {
            m.owner == owner && m.name == name && m.descriptor == descriptor
        });
        match found {
            Some(index) => index as u32,
            None => self.add_member(MemberRef::new(owner, name, descriptor)),
        }
    }

    // ===== Lookup =====

    /// Get a string constant by index
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    /// Get an integer constant by index
    pub fn get_integer(&self, index: u32) -> Option<i32> {
        self.integers.get(index as usize).copied()
    }

    /// Get a long constant by index
    pub fn get_long(&self, index: u32) -> Option<i64> {
        self.longs.get(index as usize).copied()
    }

    /// Get a float constant by index
    pub fn get_float(&self, index: u32) -> Option<f32> {
        self.floats.get(index as usize).copied()
    }

    /// Get a double constant by index
    pub fn get_double(&self, index: u32) -> Option<f64> {
        self.doubles.get(index as usize).copied()
    }

    /// Get a class name by index
    pub fn get_class(&self, index: u32) -> Option<&str> {
        self.classes.get(index as usize).map(|s| s.as_str())
    }

    /// Get a member reference by index
    pub fn get_member(&self, index: u32) -> Option<&MemberRef> {
        self.members.get(index as usize)
    }

    /// Encode the constant pool to binary format
    ///
    /// Each section is a u32 count followed by its entries, in the order
    /// strings, integers, longs, floats, doubles, classes, members. Strings
    /// and class names are length-prefixed UTF-8; a member is three strings
    /// (owner, name, descriptor).
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }

        writer.emit_u32(self.integers.len() as u32);
        for &i in &self.integers {
            writer.emit_i32(i);
        }

        writer.emit_u32(self.longs.len() as u32);
        for &l in &self.longs {
            writer.emit_i64(l);
        }

        writer.emit_u32(self.floats.len() as u32);
        for &f in &self.floats {
            writer.emit_f32(f);
        }

        writer.emit_u32(self.doubles.len() as u32);
        for &d in &self.doubles {
            writer.emit_f64(d);
        }

        writer.emit_u32(self.classes.len() as u32);
        for c in &self.classes {
            writer.emit_string(c);
        }

        writer.emit_u32(self.members.len() as u32);
        for m in &self.members {
            writer.emit_string(&m.owner);
            writer.emit_string(&m.name);
            writer.emit_string(&m.descriptor);
        }
    }

    /// Decode the constant pool from binary format
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let mut pool = ConstantPool::new();

        let count = reader.read_u32()? as usize;
        pool.strings.reserve(count.min(reader.remaining()));
        for _ in 0..count {
            pool.strings.push(reader.read_string()?);
        }

        let count = reader.read_u32()? as usize;
        for _ in 0..count {
            pool.integers.push(reader.read_i32()?);
        }

        let count = reader.read_u32()? as usize;
        for _ in 0..count {
            pool.longs.push(reader.read_i64()?);
        }

        let count = reader.read_u32()? as usize;
        for _ in 0..count {
            pool.floats.push(reader.read_f32()?);
        }

        let count = reader.read_u32()? as usize;
        for _ in 0..count {
            pool.doubles.push(reader.read_f64()?);
        }

        let count = reader.read_u32()? as usize;
        for _ in 0..count {
            pool.classes.push(reader.read_string()?);
        }

        let count = reader.read_u32()? as usize;
        for _ in 0..count {
            let owner = reader.read_string()?;
            let name = reader.read_string()?;
            let descriptor = reader.read_string()?;
            pool.members.push(MemberRef {
                owner,
                name,
                descriptor,
            });
        }

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pool() {
        let mut pool = ConstantPool::new();

        let str_idx = pool.add_string("hello".to_string());
        let int_idx = pool.add_integer(42);
        let long_idx = pool.add_long(-9_000_000_000);
        let class_idx = pool.add_class("com.example.Widget".to_string());

        assert_eq!(pool.get_string(str_idx), Some("hello"));
        assert_eq!(pool.get_integer(int_idx), Some(42));
        assert_eq!(pool.get_long(long_idx), Some(-9_000_000_000));
        assert_eq!(pool.get_class(class_idx), Some("com.example.Widget"));
        assert_eq!(pool.get_string(99), None);
    }

    #[test]
    fn test_interning_deduplicates() {
        let mut pool = ConstantPool::new();

        let a = pool.intern_member("com.example.Widget", "size", "()I");
        let b = pool.intern_member("com.example.Widget", "size", "()I");
        let c = pool.intern_member("com.example.Widget", "size", "()J");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.members.len(), 2);

        let s1 = pool.intern_string("name");
        let s2 = pool.intern_string("name");
        assert_eq!(s1, s2);
        assert_eq!(pool.intern_class("java.lang.Number"), 0);
        assert_eq!(pool.intern_class("java.lang.Number"), 0);
    }

    #[test]
    fn test_encode_decode() {
        let mut pool = ConstantPool::new();
        pool.add_string("label".to_string());
        pool.add_integer(-7);
        pool.add_long(1 << 40);
        pool.add_float(2.5);
        pool.add_double(0.125);
        pool.add_class("java.lang.Integer".to_string());
        pool.add_member(MemberRef::new("java.lang.Integer", "valueOf", "(I)Ljava/lang/Integer;"));

        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);

        let mut reader = BytecodeReader::new(writer.buffer());
        let decoded = ConstantPool::decode(&mut reader).unwrap();
        assert_eq!(decoded, pool);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_member_display() {
        let member = MemberRef::new("com.example.Widget", "resize", "(II)V");
        assert_eq!(member.to_string(), "com.example.Widget.resize(II)V");
    }
}
