//! Bytecode opcodes for hotswap class files
//!
//! This module defines the stack-machine instruction set stored in method
//! bodies. Member and class operands are constant pool indices, so the
//! rewriting layer can redirect a call or field access by interning a new
//! reference and patching a single operand.

/// Bytecode opcode enumeration
///
/// All opcodes are single-byte instructions. Some opcodes take one operand
/// that follows the opcode byte in the bytecode stream (see [`OperandKind`]).
///
/// Opcodes are organized into categories:
/// - 0x00-0x0F: Stack manipulation & constants
/// - 0x10-0x1F: Local variables
/// - 0x20-0x2F: Integer arithmetic
/// - 0x30-0x3F: Float arithmetic
/// - 0x50-0x5F: Comparison
/// - 0x90-0x9F: Control flow
/// - 0xA0-0xAF: Invocation & return
/// - 0xB0-0xBF: Object operations
/// - 0xC0-0xCF: Array operations
/// - 0xE0-0xEF: Error handling
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Swap top two stack values
    Swap = 0x03,
    /// Push null reference
    ConstNull = 0x04,
    /// Push boolean true
    ConstTrue = 0x05,
    /// Push boolean false
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push 64-bit float constant (operand: f64)
    ConstF64 = 0x08,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x09,
    /// Push 64-bit integer constant (operand: i64)
    ConstI64 = 0x0B,
    /// Push 32-bit float constant (operand: f32)
    ConstF32 = 0x0C,

    // ===== Local Variables (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 index)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 index)
    StoreLocal = 0x11,

    // ===== Integer Arithmetic (0x20-0x2F) =====
    /// Integer addition: pop b, pop a, push a + b
    Iadd = 0x20,
    /// Integer subtraction: pop b, pop a, push a - b
    Isub = 0x21,
    /// Integer multiplication: pop b, pop a, push a * b
    Imul = 0x22,
    /// Integer division: pop b, pop a, push a / b
    Idiv = 0x23,
    /// Integer negation: pop a, push -a
    Ineg = 0x25,

    // ===== Float Arithmetic (0x30-0x3F) =====
    /// Float addition: pop b, pop a, push a + b
    Fadd = 0x30,
    /// Float subtraction: pop b, pop a, push a - b
    Fsub = 0x31,
    /// Float multiplication: pop b, pop a, push a * b
    Fmul = 0x32,
    /// Float division: pop b, pop a, push a / b
    Fdiv = 0x33,
    /// Float negation: pop a, push -a
    Fneg = 0x34,

    // ===== Comparison (0x50-0x5F) =====
    /// Equality: pop b, pop a, push a == b
    Eq = 0x50,
    /// Inequality: pop b, pop a, push a != b
    Ne = 0x51,
    /// Less than: pop b, pop a, push a < b
    Lt = 0x52,
    /// Greater than: pop b, pop a, push a > b
    Gt = 0x54,
    /// Logical NOT: pop a, push !a
    Not = 0x5A,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: i32 offset)
    Jmp = 0x90,
    /// Jump if false: pop a, if !a jump (operand: i32 offset)
    JmpIfFalse = 0x91,
    /// Jump if true: pop a, if a jump (operand: i32 offset)
    JmpIfTrue = 0x92,
    /// Jump if null: pop a, if a == null jump (operand: i32 offset)
    JmpIfNull = 0x93,
    /// Jump if not null: pop a, if a != null jump (operand: i32 offset)
    JmpIfNotNull = 0x94,

    // ===== Invocation & Return (0xA0-0xAF) =====
    /// Virtual dispatch: pop args, pop receiver (operand: u32 member index)
    InvokeVirtual = 0xA0,
    /// Non-virtual instance call (constructors, super calls) (operand: u32 member index)
    InvokeSpecial = 0xA1,
    /// Return from method (pop return value)
    Return = 0xA2,
    /// Return from void method
    ReturnVoid = 0xA3,
    /// Static call: pop args (operand: u32 member index)
    InvokeStatic = 0xA6,

    // ===== Object Operations (0xB0-0xBF) =====
    /// Allocate new object (operand: u32 class index)
    New = 0xB0,
    /// Load instance field: pop object, push value (operand: u32 member index)
    GetField = 0xB1,
    /// Store instance field: pop value, pop object (operand: u32 member index)
    PutField = 0xB2,
    /// Load static field (operand: u32 member index)
    GetStatic = 0xB8,
    /// Store static field (operand: u32 member index)
    PutStatic = 0xB9,
    /// Checked reference cast: pop ref, push ref (operand: u32 class index)
    CheckCast = 0xBA,
    /// Type test: pop ref, push boolean (operand: u32 class index)
    InstanceOf = 0xBB,

    // ===== Array Operations (0xC0-0xCF) =====
    /// Create new array: pop length (operand: u32 class index of element type)
    NewArray = 0xC0,
    /// Load array element: pop index, pop array, push element
    LoadElem = 0xC1,
    /// Store array element: pop value, pop index, pop array
    StoreElem = 0xC2,
    /// Get array length: pop array, push length
    ArrayLen = 0xC3,

    // ===== Error Handling (0xE0-0xEF) =====
    /// Throw exception: pop error value
    Throw = 0xE3,
}

/// Shape of the operand that follows an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand
    None,
    /// Immediate i32
    I32,
    /// Immediate i64
    I64,
    /// Immediate f32
    F32,
    /// Immediate f64
    F64,
    /// u32 index into the string constants
    StringIndex,
    /// u32 index into the class constants
    ClassIndex,
    /// u32 index into the member reference constants
    MemberIndex,
    /// u16 local variable slot
    Local,
    /// i32 branch offset, relative to the end of the instruction
    Jump,
}

impl OperandKind {
    /// Encoded size of the operand in bytes
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Local => 2,
            Self::I32 | Self::F32 | Self::StringIndex | Self::ClassIndex | Self::MemberIndex => 4,
            Self::Jump => 4,
            Self::I64 | Self::F64 => 8,
        }
    }
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            // Stack manipulation & constants
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x03 => Some(Self::Swap),
            0x04 => Some(Self::ConstNull),
            0x05 => Some(Self::ConstTrue),
            0x06 => Some(Self::ConstFalse),
            0x07 => Some(Self::ConstI32),
            0x08 => Some(Self::ConstF64),
            0x09 => Some(Self::ConstStr),
            0x0B => Some(Self::ConstI64),
            0x0C => Some(Self::ConstF32),

            // Local variables
            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),

            // Integer arithmetic
            0x20 => Some(Self::Iadd),
            0x21 => Some(Self::Isub),
            0x22 => Some(Self::Imul),
            0x23 => Some(Self::Idiv),
            0x25 => Some(Self::Ineg),

            // Float arithmetic
            0x30 => Some(Self::Fadd),
            0x31 => Some(Self::Fsub),
            0x32 => Some(Self::Fmul),
            0x33 => Some(Self::Fdiv),
            0x34 => Some(Self::Fneg),

            // Comparison
            0x50 => Some(Self::Eq),
            0x51 => Some(Self::Ne),
            0x52 => Some(Self::Lt),
            0x54 => Some(Self::Gt),
            0x5A => Some(Self::Not),

            // Control flow
            0x90 => Some(Self::Jmp),
            0x91 => Some(Self::JmpIfFalse),
            0x92 => Some(Self::JmpIfTrue),
            0x93 => Some(Self::JmpIfNull),
            0x94 => Some(Self::JmpIfNotNull),

            // Invocation & return
            0xA0 => Some(Self::InvokeVirtual),
            0xA1 => Some(Self::InvokeSpecial),
            0xA2 => Some(Self::Return),
            0xA3 => Some(Self::ReturnVoid),
            0xA6 => Some(Self::InvokeStatic),

            // Object operations
            0xB0 => Some(Self::New),
            0xB1 => Some(Self::GetField),
            0xB2 => Some(Self::PutField),
            0xB8 => Some(Self::GetStatic),
            0xB9 => Some(Self::PutStatic),
            0xBA => Some(Self::CheckCast),
            0xBB => Some(Self::InstanceOf),

            // Array operations
            0xC0 => Some(Self::NewArray),
            0xC1 => Some(Self::LoadElem),
            0xC2 => Some(Self::StoreElem),
            0xC3 => Some(Self::ArrayLen),

            // Error handling
            0xE3 => Some(Self::Throw),

            // Invalid opcodes
            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Swap => "SWAP",
            Self::ConstNull => "CONST_NULL",
            Self::ConstTrue => "CONST_TRUE",
            Self::ConstFalse => "CONST_FALSE",
            Self::ConstI32 => "CONST_I32",
            Self::ConstF64 => "CONST_F64",
            Self::ConstStr => "CONST_STR",
            Self::ConstI64 => "CONST_I64",
            Self::ConstF32 => "CONST_F32",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::Iadd => "IADD",
            Self::Isub => "ISUB",
            Self::Imul => "IMUL",
            Self::Idiv => "IDIV",
            Self::Ineg => "INEG",
            Self::Fadd => "FADD",
            Self::Fsub => "FSUB",
            Self::Fmul => "FMUL",
            Self::Fdiv => "FDIV",
            Self::Fneg => "FNEG",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Lt => "LT",
            Self::Gt => "GT",
            Self::Not => "NOT",
            Self::Jmp => "JMP",
            Self::JmpIfFalse => "JMP_IF_FALSE",
            Self::JmpIfTrue => "JMP_IF_TRUE",
            Self::JmpIfNull => "JMP_IF_NULL",
            Self::JmpIfNotNull => "JMP_IF_NOT_NULL",
            Self::InvokeVirtual => "INVOKE_VIRTUAL",
            Self::InvokeSpecial => "INVOKE_SPECIAL",
            Self::Return => "RETURN",
            Self::ReturnVoid => "RETURN_VOID",
            Self::InvokeStatic => "INVOKE_STATIC",
            Self::New => "NEW",
            Self::GetField => "GET_FIELD",
            Self::PutField => "PUT_FIELD",
            Self::GetStatic => "GET_STATIC",
            Self::PutStatic => "PUT_STATIC",
            Self::CheckCast => "CHECK_CAST",
            Self::InstanceOf => "INSTANCE_OF",
            Self::NewArray => "NEW_ARRAY",
            Self::LoadElem => "LOAD_ELEM",
            Self::StoreElem => "STORE_ELEM",
            Self::ArrayLen => "ARRAY_LEN",
            Self::Throw => "THROW",
        }
    }

    /// Operand layout for this opcode
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Self::ConstI32 => OperandKind::I32,
            Self::ConstI64 => OperandKind::I64,
            Self::ConstF32 => OperandKind::F32,
            Self::ConstF64 => OperandKind::F64,
            Self::ConstStr => OperandKind::StringIndex,
            Self::LoadLocal | Self::StoreLocal => OperandKind::Local,
            Self::Jmp
            | Self::JmpIfFalse
            | Self::JmpIfTrue
            | Self::JmpIfNull
            | Self::JmpIfNotNull => OperandKind::Jump,
            Self::InvokeVirtual
            | Self::InvokeSpecial
            | Self::InvokeStatic
            | Self::GetField
            | Self::PutField
            | Self::GetStatic
            | Self::PutStatic => OperandKind::MemberIndex,
            Self::New | Self::CheckCast | Self::InstanceOf | Self::NewArray => {
                OperandKind::ClassIndex
            }
            _ => OperandKind::None,
        }
    }

    /// Encoded size of the instruction (opcode byte plus operand)
    pub fn encoded_size(self) -> usize {
        1 + self.operand_kind().size()
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        self.operand_kind() == OperandKind::Jump
    }

    /// Check if this opcode is an invocation
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Self::InvokeVirtual | Self::InvokeSpecial | Self::InvokeStatic
        )
    }

    /// Check if this opcode reads or writes a field
    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            Self::GetField | Self::PutField | Self::GetStatic | Self::PutStatic
        )
    }

    /// Check if this opcode is a return instruction
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::ReturnVoid)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Jmp | Self::Throw) || self.is_return()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=u8::MAX {
            if let Some(opcode) = Opcode::from_u8(byte) {
                assert_eq!(opcode.to_u8(), byte, "Failed roundtrip for {:?}", opcode);
            }
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0x0A), None);
        assert_eq!(Opcode::from_u8(0xFE), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::Nop.name(), "NOP");
        assert_eq!(Opcode::InvokeStatic.name(), "INVOKE_STATIC");
        assert_eq!(Opcode::CheckCast.name(), "CHECK_CAST");
        assert_eq!(Opcode::Return.name(), "RETURN");
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(Opcode::Nop.encoded_size(), 1);
        assert_eq!(Opcode::LoadLocal.encoded_size(), 3);
        assert_eq!(Opcode::InvokeVirtual.encoded_size(), 5);
        assert_eq!(Opcode::JmpIfNull.encoded_size(), 5);
        assert_eq!(Opcode::ConstI64.encoded_size(), 9);
        assert_eq!(Opcode::ConstF32.encoded_size(), 5);
    }

    #[test]
    fn test_jump_detection() {
        assert!(Opcode::Jmp.is_jump());
        assert!(Opcode::JmpIfFalse.is_jump());
        assert!(Opcode::JmpIfNotNull.is_jump());
        assert!(!Opcode::InvokeStatic.is_jump());
        assert!(!Opcode::Return.is_jump());
    }

    #[test]
    fn test_terminator_detection() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::ReturnVoid.is_terminator());
        assert!(Opcode::Jmp.is_terminator());
        assert!(Opcode::Throw.is_terminator());
        assert!(!Opcode::JmpIfFalse.is_terminator());
        assert!(!Opcode::InvokeStatic.is_terminator());
    }

    #[test]
    fn test_member_operands() {
        for op in [
            Opcode::InvokeVirtual,
            Opcode::InvokeSpecial,
            Opcode::InvokeStatic,
            Opcode::GetField,
            Opcode::PutStatic,
        ] {
            assert_eq!(op.operand_kind(), OperandKind::MemberIndex);
        }
        assert_eq!(Opcode::CheckCast.operand_kind(), OperandKind::ClassIndex);
    }
}
