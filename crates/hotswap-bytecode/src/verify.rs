//! Structural class verification
//!
//! Checks what a rewrite can break: opcode validity, jump targets on
//! instruction boundaries, constant pool and local references, consistent
//! stack depth along every path, and that no path runs off the end of a body.

use crate::class::{ClassFile, MethodInfo};
use crate::code::{self, CodeError, Instruction, Operand};
use crate::constants::ConstantPool;
use crate::descriptor::{FieldType, MethodDescriptor};
use crate::encoder::DecodeError;
use crate::opcode::{Opcode, OperandKind};

/// Upper bound on operand stack depth
pub const MAX_STACK_DEPTH: i32 = 1024;

/// Bytecode verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Invalid opcode
    #[error("Invalid opcode {opcode:#x} at offset {offset}")]
    InvalidOpcode {
        /// Offending byte
        opcode: u8,
        /// Byte offset
        offset: usize,
    },

    /// Stack underflow
    #[error("Stack underflow at instruction {0}")]
    StackUnderflow(usize),

    /// Stack overflow
    #[error("Stack overflow at instruction {0} (depth: {1})")]
    StackOverflow(usize, i32),

    /// Two paths reach an instruction with different stack depths
    #[error("Inconsistent stack depth at instruction {index}: {first} vs {second}")]
    StackMismatch {
        /// Instruction index
        index: usize,
        /// Depth recorded first
        first: i32,
        /// Depth on the conflicting path
        second: i32,
    },

    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Absolute target offset
        target: i64,
        /// Offset of the jump
        offset: usize,
    },

    /// Invalid constant pool reference
    #[error("Invalid constant pool reference: index {index} at instruction {at}")]
    InvalidConstantRef {
        /// Pool index
        index: u32,
        /// Instruction index
        at: usize,
    },

    /// Invalid local variable reference
    #[error("Invalid local variable reference: index {index} (max {max}) at instruction {at}")]
    InvalidLocalRef {
        /// Slot
        index: u16,
        /// Declared slot count
        max: u16,
        /// Instruction index
        at: usize,
    },

    /// Declared locals cannot hold the receiver and parameters
    #[error("max_locals {max_locals} is smaller than the {required} parameter slots")]
    InsufficientLocals {
        /// Declared slot count
        max_locals: u16,
        /// Slots taken by receiver and parameters
        required: usize,
    },

    /// Unparseable descriptor on a declaration or member reference
    #[error("Invalid descriptor '{0}'")]
    InvalidDescriptor(String),

    /// Execution falls off end
    #[error("Execution falls off end of method at instruction {0}")]
    FallOffEnd(usize),

    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Error inside a specific method
    #[error("In method {method}: {error}")]
    Method {
        /// Method name and descriptor
        method: String,
        /// Underlying error
        error: Box<VerifyError>,
    },
}

impl From<CodeError> for VerifyError {
    fn from(error: CodeError) -> Self {
        match error {
            CodeError::DecodeError(DecodeError::InvalidOpcode(opcode, offset)) => {
                VerifyError::InvalidOpcode { opcode, offset }
            }
            CodeError::InvalidJumpTarget { offset, target } => {
                VerifyError::InvalidJumpTarget { target, offset }
            }
            other => VerifyError::DecodeError(other.to_string()),
        }
    }
}

/// Verify every method body and declaration of a class
pub fn verify_class(class: &ClassFile) -> Result<(), VerifyError> {
    for field in &class.fields {
        FieldType::parse(&field.descriptor)
            .map_err(|_| VerifyError::InvalidDescriptor(field.descriptor.clone()))?;
    }

    for method in &class.methods {
        verify_method(method, &class.constants).map_err(|error| VerifyError::Method {
            method: format!("{}{}", method.name, method.descriptor),
            error: Box::new(error),
        })?;
    }

    Ok(())
}

/// Verify a single method against the class constant pool
pub fn verify_method(method: &MethodInfo, constants: &ConstantPool) -> Result<(), VerifyError> {
    let descriptor = MethodDescriptor::parse(&method.descriptor)
        .map_err(|_| VerifyError::InvalidDescriptor(method.descriptor.clone()))?;
    let required = descriptor.arity() + usize::from(!method.is_static());
    if usize::from(method.max_locals) < required {
        return Err(VerifyError::InsufficientLocals {
            max_locals: method.max_locals,
            required,
        });
    }

    // Abstract and native declarations have no body
    if method.code.is_empty() {
        return Ok(());
    }

    let instructions = code::decode(&method.code)?;
    verify_constant_refs(&instructions, constants)?;
    verify_local_refs(&instructions, method.max_locals)?;
    verify_stack_depth(&instructions, constants)?;

    Ok(())
}

fn verify_constant_refs(
    instructions: &[Instruction],
    constants: &ConstantPool,
) -> Result<(), VerifyError> {
    for (at, instruction) in instructions.iter().enumerate() {
        let Operand::Index(index) = instruction.operand else {
            continue;
        };
        let valid = match instruction.opcode.operand_kind() {
            OperandKind::StringIndex => constants.get_string(index).is_some(),
            OperandKind::ClassIndex => constants.get_class(index).is_some(),
            OperandKind::MemberIndex => constants.get_member(index).is_some(),
            _ => true,
        };
        if !valid {
            return Err(VerifyError::InvalidConstantRef { index, at });
        }
    }
    Ok(())
}

fn verify_local_refs(instructions: &[Instruction], max_locals: u16) -> Result<(), VerifyError> {
    for (at, instruction) in instructions.iter().enumerate() {
        if let Operand::Local(index) = instruction.operand {
            if index >= max_locals {
                return Err(VerifyError::InvalidLocalRef {
                    index,
                    max: max_locals,
                    at,
                });
            }
        }
    }
    Ok(())
}

fn verify_stack_depth(
    instructions: &[Instruction],
    constants: &ConstantPool,
) -> Result<(), VerifyError> {
    let mut depths: Vec<Option<i32>> = vec![None; instructions.len()];
    let mut worklist = vec![(0usize, 0i32)];

    while let Some((index, depth)) = worklist.pop() {
        let Some(instruction) = instructions.get(index) else {
            return Err(VerifyError::FallOffEnd(index.saturating_sub(1)));
        };

        match depths[index] {
            Some(recorded) if recorded == depth => continue,
            Some(recorded) => {
                return Err(VerifyError::StackMismatch {
                    index,
                    first: recorded,
                    second: depth,
                })
            }
            None => depths[index] = Some(depth),
        }

        let (pops, pushes) = stack_effect(instruction, constants)?;
        if depth < pops {
            return Err(VerifyError::StackUnderflow(index));
        }
        let next = depth - pops + pushes;
        if next > MAX_STACK_DEPTH {
            return Err(VerifyError::StackOverflow(index, next));
        }

        if let Some(target) = instruction.target() {
            worklist.push((target, next));
        }
        if !instruction.opcode.is_terminator() {
            worklist.push((index + 1, next));
        }
    }

    Ok(())
}

/// (pops, pushes) for one instruction
fn stack_effect(
    instruction: &Instruction,
    constants: &ConstantPool,
) -> Result<(i32, i32), VerifyError> {
    use Opcode::*;

    let effect = match instruction.opcode {
        Nop | Jmp | ReturnVoid => (0, 0),
        Pop | StoreLocal | Return | Throw => (1, 0),
        JmpIfFalse | JmpIfTrue | JmpIfNull | JmpIfNotNull => (1, 0),
        Dup => (1, 2),
        Swap => (2, 2),
        ConstNull | ConstTrue | ConstFalse | ConstI32 | ConstI64 | ConstF32 | ConstF64
        | ConstStr | LoadLocal | New => (0, 1),
        Iadd | Isub | Imul | Idiv | Fadd | Fsub | Fmul | Fdiv => (2, 1),
        Eq | Ne | Lt | Gt => (2, 1),
        Ineg | Fneg | Not => (1, 1),
        CheckCast | InstanceOf | NewArray | ArrayLen => (1, 1),
        LoadElem => (2, 1),
        StoreElem => (3, 0),
        GetField => (1, 1),
        PutField => (2, 0),
        GetStatic => (0, 1),
        PutStatic => (1, 0),
        InvokeVirtual | InvokeSpecial | InvokeStatic => {
            let member = instruction
                .index()
                .and_then(|index| constants.get_member(index))
                .ok_or_else(|| {
                    VerifyError::DecodeError(format!(
                        "{} without member reference",
                        instruction.opcode.name()
                    ))
                })?;
            let descriptor = MethodDescriptor::parse(&member.descriptor)
                .map_err(|_| VerifyError::InvalidDescriptor(member.descriptor.clone()))?;
            let receiver = i32::from(instruction.opcode != InvokeStatic);
            (
                descriptor.arity() as i32 + receiver,
                i32::from(!descriptor.returns_void()),
            )
        }
    };
    Ok(effect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::access;
    use crate::encoder::BytecodeWriter;

    fn class_with(code: Vec<u8>, max_locals: u16) -> ClassFile {
        let mut class = ClassFile::new("com.example.Test");
        class.methods.push(MethodInfo::new(
            access::PUBLIC | access::STATIC,
            "run",
            "()V",
            max_locals,
            code,
        ));
        class
    }

    fn unwrap_method_error(result: Result<(), VerifyError>) -> VerifyError {
        match result {
            Err(VerifyError::Method { error, .. }) => *error,
            other => panic!("expected method error, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_empty_class() {
        let class = ClassFile::new("com.example.Empty");
        assert!(verify_class(&class).is_ok());
    }

    #[test]
    fn test_verify_simple_method() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(10);
        writer.emit_const_i32(20);
        writer.emit_iadd();
        writer.emit_pop();
        writer.emit_return_void();

        assert!(verify_class(&class_with(writer.into_bytes(), 0)).is_ok());
    }

    #[test]
    fn test_verify_invalid_opcode() {
        let class = class_with(vec![0xFF], 0);
        assert!(matches!(
            unwrap_method_error(verify_class(&class)),
            VerifyError::InvalidOpcode { opcode: 0xFF, offset: 0 }
        ));
    }

    #[test]
    fn test_verify_stack_underflow() {
        let mut writer = BytecodeWriter::new();
        writer.emit_iadd();
        writer.emit_return_void();

        assert!(matches!(
            unwrap_method_error(verify_class(&class_with(writer.into_bytes(), 0))),
            VerifyError::StackUnderflow(0)
        ));
    }

    #[test]
    fn test_verify_invalid_local_ref() {
        let mut writer = BytecodeWriter::new();
        writer.emit_load_local(5);
        writer.emit_pop();
        writer.emit_return_void();

        assert!(matches!(
            unwrap_method_error(verify_class(&class_with(writer.into_bytes(), 2))),
            VerifyError::InvalidLocalRef { index: 5, max: 2, .. }
        ));
    }

    #[test]
    fn test_verify_invalid_constant_ref() {
        let mut writer = BytecodeWriter::new();
        writer.emit_invoke_static(3);
        writer.emit_return_void();

        assert!(matches!(
            unwrap_method_error(verify_class(&class_with(writer.into_bytes(), 0))),
            VerifyError::InvalidConstantRef { index: 3, at: 0 }
        ));
    }

    #[test]
    fn test_verify_falls_off_end() {
        let mut writer = BytecodeWriter::new();
        writer.emit_nop();

        assert!(matches!(
            unwrap_method_error(verify_class(&class_with(writer.into_bytes(), 0))),
            VerifyError::FallOffEnd(0)
        ));
    }

    #[test]
    fn test_verify_stack_mismatch() {
        let code = code::encode(&[
            Instruction::simple(Opcode::ConstTrue),
            Instruction::jump(Opcode::JmpIfTrue, 3),
            Instruction::simple(Opcode::ConstNull),
            Instruction::simple(Opcode::ReturnVoid),
        ])
        .unwrap();

        assert!(matches!(
            unwrap_method_error(verify_class(&class_with(code, 0))),
            VerifyError::StackMismatch { index: 3, .. }
        ));
    }

    #[test]
    fn test_verify_invoke_arity() {
        let mut class = ClassFile::new("com.example.Test");
        let value_of = class
            .constants
            .intern_member("java.lang.Integer", "valueOf", "(I)Ljava/lang/Integer;");

        let mut writer = BytecodeWriter::new();
        writer.emit_load_local(0);
        writer.emit_invoke_static(value_of);
        writer.emit_return();
        class.methods.push(MethodInfo::new(
            access::STATIC,
            "box",
            "(I)Ljava/lang/Object;",
            1,
            writer.into_bytes(),
        ));
        assert!(verify_class(&class).is_ok());

        let mut writer = BytecodeWriter::new();
        writer.emit_invoke_static(value_of);
        writer.emit_return();
        class.methods[0].code = writer.into_bytes();
        assert!(matches!(
            unwrap_method_error(verify_class(&class)),
            VerifyError::StackUnderflow(0)
        ));
    }

    #[test]
    fn test_verify_insufficient_locals() {
        let mut class = ClassFile::new("com.example.Test");
        class.methods.push(MethodInfo::new(
            access::PUBLIC,
            "resize",
            "(II)V",
            2,
            vec![Opcode::ReturnVoid.to_u8()],
        ));
        assert!(matches!(
            unwrap_method_error(verify_class(&class)),
            VerifyError::InsufficientLocals { required: 3, .. }
        ));
    }
}
