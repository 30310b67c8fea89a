//! Hotswap class file format
//!
//! This crate provides the binary type-description format the hotswap engine
//! rewrites: the class file container, its constant pool, the stack-machine
//! instruction set, an index-addressed code editor and a structural verifier.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod code;
pub mod constants;
pub mod descriptor;
pub mod encoder;
pub mod opcode;
pub mod verify;

pub use class::{access, flags, ClassFile, ClassFileError, FieldInfo, MethodInfo};
pub use code::{CodeEditor, CodeError, Instruction, Operand};
pub use constants::{ConstantPool, MemberRef};
pub use descriptor::{DescriptorError, FieldType, MethodDescriptor};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use opcode::{Opcode, OperandKind};
pub use verify::{verify_class, verify_method, VerifyError};
