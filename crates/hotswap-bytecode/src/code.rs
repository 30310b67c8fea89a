//! Index-addressed view of method bodies
//!
//! Encoded code stores branch targets as byte offsets relative to the end of
//! the jump instruction. Splicing instructions into such a stream shifts every
//! later offset, so editing happens on a decoded list where a jump names the
//! *index* of its target instruction. Offsets are recomputed on encode.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::opcode::{Opcode, OperandKind};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Code editing errors
#[derive(Debug, Error)]
pub enum CodeError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// A jump lands outside the code or inside another instruction
    #[error("Jump at offset {offset} targets {target}, which is not an instruction boundary")]
    InvalidJumpTarget {
        /// Offset of the jump instruction
        offset: usize,
        /// Absolute target offset
        target: i64,
    },

    /// A symbolic jump names an instruction index past the end
    #[error("Instruction {index} jumps to index {target}, past the end of the code")]
    TargetOutOfRange {
        /// Index of the jump instruction
        index: usize,
        /// Target index
        target: usize,
    },

    /// Operand does not fit the opcode
    #[error("Instruction {index}: operand does not match {opcode}")]
    OperandMismatch {
        /// Index of the instruction
        index: usize,
        /// Opcode name
        opcode: &'static str,
    },
}

/// Decoded operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Immediate i32
    I32(i32),
    /// Immediate i64
    I64(i64),
    /// Immediate f32
    F32(f32),
    /// Immediate f64
    F64(f64),
    /// Constant pool index (string, class or member, per opcode)
    Index(u32),
    /// Local variable slot
    Local(u16),
    /// Jump target, as an instruction index
    Target(usize),
}

/// A single decoded instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    /// Opcode
    pub opcode: Opcode,
    /// Operand
    pub operand: Operand,
}

impl Instruction {
    /// Instruction without operand
    pub fn simple(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: Operand::None,
        }
    }

    /// Instruction with a constant pool index operand
    pub fn indexed(opcode: Opcode, index: u32) -> Self {
        Self {
            opcode,
            operand: Operand::Index(index),
        }
    }

    /// LOAD_LOCAL instruction
    pub fn load_local(slot: u16) -> Self {
        Self {
            opcode: Opcode::LoadLocal,
            operand: Operand::Local(slot),
        }
    }

    /// STORE_LOCAL instruction
    pub fn store_local(slot: u16) -> Self {
        Self {
            opcode: Opcode::StoreLocal,
            operand: Operand::Local(slot),
        }
    }

    /// Jump instruction targeting an instruction index
    pub fn jump(opcode: Opcode, target: usize) -> Self {
        Self {
            opcode,
            operand: Operand::Target(target),
        }
    }

    /// Constant pool index, when the operand is one
    pub fn index(&self) -> Option<u32> {
        match self.operand {
            Operand::Index(index) => Some(index),
            _ => None,
        }
    }

    /// Jump target, when the operand is one
    pub fn target(&self) -> Option<usize> {
        match self.operand {
            Operand::Target(target) => Some(target),
            _ => None,
        }
    }

    fn operand_fits(&self) -> bool {
        matches!(
            (self.opcode.operand_kind(), self.operand),
            (OperandKind::None, Operand::None)
                | (OperandKind::I32, Operand::I32(_))
                | (OperandKind::I64, Operand::I64(_))
                | (OperandKind::F32, Operand::F32(_))
                | (OperandKind::F64, Operand::F64(_))
                | (OperandKind::StringIndex, Operand::Index(_))
                | (OperandKind::ClassIndex, Operand::Index(_))
                | (OperandKind::MemberIndex, Operand::Index(_))
                | (OperandKind::Local, Operand::Local(_))
                | (OperandKind::Jump, Operand::Target(_))
        )
    }
}

/// Decode encoded code into instructions with index-based jump targets
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>, CodeError> {
    let mut reader = BytecodeReader::new(code);
    let mut instructions = Vec::new();
    let mut offsets: FxHashMap<usize, usize> = FxHashMap::default();
    // (instruction index, jump offset, absolute target)
    let mut pending_jumps = Vec::new();

    while reader.has_more() {
        let offset = reader.position();
        offsets.insert(offset, instructions.len());
        let opcode = reader.read_opcode()?;
        let operand = match opcode.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::I32 => Operand::I32(reader.read_i32()?),
            OperandKind::I64 => Operand::I64(reader.read_i64()?),
            OperandKind::F32 => Operand::F32(reader.read_f32()?),
            OperandKind::F64 => Operand::F64(reader.read_f64()?),
            OperandKind::StringIndex | OperandKind::ClassIndex | OperandKind::MemberIndex => {
                Operand::Index(reader.read_u32()?)
            }
            OperandKind::Local => Operand::Local(reader.read_u16()?),
            OperandKind::Jump => {
                let relative = reader.read_i32()?;
                let target = reader.position() as i64 + relative as i64;
                pending_jumps.push((instructions.len(), offset, target));
                Operand::Target(0)
            }
        };
        instructions.push(Instruction { opcode, operand });
    }

    for (index, offset, target) in pending_jumps {
        let resolved = usize::try_from(target)
            .ok()
            .and_then(|t| offsets.get(&t).copied())
            .ok_or(CodeError::InvalidJumpTarget { offset, target })?;
        instructions[index].operand = Operand::Target(resolved);
    }

    Ok(instructions)
}

/// Encode instructions, recomputing jump offsets
pub fn encode(instructions: &[Instruction]) -> Result<Vec<u8>, CodeError> {
    let mut offsets = Vec::with_capacity(instructions.len());
    let mut total = 0usize;
    for (index, instruction) in instructions.iter().enumerate() {
        if !instruction.operand_fits() {
            return Err(CodeError::OperandMismatch {
                index,
                opcode: instruction.opcode.name(),
            });
        }
        offsets.push(total);
        total += instruction.opcode.encoded_size();
    }

    let mut writer = BytecodeWriter::with_capacity(total);
    for (index, instruction) in instructions.iter().enumerate() {
        writer.emit_opcode(instruction.opcode);
        match instruction.operand {
            Operand::None => {}
            Operand::I32(v) => writer.emit_i32(v),
            Operand::I64(v) => writer.emit_i64(v),
            Operand::F32(v) => writer.emit_f32(v),
            Operand::F64(v) => writer.emit_f64(v),
            Operand::Index(v) => writer.emit_u32(v),
            Operand::Local(v) => writer.emit_u16(v),
            Operand::Target(target) => {
                let target_offset = *offsets
                    .get(target)
                    .ok_or(CodeError::TargetOutOfRange { index, target })?;
                let end = offsets[index] + instruction.opcode.encoded_size();
                writer.emit_i32(target_offset as i32 - end as i32);
            }
        }
    }

    Ok(writer.into_bytes())
}

/// Editable instruction list for one method body
///
/// Replacement and prepended sequences use *local* jump targets: index `k`
/// names the `k`-th instruction of the sequence itself, and `k == seq.len()`
/// names whatever follows the sequence. Targets of untouched instructions are
/// remapped so they keep pointing at the same logical instruction; a jump to
/// a replaced instruction lands on the start of its replacement.
#[derive(Debug, Clone, Default)]
pub struct CodeEditor {
    instructions: Vec<Instruction>,
}

impl CodeEditor {
    /// Decode a method body for editing
    pub fn decode(code: &[u8]) -> Result<Self, CodeError> {
        Ok(Self {
            instructions: decode(code)?,
        })
    }

    /// Wrap already decoded instructions
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Current instructions
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check for an empty body
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Encode the edited body
    pub fn encode(&self) -> Result<Vec<u8>, CodeError> {
        encode(&self.instructions)
    }

    /// Replace instructions for which `f` returns a sequence
    ///
    /// Returns the number of replaced instructions.
    pub fn rewrite<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(usize, &Instruction) -> Option<Vec<Instruction>>,
    {
        match self.try_rewrite::<_, std::convert::Infallible>(|i, insn| Ok(f(i, insn))) {
            Ok(count) => count,
            Err(never) => match never {},
        }
    }

    /// Fallible form of [`CodeEditor::rewrite`]; on error the body is unchanged
    pub fn try_rewrite<F, E>(&mut self, mut f: F) -> Result<usize, E>
    where
        F: FnMut(usize, &Instruction) -> Result<Option<Vec<Instruction>>, E>,
    {
        let mut replacements = Vec::new();
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let Some(sequence) = f(index, instruction)? {
                replacements.push((index, sequence));
            }
        }
        let count = replacements.len();
        if count > 0 {
            self.splice(Vec::new(), replacements);
        }
        Ok(count)
    }

    /// Insert a sequence before the first instruction
    pub fn prepend(&mut self, sequence: Vec<Instruction>) {
        self.splice(sequence, Vec::new());
    }

    fn splice(&mut self, prefix: Vec<Instruction>, replacements: Vec<(usize, Vec<Instruction>)>) {
        let old = std::mem::take(&mut self.instructions);
        let mut out: Vec<Instruction> = Vec::with_capacity(old.len() + prefix.len());
        // Instructions whose targets index into `old` and need remapping
        let mut original_jumps = Vec::new();
        let mut new_start = Vec::with_capacity(old.len() + 1);

        push_local(&mut out, prefix);

        let mut replacements = replacements.into_iter().peekable();
        for (index, instruction) in old.into_iter().enumerate() {
            new_start.push(out.len());
            match replacements.next_if(|(at, _)| *at == index) {
                Some((_, sequence)) => push_local(&mut out, sequence),
                None => {
                    if instruction.target().is_some() {
                        original_jumps.push(out.len());
                    }
                    out.push(instruction);
                }
            }
        }
        new_start.push(out.len());

        for at in original_jumps {
            if let Operand::Target(target) = out[at].operand {
                let remapped = new_start.get(target).copied().unwrap_or(target);
                out[at].operand = Operand::Target(remapped);
            }
        }

        self.instructions = out;
    }
}

fn push_local(out: &mut Vec<Instruction>, sequence: Vec<Instruction>) {
    let base = out.len();
    for mut instruction in sequence {
        if let Operand::Target(local) = instruction.operand {
            instruction.operand = Operand::Target(base + local);
        }
        out.push(instruction);
    }
}
