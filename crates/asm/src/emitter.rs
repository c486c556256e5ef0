//! The emitter abstraction.
//!
//! An [`Emitter`] is a polymorphic sink for symbolic instructions: the
//! [`Assembler`](crate::assembler::Assembler) encodes immediately into a
//! section, the [`Builder`](crate::builder::Builder) records a node list for
//! later replay, and a register-allocating compiler frontend would extend the
//! builder with virtual registers while speaking the same trait at the seam.

use crate::code::{Label, SectionId};
use crate::error::CodeResult;
use crate::operand::Operand;
use crate::x64::InstId;

/// Fill policy for [`Emitter::align`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignMode {
    /// Pad with multi-byte NOP instructions; for code that may be executed
    /// through.
    Code,
    /// Pad with zero bytes.
    Data,
    /// Pad with zero bytes; alias of `Data` kept for call-site clarity.
    Zero,
}

/// A sink accepting symbolic instructions and assembly directives.
///
/// All methods observe the holder's sticky error: once any operation on the
/// attached holder fails, subsequent calls return that first error without
/// side effects until it is cleared.
pub trait Emitter {
    /// Emit one instruction. On success exactly the encoded bytes (plus any
    /// relocation records) are appended; on failure the section is left
    /// untouched.
    fn emit(&mut self, id: InstId, ops: &[Operand]) -> CodeResult<()>;

    /// Bind `label` to the current position of the active section.
    fn bind(&mut self, label: Label) -> CodeResult<()>;

    /// Pad the active section to `alignment` (a power of two).
    fn align(&mut self, mode: AlignMode, alignment: u32) -> CodeResult<()>;

    /// Append raw bytes.
    fn embed(&mut self, data: &[u8]) -> CodeResult<()>;

    /// Append a pointer-sized absolute reference to `label`, resolved at
    /// layout.
    fn embed_label(&mut self, label: Label) -> CodeResult<()>;

    /// Fold the holder's constant pool into the active section, binding the
    /// pool label.
    fn embed_const_pool(&mut self) -> CodeResult<()>;

    /// Allocate a fresh label from the attached holder.
    fn new_label(&mut self) -> Label;

    /// Switch emission to another of the holder's sections.
    fn set_active_section(&mut self, section: SectionId) -> CodeResult<()>;

    /// Flush any buffered state. A no-op for assemblers; replays the node
    /// list for builders.
    fn finalize(&mut self) -> CodeResult<()> {
        Ok(())
    }

    /// Emit a no-operand instruction.
    fn emit0(&mut self, id: InstId) -> CodeResult<()>
    where
        Self: Sized,
    {
        self.emit(id, &[])
    }

    /// Emit a one-operand instruction.
    fn emit1(&mut self, id: InstId, op0: impl Into<Operand>) -> CodeResult<()>
    where
        Self: Sized,
    {
        self.emit(id, &[op0.into()])
    }

    /// Emit a two-operand instruction.
    fn emit2(
        &mut self,
        id: InstId,
        op0: impl Into<Operand>,
        op1: impl Into<Operand>,
    ) -> CodeResult<()>
    where
        Self: Sized,
    {
        self.emit(id, &[op0.into(), op1.into()])
    }

    /// Emit a three-operand instruction.
    fn emit3(
        &mut self,
        id: InstId,
        op0: impl Into<Operand>,
        op1: impl Into<Operand>,
        op2: impl Into<Operand>,
    ) -> CodeResult<()>
    where
        Self: Sized,
    {
        self.emit(id, &[op0.into(), op1.into(), op2.into()])
    }
}

/// Multi-byte NOP sequences, indexed by length - 1 (Intel SDM table 4-12).
pub(crate) const NOPS: [&[u8]; 9] = [
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];
