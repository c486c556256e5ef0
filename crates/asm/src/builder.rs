//! The builder: an emitter that records instructions for later replay.
//!
//! Instead of encoding immediately, a [`Builder`] appends zone-allocated
//! nodes to a linked list. The list can be replayed into any other emitter
//! with [`Builder::serialize`], or encoded into the attached holder in one
//! shot with [`Builder::finalize`]. This is the substrate a
//! register-allocating compiler builds on: it records with virtual operands,
//! rewrites nodes in place, then finalizes.

use core::cell::Cell;

use crate::arch::CpuFeatures;
use crate::assembler::Assembler;
use crate::code::{CodeHolder, Label, SectionId};
use crate::emitter::{AlignMode, Emitter};
use crate::error::{CodeResult, Error};
use crate::operand::Operand;
use crate::x64::InstId;
use crate::zone::Zone;

/// Maximum explicit operands an instruction may carry.
pub const MAX_OPS: usize = 6;

/// What one recorded node does.
pub enum NodeKind<'z> {
    /// An instruction with its operands.
    Inst {
        id: InstId,
        ops: [Operand; MAX_OPS],
        count: u8,
    },
    /// Bind a label at this point.
    Bind(Label),
    /// Alignment directive.
    Align(AlignMode, u32),
    /// Raw data copied into the zone.
    Embed(&'z [u8]),
    /// Pointer-sized absolute label reference.
    EmbedLabel(Label),
    /// Fold the constant pool here.
    EmbedConstPool,
    /// Switch the active section.
    Section(SectionId),
}

/// A node of the builder's singly-linked list, allocated in the caller's
/// [`Zone`]. The links use `Cell` so the list can be appended to through
/// shared references.
pub struct InstNode<'z> {
    kind: NodeKind<'z>,
    next: Cell<Option<&'z InstNode<'z>>>,
}

impl<'z> InstNode<'z> {
    pub fn kind(&self) -> &NodeKind<'z> {
        &self.kind
    }

    pub fn next(&self) -> Option<&'z InstNode<'z>> {
        self.next.get()
    }
}

/// An [`Emitter`] recording a replayable node list.
pub struct Builder<'a, 'z> {
    code: &'a mut CodeHolder,
    zone: &'z Zone,
    head: Option<&'z InstNode<'z>>,
    tail: Option<&'z InstNode<'z>>,
    section: SectionId,
    features: CpuFeatures,
    short_jumps: bool,
}

impl<'a, 'z> Builder<'a, 'z> {
    /// Attach to `code`, recording nodes into `zone`.
    pub fn new(code: &'a mut CodeHolder, zone: &'z Zone) -> CodeResult<Self> {
        let section = code.text_section();
        let features = code.arch().features();
        Ok(Builder {
            code,
            zone,
            head: None,
            tail: None,
            section,
            features,
            short_jumps: false,
        })
    }

    /// First node of the recorded list.
    pub fn first(&self) -> Option<&'z InstNode<'z>> {
        self.head
    }

    /// The section subsequently recorded nodes will target.
    pub fn active_section(&self) -> SectionId {
        self.section
    }

    /// Replace the feature mask used when the list is finalized.
    pub fn set_features(&mut self, features: CpuFeatures) {
        self.features = features;
    }

    /// See [`Assembler::set_short_jumps`].
    pub fn set_short_jumps(&mut self, short_jumps: bool) {
        self.short_jumps = short_jumps;
    }

    fn append(&mut self, kind: NodeKind<'z>) -> CodeResult<()> {
        if let Some(err) = self.code.error() {
            return Err(err);
        }
        let node = self.zone.alloc(InstNode {
            kind,
            next: Cell::new(None),
        });
        match self.tail {
            Some(tail) => tail.next.set(Some(node)),
            None => self.head = Some(node),
        }
        self.tail = Some(node);
        Ok(())
    }

    /// Replay the recorded list into another emitter. Labels and sections
    /// must belong to the emitter's holder, which in practice means the
    /// target is attached to the same holder this builder recorded against.
    pub fn serialize(&self, dst: &mut dyn Emitter) -> CodeResult<()> {
        let mut cursor = self.head;
        while let Some(node) = cursor {
            replay(node, dst)?;
            cursor = node.next();
        }
        Ok(())
    }

    /// Encode the recorded list into the attached holder and consume the
    /// builder.
    pub fn finalize(self) -> CodeResult<()> {
        let Builder {
            code,
            head,
            features,
            short_jumps,
            ..
        } = self;
        let mut asm = Assembler::new(code)?;
        asm.set_features(features);
        asm.set_short_jumps(short_jumps);
        let mut cursor = head;
        while let Some(node) = cursor {
            replay(node, &mut asm)?;
            cursor = node.next();
        }
        Ok(())
    }
}

fn replay(node: &InstNode<'_>, dst: &mut dyn Emitter) -> CodeResult<()> {
    match node.kind() {
        NodeKind::Inst { id, ops, count } => dst.emit(*id, &ops[..*count as usize]),
        NodeKind::Bind(label) => dst.bind(*label),
        NodeKind::Align(mode, alignment) => dst.align(*mode, *alignment),
        NodeKind::Embed(data) => dst.embed(data),
        NodeKind::EmbedLabel(label) => dst.embed_label(*label),
        NodeKind::EmbedConstPool => dst.embed_const_pool(),
        NodeKind::Section(section) => {
            // Section switches replay only into assemblers; other emitters
            // follow their own active section.
            dst.set_active_section(*section)
        }
    }
}

impl Emitter for Builder<'_, '_> {
    fn emit(&mut self, id: InstId, ops: &[Operand]) -> CodeResult<()> {
        if ops.len() > MAX_OPS {
            return Err(self.code.raise(Error::InvalidInstruction));
        }
        let mut stored = [Operand::None; MAX_OPS];
        stored[..ops.len()].copy_from_slice(ops);
        self.append(NodeKind::Inst {
            id,
            ops: stored,
            count: ops.len() as u8,
        })
    }

    fn bind(&mut self, label: Label) -> CodeResult<()> {
        if !self.code.is_label_valid(label) {
            return Err(self.code.raise(Error::InvalidLabel));
        }
        self.append(NodeKind::Bind(label))
    }

    fn align(&mut self, mode: AlignMode, alignment: u32) -> CodeResult<()> {
        if !alignment.is_power_of_two() || alignment > 4096 {
            return Err(self.code.raise(Error::BadAlignment));
        }
        self.append(NodeKind::Align(mode, alignment))
    }

    fn embed(&mut self, data: &[u8]) -> CodeResult<()> {
        let copy = self.zone.alloc_slice(data);
        self.append(NodeKind::Embed(copy))
    }

    fn embed_label(&mut self, label: Label) -> CodeResult<()> {
        if !self.code.is_label_valid(label) {
            return Err(self.code.raise(Error::InvalidLabel));
        }
        self.append(NodeKind::EmbedLabel(label))
    }

    fn embed_const_pool(&mut self) -> CodeResult<()> {
        self.append(NodeKind::EmbedConstPool)
    }

    fn new_label(&mut self) -> Label {
        self.code.new_label()
    }

    fn set_active_section(&mut self, section: SectionId) -> CodeResult<()> {
        self.code.section(section)?;
        self.section = section;
        self.append(NodeKind::Section(section))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::x64::regs::*;
    use crate::x64::InstId::*;

    fn text_bytes(code: &CodeHolder) -> Vec<u8> {
        let text = code.text_section();
        code.section(text).unwrap().buffer().data().to_vec()
    }

    #[test]
    fn finalize_replays_the_node_list() {
        let zone = Zone::new();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        {
            let mut cb = Builder::new(&mut code, &zone).unwrap();
            let skip = cb.new_label();
            cb.emit2(Mov, eax(), 7).unwrap();
            cb.emit1(Jmp, skip).unwrap();
            cb.emit0(Int3).unwrap();
            cb.bind(skip).unwrap();
            cb.emit0(Ret).unwrap();
            cb.finalize().unwrap();
        }
        // Forward jump committed to rel32: disp skips the int3.
        assert_eq!(
            text_bytes(&code),
            &[0xB8, 7, 0, 0, 0, 0xE9, 0x01, 0x00, 0x00, 0x00, 0xCC, 0xC3]
        );
    }

    #[test]
    fn embedded_data_lives_in_the_zone() {
        let zone = Zone::new();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        {
            let mut cb = Builder::new(&mut code, &zone).unwrap();
            let scratch = vec![0xAA, 0xBB];
            cb.embed(&scratch).unwrap();
            drop(scratch);
            cb.emit0(Ret).unwrap();
            cb.finalize().unwrap();
        }
        assert_eq!(text_bytes(&code), &[0xAA, 0xBB, 0xC3]);
    }

    #[test]
    fn nodes_are_walkable() {
        let zone = Zone::new();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        let mut cb = Builder::new(&mut code, &zone).unwrap();
        cb.emit0(Nop).unwrap();
        cb.emit0(Ret).unwrap();
        let mut count = 0;
        let mut cursor = cb.first();
        while let Some(node) = cursor {
            assert!(matches!(node.kind(), NodeKind::Inst { .. }));
            count += 1;
            cursor = node.next();
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn recording_stops_after_a_holder_error() {
        let zone = Zone::new();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        let mut cb = Builder::new(&mut code, &zone).unwrap();
        cb.emit0(Ret).unwrap();
        code_error(&mut cb);
        assert!(cb.emit0(Ret).is_err());
    }

    fn code_error(cb: &mut Builder<'_, '_>) {
        cb.code.raise(Error::InvalidInstruction);
    }
}
