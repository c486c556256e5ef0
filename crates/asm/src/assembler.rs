//! The assembler: an emitter that encodes directly into a section buffer.

use crate::arch::CpuFeatures;
use crate::code::{CodeHolder, FixupKind, Label, Reloc, RelocTarget, SectionId};
use crate::emitter::{AlignMode, Emitter, NOPS};
use crate::error::{CodeResult, Error};
use crate::operand::Operand;
use crate::x64::emit::{emit_inst, EmitOptions};
use crate::x64::InstId;

/// An [`Emitter`] bound to a [`CodeHolder`], encoding each instruction into
/// the active section as it is emitted.
///
/// Construction attaches the assembler to the holder and drop detaches it;
/// the exclusive borrow is what makes a holder single-producer (two emitters
/// writing the same holder do not compile).
pub struct Assembler<'a> {
    code: &'a mut CodeHolder,
    section: SectionId,
    features: CpuFeatures,
    short_jumps: bool,
    pending_lock: bool,
}

impl<'a> Assembler<'a> {
    /// Attach to `code`, targeting its `.text` section.
    pub fn new(code: &'a mut CodeHolder) -> CodeResult<Self> {
        let section = code.text_section();
        let features = code.arch().features();
        Ok(Assembler {
            code,
            section,
            features,
            short_jumps: false,
            pending_lock: false,
        })
    }

    /// The attached holder.
    pub fn code(&mut self) -> &mut CodeHolder {
        self.code
    }

    /// The active section.
    pub fn section(&self) -> SectionId {
        self.section
    }

    /// Switch emission to another section.
    pub fn set_section(&mut self, section: SectionId) -> CodeResult<()> {
        self.code.section(section)?;
        self.section = section;
        Ok(())
    }

    /// Current offset within the active section.
    pub fn offset(&self) -> u32 {
        self.code
            .section(self.section)
            .map(|s| s.buffer().offset())
            .unwrap_or(0)
    }

    /// The feature mask consulted before encoding.
    pub fn features(&self) -> CpuFeatures {
        self.features
    }

    /// Replace the feature mask, e.g. with a synthetic set under test.
    pub fn set_features(&mut self, features: CpuFeatures) {
        self.features = features;
    }

    /// Encode branches to unbound labels as rel8. Binding fails with
    /// `BranchTooFar` when the final displacement does not fit; the default
    /// (off) commits unbound branches to rel32 instead.
    pub fn set_short_jumps(&mut self, short_jumps: bool) {
        self.short_jumps = short_jumps;
    }

    /// Apply a LOCK prefix to the next emitted instruction.
    pub fn lock(&mut self) -> &mut Self {
        self.pending_lock = true;
        self
    }

    fn check_ok(&self) -> CodeResult<()> {
        match self.code.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Emitter for Assembler<'_> {
    fn emit(&mut self, id: InstId, ops: &[Operand]) -> CodeResult<()> {
        self.check_ok()?;
        let opts = EmitOptions {
            features: self.features,
            short_jumps: self.short_jumps,
            lock: core::mem::take(&mut self.pending_lock),
        };
        match emit_inst(self.code, self.section, id, ops, &opts) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.code.raise(err)),
        }
    }

    fn bind(&mut self, label: Label) -> CodeResult<()> {
        let offset = self.offset();
        self.code.bind_label(label, self.section, offset)
    }

    fn align(&mut self, mode: AlignMode, alignment: u32) -> CodeResult<()> {
        self.check_ok()?;
        if !alignment.is_power_of_two() || alignment > 4096 {
            return Err(self.code.raise(Error::BadAlignment));
        }
        let buffer = self.code.section_mut(self.section)?.buffer_mut();
        let offset = buffer.offset();
        let mut pad = offset.next_multiple_of(alignment) - offset;
        match mode {
            AlignMode::Code => {
                while pad > 0 {
                    let chunk = pad.min(NOPS.len() as u32);
                    buffer.put_bytes(NOPS[chunk as usize - 1]);
                    pad -= chunk;
                }
            }
            AlignMode::Data | AlignMode::Zero => {
                buffer.align_to(alignment, 0);
            }
        }
        Ok(())
    }

    fn embed(&mut self, data: &[u8]) -> CodeResult<()> {
        self.check_ok()?;
        self.code
            .section_mut(self.section)?
            .buffer_mut()
            .put_bytes(data);
        Ok(())
    }

    fn embed_label(&mut self, label: Label) -> CodeResult<()> {
        self.check_ok()?;
        if !self.code.is_label_valid(label) {
            return Err(self.code.raise(Error::InvalidLabel));
        }
        let pointer_bytes = self.code.arch().arch().pointer_bytes();
        let buffer = self.code.section_mut(self.section)?.buffer_mut();
        let offset = buffer.offset();
        let section = self.section;
        if pointer_bytes == 8 {
            buffer.put8(0);
        } else {
            buffer.put4(0);
        }
        if self.code.label_site(label).is_some() {
            self.code.add_reloc(Reloc {
                section,
                offset,
                target: RelocTarget::AbsToLabel(label),
                size: pointer_bytes as u8,
                addend: 0,
            });
        } else {
            let kind = if pointer_bytes == 8 {
                FixupKind::Abs64
            } else {
                FixupKind::Abs32
            };
            self.code.add_fixup(label, section, offset, kind, 0)?;
        }
        Ok(())
    }

    fn embed_const_pool(&mut self) -> CodeResult<()> {
        self.code.embed_const_pool(self.section)
    }

    fn new_label(&mut self) -> Label {
        self.code.new_label()
    }

    fn set_active_section(&mut self, section: SectionId) -> CodeResult<()> {
        self.set_section(section)
    }
}
