//! The code holder: sections, labels, relocations, and layout.
//!
//! A [`CodeHolder`] is the shared state one or more emitters append to. It
//! owns the section buffers, the label table with its pending fix-up chains,
//! the relocation records, and the constant pool, and it performs the final
//! layout step that assigns virtual addresses and resolves every relocation.

use crate::arch::{Arch, ArchInfo};
use crate::buffer::CodeBuffer;
use crate::constpool::ConstPool;
use crate::error::{CodeResult, Error};
use bitflags::bitflags;
use log::{debug, trace};

/// Sentinel for an empty fix-up chain.
const NO_FIXUP: u32 = u32::MAX;

/// Offset in bytes from the beginning of a section.
pub type CodeOffset = u32;

/// A reference to a section within one code holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

/// A reference to a code location; starts unbound and is bound to a section
/// offset at most once. Ids are dense and never reused within a holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// A reference to an external symbol registered with the holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

bitflags! {
    /// Protection and content flags of a section.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const EXEC = 0b0100;
        /// The section has initialized contents (as opposed to zero-fill).
        const INIT = 0b1000;
    }
}

/// A named byte buffer with alignment and protection flags, assigned a
/// virtual address at layout.
#[derive(Debug)]
pub struct Section {
    name: String,
    flags: SectionFlags,
    alignment: u32,
    buffer: CodeBuffer,
    /// Total size including trailing zero-fill; always >= buffer length.
    virtual_size: u32,
    /// Base virtual address; meaningful only after `relocate`.
    base: u64,
}

impl Section {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    pub fn buffer(&self) -> &CodeBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buffer
    }

    /// Size including trailing zero-fill.
    pub fn virtual_size(&self) -> u32 {
        self.virtual_size.max(self.buffer.offset())
    }

    /// Grow the zero-filled tail. Requests smaller than the buffer are
    /// ignored.
    pub fn set_virtual_size(&mut self, size: u32) {
        self.virtual_size = size;
    }

    /// The virtual address assigned by the last `relocate` call.
    pub fn base_address(&self) -> u64 {
        self.base
    }
}

/// Width and addressing kind of a pending label fix-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixupKind {
    /// One byte, PC-relative to the end of the field.
    Rel8,
    /// Four bytes, PC-relative to the end of the field.
    Rel32,
    /// Four bytes, absolute.
    Abs32,
    /// Eight bytes, absolute.
    Abs64,
}

impl FixupKind {
    pub fn size(self) -> u32 {
        match self {
            FixupKind::Rel8 => 1,
            FixupKind::Rel32 => 4,
            FixupKind::Abs32 => 4,
            FixupKind::Abs64 => 8,
        }
    }

    fn is_relative(self) -> bool {
        matches!(self, FixupKind::Rel8 | FixupKind::Rel32)
    }
}

/// A pending write against a not-yet-bound label. Nodes live in one
/// holder-owned vector and are chained per label by index; the whole store
/// is released at once on `reset`.
#[derive(Clone, Copy, Debug)]
struct Fixup {
    section: SectionId,
    offset: CodeOffset,
    kind: FixupKind,
    /// Added to the patched value; carries the trailing-byte compensation
    /// for RIP-relative operands encoded before the end of the instruction.
    addend: i32,
    next: u32,
}

#[derive(Clone, Copy, Debug)]
enum LabelState {
    Unbound { head: u32 },
    Bound { section: SectionId, offset: CodeOffset },
}

#[derive(Debug)]
struct LabelEntry {
    state: LabelState,
    name: Option<String>,
}

/// What a relocation record points at.
#[derive(Clone, Copy, Debug)]
pub enum RelocTarget {
    /// Absolute address of a bound label.
    AbsToLabel(Label),
    /// PC-relative distance to a bound label.
    RelToLabel(Label),
    /// Absolute address of an external symbol.
    AbsToSymbol(SymbolId),
    /// PC-relative distance to a constant-pool entry at the given pool
    /// offset.
    ConstPoolRel(u32),
}

/// A byte range whose final value depends on layout; resolved by
/// [`CodeHolder::relocate`].
#[derive(Clone, Copy, Debug)]
pub struct Reloc {
    pub section: SectionId,
    pub offset: CodeOffset,
    pub target: RelocTarget,
    /// Patched field width in bytes: 1, 4 or 8.
    pub size: u8,
    pub addend: i64,
}

#[derive(Debug)]
struct SymbolEntry {
    name: String,
    address: Option<u64>,
}

/// The in-memory representation of a code unit being assembled.
pub struct CodeHolder {
    arch: ArchInfo,
    sections: Vec<Section>,
    labels: Vec<LabelEntry>,
    fixups: Vec<Fixup>,
    relocs: Vec<Reloc>,
    symbols: Vec<SymbolEntry>,
    const_pool: ConstPool,
    const_pool_label: Option<Label>,
    /// Sticky first error; every mutation is a no-op while set.
    err: Option<Error>,
    laid_out: bool,
}

impl CodeHolder {
    /// Create a holder for `arch` with an initial executable `.text`
    /// section. Fails with `InvalidArch` for architectures this crate cannot
    /// encode.
    pub fn new(arch: Arch) -> CodeResult<Self> {
        let arch = ArchInfo::new(arch)?;
        let mut holder = CodeHolder {
            arch,
            sections: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            relocs: Vec::new(),
            symbols: Vec::new(),
            const_pool: ConstPool::new(),
            const_pool_label: None,
            err: None,
            laid_out: false,
        };
        holder.push_section(".text", SectionFlags::READ | SectionFlags::EXEC | SectionFlags::INIT, 16);
        Ok(holder)
    }

    /// The architecture descriptor this holder was initialized with.
    pub fn arch(&self) -> &ArchInfo {
        &self.arch
    }

    pub fn arch_mut(&mut self) -> &mut ArchInfo {
        &mut self.arch
    }

    // ------------------------------------------------------------------
    // Sticky error state.

    /// The first error recorded against this holder, if any.
    pub fn error(&self) -> Option<Error> {
        self.err
    }

    /// Record `err` unless an earlier error is already sticky; returns the
    /// error that is now (or was already) recorded.
    pub fn raise(&mut self, err: Error) -> Error {
        *self.err.get_or_insert(err)
    }

    /// Clear the sticky error, allowing emission to resume.
    pub fn clear_error(&mut self) {
        self.err = None;
    }

    fn check_ok(&self) -> CodeResult<()> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Sections.

    fn push_section(&mut self, name: &str, flags: SectionFlags, alignment: u32) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section {
            name: name.to_string(),
            flags,
            alignment,
            buffer: CodeBuffer::new(),
            virtual_size: 0,
            base: 0,
        });
        id
    }

    /// The initial `.text` section.
    pub fn text_section(&self) -> SectionId {
        SectionId(0)
    }

    /// Append a new section. Alignment must be a power of two.
    pub fn new_section(
        &mut self,
        name: &str,
        flags: SectionFlags,
        alignment: u32,
    ) -> CodeResult<SectionId> {
        self.check_ok()?;
        if !alignment.is_power_of_two() {
            return Err(self.raise(Error::BadAlignment));
        }
        Ok(self.push_section(name, flags, alignment))
    }

    pub fn section(&self, id: SectionId) -> CodeResult<&Section> {
        self.sections.get(id.0 as usize).ok_or(Error::InvalidSection)
    }

    pub fn section_mut(&mut self, id: SectionId) -> CodeResult<&mut Section> {
        self.sections
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidSection)
    }

    pub fn section_count(&self) -> u32 {
        self.sections.len() as u32
    }

    // ------------------------------------------------------------------
    // Labels and fix-ups.

    /// Allocate a fresh unbound label. Ids are monotonic and stable for the
    /// holder's lifetime.
    pub fn new_label(&mut self) -> Label {
        let id = Label(self.labels.len() as u32);
        self.labels.push(LabelEntry {
            state: LabelState::Unbound { head: NO_FIXUP },
            name: None,
        });
        id
    }

    /// Allocate a fresh label carrying a diagnostic name.
    pub fn new_named_label(&mut self, name: &str) -> Label {
        let id = self.new_label();
        self.labels[id.0 as usize].name = Some(name.to_string());
        id
    }

    pub fn is_label_valid(&self, label: Label) -> bool {
        (label.0 as usize) < self.labels.len()
    }

    /// The diagnostic name given to a label, if any.
    pub fn label_name(&self, label: Label) -> Option<&str> {
        self.labels.get(label.0 as usize)?.name.as_deref()
    }

    /// The section and offset a label is bound to, if it is bound.
    pub fn label_site(&self, label: Label) -> Option<(SectionId, CodeOffset)> {
        match self.labels.get(label.0 as usize)?.state {
            LabelState::Bound { section, offset } => Some((section, offset)),
            LabelState::Unbound { .. } => None,
        }
    }

    /// Queue a fix-up against an unbound label. The encoder has already
    /// written placeholder bytes at `offset`.
    pub fn add_fixup(
        &mut self,
        label: Label,
        section: SectionId,
        offset: CodeOffset,
        kind: FixupKind,
        addend: i32,
    ) -> CodeResult<()> {
        let entry = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(Error::InvalidLabel)?;
        match &mut entry.state {
            LabelState::Unbound { head } => {
                let node = Fixup {
                    section,
                    offset,
                    kind,
                    addend,
                    next: *head,
                };
                *head = self.fixups.len() as u32;
                self.fixups.push(node);
                Ok(())
            }
            // Bound labels are patched directly at emit time.
            LabelState::Bound { .. } => Err(Error::InvalidState),
        }
    }

    /// Bind `label` to `offset` within `section`, patching every queued
    /// fix-up that is resolvable now (PC-relative within the same section).
    /// Absolute and cross-section fix-ups become relocation records.
    pub fn bind_label(
        &mut self,
        label: Label,
        section: SectionId,
        offset: CodeOffset,
    ) -> CodeResult<()> {
        self.check_ok()?;
        if section.0 as usize >= self.sections.len() {
            return Err(self.raise(Error::InvalidSection));
        }
        let entry = match self.labels.get(label.0 as usize) {
            Some(entry) => entry,
            None => return Err(self.raise(Error::InvalidLabel)),
        };
        let mut cursor = match entry.state {
            LabelState::Bound { .. } => return Err(self.raise(Error::LabelAlreadyBound)),
            LabelState::Unbound { head } => head,
        };
        trace!(
            "bind L{} -> section {} offset {:#x}",
            label.0,
            section.0,
            offset
        );
        self.labels[label.0 as usize].state = LabelState::Bound { section, offset };

        while cursor != NO_FIXUP {
            let fixup = self.fixups[cursor as usize];
            cursor = fixup.next;
            if fixup.kind.is_relative() && fixup.section == section {
                self.patch_relative(fixup, offset)?;
            } else {
                // Needs final layout: keep it as a relocation.
                let target = if fixup.kind.is_relative() {
                    RelocTarget::RelToLabel(label)
                } else {
                    RelocTarget::AbsToLabel(label)
                };
                self.relocs.push(Reloc {
                    section: fixup.section,
                    offset: fixup.offset,
                    target,
                    size: fixup.kind.size() as u8,
                    addend: fixup.addend as i64,
                });
            }
        }
        Ok(())
    }

    /// Patch one same-section PC-relative site against a now-known target
    /// offset.
    fn patch_relative(&mut self, fixup: Fixup, target: CodeOffset) -> CodeResult<()> {
        let size = fixup.kind.size();
        let disp = target as i64 - (fixup.offset as i64 + size as i64) + fixup.addend as i64;
        let in_range = match fixup.kind {
            FixupKind::Rel8 => i8::try_from(disp).is_ok(),
            FixupKind::Rel32 => i32::try_from(disp).is_ok(),
            FixupKind::Abs32 | FixupKind::Abs64 => unreachable!("absolute fix-ups go to relocs"),
        };
        if !in_range {
            return Err(self.raise(Error::BranchTooFar));
        }
        let buffer = self.sections[fixup.section.0 as usize].buffer_mut();
        match fixup.kind {
            FixupKind::Rel8 => buffer.patch_u8(fixup.offset, disp as u8),
            FixupKind::Rel32 => buffer.patch_u32(fixup.offset, disp as u32),
            FixupKind::Abs32 | FixupKind::Abs64 => unreachable!(),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // External symbols and relocations.

    /// Register an external symbol; its address is supplied later via
    /// [`CodeHolder::define_external`].
    pub fn new_external(&mut self, name: &str) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(SymbolEntry {
            name: name.to_string(),
            address: None,
        });
        id
    }

    /// Supply the absolute address of an external symbol.
    pub fn define_external(&mut self, sym: SymbolId, address: u64) -> CodeResult<()> {
        let entry = self
            .symbols
            .get_mut(sym.0 as usize)
            .ok_or(Error::InvalidArgument)?;
        entry.address = Some(address);
        Ok(())
    }

    pub fn symbol_name(&self, sym: SymbolId) -> Option<&str> {
        self.symbols.get(sym.0 as usize).map(|s| s.name.as_str())
    }

    /// Record a relocation to be resolved at layout time.
    pub fn add_reloc(&mut self, reloc: Reloc) {
        self.relocs.push(reloc);
    }

    // ------------------------------------------------------------------
    // Constant pool.

    /// The label marking the start of the folded constant pool; created on
    /// first use and bound when an emitter folds the pool into a section.
    pub fn const_pool_label(&mut self) -> Label {
        match self.const_pool_label {
            Some(label) => label,
            None => {
                let label = self.new_named_label(".constpool");
                self.const_pool_label = Some(label);
                label
            }
        }
    }

    /// Insert data into the constant pool, returning the pool label and the
    /// entry's offset from it.
    pub fn insert_const(&mut self, data: &[u8]) -> CodeResult<(Label, u32)> {
        self.check_ok()?;
        let offset = match self.const_pool.insert(data) {
            Ok(offset) => offset,
            Err(e) => return Err(self.raise(e)),
        };
        Ok((self.const_pool_label(), offset))
    }

    pub fn const_pool(&self) -> &ConstPool {
        &self.const_pool
    }

    /// Fold the constant pool into `section` at its current end, aligning
    /// first and binding the pool label. No-op for an empty pool.
    pub fn embed_const_pool(&mut self, section: SectionId) -> CodeResult<()> {
        self.check_ok()?;
        if self.const_pool.is_empty() {
            return Ok(());
        }
        let label = self.const_pool_label();
        let alignment = self.const_pool.alignment();
        let buffer = self.section_mut(section)?.buffer_mut();
        buffer.align_to(alignment, 0);
        let offset = buffer.offset();
        // Splitting the borrow: write_to only reads the pool.
        let pool = core::mem::take(&mut self.const_pool);
        pool.write_to(self.sections[section.0 as usize].buffer_mut());
        self.const_pool = pool;
        self.bind_label(label, section, offset)
    }

    // ------------------------------------------------------------------
    // Layout.

    /// Assign every section a virtual address starting at `base`, honoring
    /// section alignment, and resolve every relocation. Returns the total
    /// laid-out size in bytes.
    ///
    /// A holder with a sticky error is rejected with `InvalidState`;
    /// unresolvable references fail with `RelocationFailed`.
    pub fn relocate(&mut self, base: u64) -> CodeResult<u64> {
        if self.err.is_some() {
            return Err(Error::InvalidState);
        }

        // Any fix-up still chained to an unbound label is unresolvable.
        for (id, entry) in self.labels.iter().enumerate() {
            if let LabelState::Unbound { head } = entry.state {
                if head != NO_FIXUP {
                    debug!("relocation against unbound label L{id}");
                    return Err(self.raise(Error::RelocationFailed));
                }
            }
        }

        // Address assignment.
        let mut cursor = base;
        for section in &mut self.sections {
            let align = u64::from(section.alignment.max(1));
            cursor = (cursor + align - 1) & !(align - 1);
            section.base = cursor;
            cursor += u64::from(section.virtual_size());
        }
        for (i, a) in self.sections.iter().enumerate() {
            for b in &self.sections[i + 1..] {
                let a_end = a.base + u64::from(a.virtual_size());
                if b.base < a_end && a.base < b.base + u64::from(b.virtual_size()) {
                    return Err(self.raise(Error::OverlappingSection));
                }
            }
        }
        self.laid_out = true;
        debug!(
            "laid out {} sections at {:#x}, {} bytes total",
            self.sections.len(),
            base,
            cursor - base
        );

        // Relocation resolution.
        for i in 0..self.relocs.len() {
            let reloc = self.relocs[i];
            self.resolve_reloc(reloc)?;
        }
        Ok(cursor - base)
    }

    fn target_address(&self, target: RelocTarget) -> CodeResult<u64> {
        match target {
            RelocTarget::AbsToLabel(label) | RelocTarget::RelToLabel(label) => {
                let (section, offset) = self
                    .label_site(label)
                    .ok_or(Error::RelocationFailed)?;
                Ok(self.sections[section.0 as usize].base + u64::from(offset))
            }
            RelocTarget::AbsToSymbol(sym) => self
                .symbols
                .get(sym.0 as usize)
                .and_then(|s| s.address)
                .ok_or(Error::RelocationFailed),
            RelocTarget::ConstPoolRel(pool_offset) => {
                let label = self.const_pool_label.ok_or(Error::RelocationFailed)?;
                let (section, offset) = self
                    .label_site(label)
                    .ok_or(Error::RelocationFailed)?;
                Ok(self.sections[section.0 as usize].base
                    + u64::from(offset)
                    + u64::from(pool_offset))
            }
        }
    }

    fn resolve_reloc(&mut self, reloc: Reloc) -> CodeResult<()> {
        let target = match self.target_address(reloc.target) {
            Ok(t) => t,
            Err(e) => return Err(self.raise(e)),
        };
        let site_base = self.sections[reloc.section.0 as usize].base;
        let relative = matches!(
            reloc.target,
            RelocTarget::RelToLabel(_) | RelocTarget::ConstPoolRel(_)
        );
        let value = if relative {
            let next = site_base + u64::from(reloc.offset) + u64::from(reloc.size);
            (target as i64).wrapping_sub(next as i64).wrapping_add(reloc.addend)
        } else {
            (target as i64).wrapping_add(reloc.addend)
        };
        trace!(
            "reloc at section {} offset {:#x}: value {:#x}",
            reloc.section.0,
            reloc.offset,
            value
        );
        let fits = match (reloc.size, relative) {
            (1, _) => i8::try_from(value).is_ok(),
            (4, true) => i32::try_from(value).is_ok(),
            (4, false) => u32::try_from(value as u64).is_ok(),
            (8, _) => true,
            _ => false,
        };
        if !fits {
            let err = if relative {
                Error::BranchTooFar
            } else {
                Error::RelocationFailed
            };
            return Err(self.raise(err));
        }
        let buffer = self.sections[reloc.section.0 as usize].buffer_mut();
        match reloc.size {
            1 => buffer.patch_u8(reloc.offset, value as u8),
            4 => buffer.patch_u32(reloc.offset, value as u32),
            8 => buffer.patch_u64(reloc.offset, value as u64),
            _ => return Err(self.raise(Error::RelocationFailed)),
        }
        Ok(())
    }

    /// Total size of the laid-out image; valid after [`CodeHolder::relocate`].
    pub fn image_size(&self) -> CodeResult<u64> {
        if !self.laid_out {
            return Err(Error::InvalidState);
        }
        let base = self.sections.first().map(|s| s.base).unwrap_or(0);
        let end = self
            .sections
            .iter()
            .map(|s| s.base + u64::from(s.virtual_size()))
            .max()
            .unwrap_or(base);
        Ok(end - base)
    }

    /// Produce the flat image: every section's bytes at its assigned
    /// address, padded with zeros between and after sections.
    pub fn to_image(&self) -> CodeResult<Vec<u8>> {
        if !self.laid_out {
            return Err(Error::InvalidState);
        }
        let size = usize::try_from(self.image_size()?).map_err(|_| Error::OutOfMemory)?;
        let base = self.sections.first().map(|s| s.base).unwrap_or(0);
        let mut image = vec![0u8; size];
        for section in &self.sections {
            let start = (section.base - base) as usize;
            let data = section.buffer.data();
            image[start..start + data.len()].copy_from_slice(data);
        }
        Ok(image)
    }

    /// Drop all state and return to the post-`new` configuration.
    pub fn reset(&mut self) {
        self.sections.clear();
        self.labels.clear();
        self.fixups.clear();
        self.relocs.clear();
        self.symbols.clear();
        self.const_pool.reset();
        self.const_pool_label = None;
        self.err = None;
        self.laid_out = false;
        self.push_section(".text", SectionFlags::READ | SectionFlags::EXEC | SectionFlags::INIT, 16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder() -> CodeHolder {
        CodeHolder::new(Arch::X64).unwrap()
    }

    #[test]
    fn label_ids_are_dense_and_stable() {
        let mut code = holder();
        let a = code.new_label();
        let b = code.new_label();
        assert_eq!(a, Label(0));
        assert_eq!(b, Label(1));
    }

    #[test]
    fn double_bind_is_rejected() {
        let mut code = holder();
        let text = code.text_section();
        let label = code.new_label();
        code.bind_label(label, text, 0).unwrap();
        assert_eq!(
            code.bind_label(label, text, 4).unwrap_err(),
            Error::LabelAlreadyBound
        );
    }

    #[test]
    fn bind_patches_forward_rel32() {
        let mut code = holder();
        let text = code.text_section();
        let label = code.new_label();
        // A 4-byte placeholder at offset 1, e.g. the disp of `jmp rel32`.
        let buf = code.section_mut(text).unwrap().buffer_mut();
        buf.put1(0xE9);
        buf.put4(0);
        code.add_fixup(label, text, 1, FixupKind::Rel32, 0).unwrap();
        code.bind_label(label, text, 16).unwrap();
        let buf = code.section(text).unwrap().buffer();
        // target 16 - (site 1 + size 4) = 11.
        assert_eq!(buf.read_u32(1), 11);
    }

    #[test]
    fn rel8_overflow_raises_branch_too_far() {
        let mut code = holder();
        let text = code.text_section();
        let label = code.new_label();
        let buf = code.section_mut(text).unwrap().buffer_mut();
        buf.put1(0xEB);
        buf.put1(0);
        for _ in 0..200 {
            buf.put1(0x90);
        }
        code.add_fixup(label, text, 1, FixupKind::Rel8, 0).unwrap();
        assert_eq!(
            code.bind_label(label, text, 202).unwrap_err(),
            Error::BranchTooFar
        );
        // The failure is sticky.
        assert_eq!(code.error(), Some(Error::BranchTooFar));
        assert_eq!(code.relocate(0x1000).unwrap_err(), Error::InvalidState);
    }

    #[test]
    fn sticky_error_reports_first_failure() {
        let mut code = holder();
        code.raise(Error::InvalidInstruction);
        assert_eq!(code.raise(Error::OutOfMemory), Error::InvalidInstruction);
        code.clear_error();
        assert_eq!(code.error(), None);
    }

    #[test]
    fn layout_honors_section_alignment() {
        let mut code = holder();
        let text = code.text_section();
        code.section_mut(text).unwrap().buffer_mut().put_bytes(&[0x90; 10]);
        let data = code
            .new_section(".data", SectionFlags::READ | SectionFlags::INIT, 64)
            .unwrap();
        code.section_mut(data).unwrap().buffer_mut().put8(7);
        let total = code.relocate(0x10000).unwrap();
        assert_eq!(code.section(text).unwrap().base_address(), 0x10000);
        assert_eq!(code.section(data).unwrap().base_address(), 0x10040);
        assert_eq!(total, 0x48);
    }

    #[test]
    fn unbound_fixup_fails_layout() {
        let mut code = holder();
        let text = code.text_section();
        let label = code.new_label();
        code.section_mut(text).unwrap().buffer_mut().put4(0);
        code.add_fixup(label, text, 0, FixupKind::Rel32, 0).unwrap();
        assert_eq!(code.relocate(0).unwrap_err(), Error::RelocationFailed);
    }

    #[test]
    fn external_symbol_resolution() {
        let mut code = holder();
        let text = code.text_section();
        let sym = code.new_external("callback");
        code.section_mut(text).unwrap().buffer_mut().put8(0);
        code.add_reloc(Reloc {
            section: text,
            offset: 0,
            target: RelocTarget::AbsToSymbol(sym),
            size: 8,
            addend: 0,
        });
        assert_eq!(code.relocate(0).unwrap_err(), Error::RelocationFailed);
        code.clear_error();
        code.define_external(sym, 0xDEAD_BEEF).unwrap();
        code.relocate(0).unwrap();
        let image = code.to_image().unwrap();
        assert_eq!(&image[0..8], &0xDEAD_BEEFu64.to_le_bytes());
    }

    #[test]
    fn image_zero_fills_virtual_tail() {
        let mut code = holder();
        let text = code.text_section();
        code.section_mut(text).unwrap().buffer_mut().put_bytes(&[0xC3]);
        code.section_mut(text).unwrap().set_virtual_size(32);
        code.relocate(0).unwrap();
        let image = code.to_image().unwrap();
        assert_eq!(image.len(), 32);
        assert_eq!(image[0], 0xC3);
        assert!(image[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut code = holder();
        code.new_label();
        code.raise(Error::InvalidInstruction);
        code.reset();
        assert_eq!(code.error(), None);
        assert_eq!(code.section_count(), 1);
        assert_eq!(code.new_label(), Label(0));
    }
}
