//! The x64 encoding pipeline.
//!
//! Each emit runs the same sequence: match the operand signature against the
//! instruction's table rows, check CPU features, fix up operand widths,
//! assemble prefixes, then opcode, ModR/M, SIB, displacement and immediate.
//! Bytes are staged in a scratch buffer together with any pending label
//! references, and committed to the section atomically only when the whole
//! instruction encoded successfully.

use smallvec::SmallVec;

use super::evex::{disp8_scale, EvexPrefix};
use super::inst::{
    self, Family, InstId, InstRow, OpEnc, OpPat, F_EXPM, F_LOCK, F_W, F_X64, F_X86,
};
use super::rex::{encode_modrm, encode_sib, Disp, RexFlags};
use super::vex::VexPrefix;
use crate::arch::{Arch, CpuFeatures};
use crate::code::{CodeHolder, FixupKind, Label, Reloc, RelocTarget, SectionId};
use crate::error::{CodeResult, Error};
use crate::operand::{Mem, MemBase, Operand, Reg, RegGroup, RegSize};

/// Per-emit options threaded from the assembler.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EmitOptions {
    pub features: CpuFeatures,
    /// Encode branches to unbound labels as rel8, failing at bind time when
    /// out of range. Off by default: unbound branches commit to rel32.
    pub short_jumps: bool,
    /// Apply a LOCK prefix to this instruction.
    pub lock: bool,
}

/// A label reference staged during encoding, applied after the bytes are
/// committed.
enum PendingRef {
    Fixup {
        pos: u32,
        kind: FixupKind,
        label: Label,
        addend: i32,
    },
    Reloc {
        pos: u32,
        target: RelocTarget,
        size: u8,
        addend: i64,
    },
}

type Scratch = SmallVec<[u8; 16]>;
type Pending = SmallVec<[PendingRef; 2]>;

struct EmitCtx<'a> {
    code: &'a CodeHolder,
    section: SectionId,
    inst_start: u32,
    is64: bool,
    short_jumps: bool,
}

impl EmitCtx<'_> {
    /// Where a label is bound within the current section, if it is.
    fn bound_here(&self, label: Label) -> Option<u32> {
        match self.code.label_site(label) {
            Some((section, offset)) if section == self.section => Some(offset),
            _ => None,
        }
    }
}

/// Encode one instruction into the holder's section.
pub(crate) fn emit_inst(
    code: &mut CodeHolder,
    section: SectionId,
    id: InstId,
    ops: &[Operand],
    opts: &EmitOptions,
) -> CodeResult<()> {
    if ops.len() > 6 {
        return Err(Error::InvalidInstruction);
    }
    // Validate label operands up front so a bad id never half-encodes.
    for op in ops {
        if let Operand::Label(label) = op {
            if !code.is_label_valid(*label) {
                return Err(Error::InvalidLabel);
            }
        }
    }

    let is64 = code.arch().arch() == Arch::X64;
    let inst_start = code.section(section)?.buffer().offset();
    let ctx = EmitCtx {
        code,
        section,
        inst_start,
        is64,
        short_jumps: opts.short_jumps,
    };

    let entry = inst::entry(id);
    let row = match entry.rows.iter().find(|row| row_matches(row, ops, &ctx)) {
        Some(row) => row,
        None => {
            // Distinguish "wrong shape" from "right shape, wrong width".
            let kinds_match = entry.rows.iter().any(|row| kinds_match(row, ops));
            return Err(if kinds_match {
                Error::InvalidOperandSize
            } else {
                Error::InvalidInstruction
            });
        }
    };

    if !opts.features.contains(row.feature) {
        return Err(Error::FeatureNotEnabled);
    }
    if opts.lock {
        let mem_dst = matches!(ops.first(), Some(Operand::Mem(_)));
        if row.flags & F_LOCK == 0 || !mem_dst {
            return Err(Error::InvalidCombination);
        }
    }

    log::trace!(
        "emit {} at section {} offset {:#x}",
        entry.name,
        section.0,
        inst_start
    );

    let mut scratch = Scratch::new();
    let mut pending = Pending::new();
    match row.family {
        Family::Legacy => encode_legacy(row, ops, &ctx, opts, &mut scratch, &mut pending)?,
        Family::Vex => encode_vex(row, ops, &ctx, &mut scratch, &mut pending)?,
        Family::Evex => encode_evex(row, ops, &ctx, &mut scratch, &mut pending)?,
    }

    // Commit: append the bytes, then register the staged label references.
    code.section_mut(section)?.buffer_mut().put_bytes(&scratch);
    for item in pending {
        match item {
            PendingRef::Fixup {
                pos,
                kind,
                label,
                addend,
            } => code.add_fixup(label, section, inst_start + pos, kind, addend)?,
            PendingRef::Reloc {
                pos,
                target,
                size,
                addend,
            } => code.add_reloc(Reloc {
                section,
                offset: inst_start + pos,
                target,
                size,
                addend,
            }),
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Signature matching.

fn gp_reg(op: &Operand, size: RegSize) -> Option<Reg> {
    op.as_reg()
        .filter(|r| r.group() == RegGroup::Gp && r.size() == size)
}

fn fixed_gp(op: &Operand, size: RegSize, enc: u8) -> bool {
    gp_reg(op, size).is_some_and(|r| r.enc() == enc)
}

fn vec_reg(op: &Operand, size: RegSize) -> bool {
    op.as_reg()
        .is_some_and(|r| r.group() == RegGroup::Vec && r.size() == size)
}

fn byte_reg(op: &Operand) -> bool {
    op.as_reg().is_some_and(|r| {
        r.group() == RegGroup::Gp && matches!(r.size(), RegSize::Byte | RegSize::HighByte)
    })
}

/// Whether a memory operand satisfies a width-specific pattern.
fn mem_width_ok(mem: &Mem, bytes: u8, row: &InstRow) -> bool {
    mem.size() == bytes || (mem.size() == 0 && row.flags & F_EXPM == 0)
}

/// Projected length of a `D`-encoded row: escape, opcode, relative field.
fn branch_len(row: &InstRow, rel_bytes: u32) -> u32 {
    row.map.escape().len() as u32 + 1 + rel_bytes
}

fn pat_matches(pat: OpPat, op: &Operand, row: &InstRow, ctx: &EmitCtx) -> bool {
    use OpPat::*;
    match pat {
        Al => fixed_gp(op, RegSize::Byte, 0),
        Ax => fixed_gp(op, RegSize::Word, 0),
        Eax => fixed_gp(op, RegSize::Dword, 0),
        Rax => fixed_gp(op, RegSize::Qword, 0),
        Cl => fixed_gp(op, RegSize::Byte, 1),
        One => op.as_imm().is_some_and(|i| i.value() == 1),

        R8 => byte_reg(op),
        R16 => gp_reg(op, RegSize::Word).is_some(),
        R32 => gp_reg(op, RegSize::Dword).is_some(),
        R64 => gp_reg(op, RegSize::Qword).is_some(),

        Rm8 => byte_reg(op) || op.as_mem().is_some_and(|m| mem_width_ok(&m, 1, row)),
        Rm16 => {
            gp_reg(op, RegSize::Word).is_some()
                || op.as_mem().is_some_and(|m| mem_width_ok(&m, 2, row))
        }
        Rm32 => {
            gp_reg(op, RegSize::Dword).is_some()
                || op.as_mem().is_some_and(|m| mem_width_ok(&m, 4, row))
        }
        Rm64 => {
            gp_reg(op, RegSize::Qword).is_some()
                || op.as_mem().is_some_and(|m| mem_width_ok(&m, 8, row))
        }

        M => op.as_mem().is_some(),

        Xmm => vec_reg(op, RegSize::Vec128),
        Ymm => vec_reg(op, RegSize::Vec256),
        Zmm => vec_reg(op, RegSize::Vec512),
        XmmM32 => {
            vec_reg(op, RegSize::Vec128)
                || op.as_mem().is_some_and(|m| mem_width_ok(&m, 4, row))
        }
        XmmM64 => {
            vec_reg(op, RegSize::Vec128)
                || op.as_mem().is_some_and(|m| mem_width_ok(&m, 8, row))
        }
        XmmM128 => {
            vec_reg(op, RegSize::Vec128)
                || op.as_mem().is_some_and(|m| mem_width_ok(&m, 16, row))
        }
        YmmM256 => {
            vec_reg(op, RegSize::Vec256)
                || op.as_mem().is_some_and(|m| mem_width_ok(&m, 32, row))
        }
        ZmmM512 => {
            vec_reg(op, RegSize::Vec512)
                || op.as_mem().is_some_and(|m| mem_width_ok(&m, 64, row))
        }

        Imm8 => op.as_imm().is_some_and(|i| i.fits_i8()),
        Imm16 => op
            .as_imm()
            .is_some_and(|i| i.fits_i16() || (0..=0xFFFF).contains(&i.value())),
        Imm32 => op.as_imm().is_some_and(|i| i.fits_i32() || i.fits_u32()),
        Imm32s => op.as_imm().is_some_and(|i| i.fits_i32()),
        Imm64 => op.as_imm().is_some(),

        Rel8 => match op.as_label() {
            Some(label) => match ctx.bound_here(label) {
                Some(target) => {
                    let end = ctx.inst_start + branch_len(row, 1);
                    i8::try_from(target as i64 - end as i64).is_ok()
                }
                // A label bound in another section can never be patched as
                // rel8 at bind time; only truly unbound labels qualify.
                None => ctx.short_jumps && ctx.code.label_site(label).is_none(),
            },
            None => false,
        },
        Rel32 => op.as_label().is_some(),
    }
}

fn row_matches(row: &InstRow, ops: &[Operand], ctx: &EmitCtx) -> bool {
    if row.flags & F_X64 != 0 && !ctx.is64 {
        return false;
    }
    if row.flags & F_X86 != 0 && ctx.is64 {
        return false;
    }
    if !ctx.is64 {
        // Long-mode-only material: REX.W rows, extended registers, and the
        // REX-addressed low byte registers.
        if row.flags & F_W != 0 {
            return false;
        }
        for op in ops {
            if let Some(r) = op.as_reg() {
                if r.enc() >= 8 || r.size() == RegSize::Qword || r.needs_rex_for_byte() {
                    return false;
                }
            }
            if let Some(m) = op.as_mem() {
                let base_ext = matches!(m.base_kind(), MemBase::Gp(b) if b >= 8);
                if base_ext || m.index().is_some_and(|i| i >= 8) {
                    return false;
                }
            }
        }
    }
    if ops.len() != row.pats.len() {
        return false;
    }
    ops.iter()
        .zip(row.pats)
        .all(|(op, &pat)| pat_matches(pat, op, row, ctx))
}

/// Kind-only match, used to pick `InvalidOperandSize` over
/// `InvalidInstruction` in diagnostics.
fn kinds_match(row: &InstRow, ops: &[Operand]) -> bool {
    use OpPat::*;
    if ops.len() != row.pats.len() {
        return false;
    }
    ops.iter().zip(row.pats).all(|(op, &pat)| match op {
        Operand::Reg(r) => match r.group() {
            RegGroup::Gp => matches!(
                pat,
                Al | Ax | Eax | Rax | Cl | R8 | R16 | R32 | R64 | Rm8 | Rm16 | Rm32 | Rm64
            ),
            RegGroup::Vec => matches!(
                pat,
                Xmm | Ymm | Zmm | XmmM32 | XmmM64 | XmmM128 | YmmM256 | ZmmM512
            ),
            _ => false,
        },
        Operand::Mem(_) => matches!(
            pat,
            Rm8 | Rm16
                | Rm32
                | Rm64
                | M
                | XmmM32
                | XmmM64
                | XmmM128
                | YmmM256
                | ZmmM512
        ),
        Operand::Imm(_) => matches!(pat, One | Imm8 | Imm16 | Imm32 | Imm32s | Imm64),
        Operand::Label(_) => matches!(pat, Rel8 | Rel32),
        Operand::None => false,
    })
}

// ----------------------------------------------------------------------
// Field extraction helpers.

/// Immediate width in bytes implied by the row's patterns.
fn imm_width(row: &InstRow) -> u32 {
    use OpPat::*;
    row.pats
        .iter()
        .map(|p| match p {
            Imm8 => 1,
            Imm16 => 2,
            Imm32 | Imm32s => 4,
            Imm64 => 8,
            _ => 0,
        })
        .sum()
}

/// Whether the row operates on 16-bit data, requiring the 0x66 prefix.
fn needs_operand_size_prefix(row: &InstRow) -> bool {
    matches!(row.pats.first(), Some(OpPat::Ax | OpPat::R16 | OpPat::Rm16))
}

fn push_imm(scratch: &mut Scratch, value: i64, width: u32) {
    let bytes = value.to_le_bytes();
    scratch.extend_from_slice(&bytes[..width as usize]);
}

/// The operand holding the immediate payload, if the row takes one.
fn imm_operand(row: &InstRow, ops: &[Operand]) -> Option<i64> {
    if imm_width(row) == 0 {
        return None;
    }
    ops.iter().rev().find_map(|op| op.as_imm()).map(|i| i.value())
}

// ----------------------------------------------------------------------
// Legacy encoding.

fn encode_legacy(
    row: &InstRow,
    ops: &[Operand],
    ctx: &EmitCtx,
    opts: &EmitOptions,
    scratch: &mut Scratch,
    pending: &mut Pending,
) -> CodeResult<()> {
    // Split the operands into ModR/M roles.
    let (reg_op, rm_op) = match row.enc {
        OpEnc::MR => (ops.get(1), ops.first()),
        OpEnc::RM | OpEnc::RMI => (ops.first(), ops.get(1)),
        OpEnc::M | OpEnc::MI => (None, ops.first()),
        _ => (None, None),
    };

    // Legacy prefixes: LOCK, segment override, operand size, then any
    // mandatory prefix.
    if opts.lock {
        scratch.push(0xF0);
    }
    if let Some(mem) = ops.iter().find_map(|op| op.as_mem()) {
        if let Some(seg) = mem.segment() {
            scratch.push(seg.prefix());
        }
    }
    if needs_operand_size_prefix(row) {
        scratch.push(0x66);
    }
    if let Some(byte) = row.pfx.byte() {
        scratch.push(byte);
    }

    // REX accumulation over the final register ids.
    let mut rex = RexFlags::new();
    if row.flags & F_W != 0 {
        rex.set_w();
    }
    let mut high_byte_used = false;
    for op in ops {
        if let Some(r) = op.as_reg() {
            if r.is_high_byte() {
                high_byte_used = true;
            }
            if r.needs_rex_for_byte() {
                rex.always_emit();
            }
        }
    }
    if let Some(r) = reg_op.and_then(|op| op.as_reg()) {
        rex.set_reg(r.enc());
    }
    match row.enc {
        OpEnc::O | OpEnc::OI => {
            let r = ops[0].as_reg().ok_or(Error::InvalidOperand)?;
            rex.set_base(r.enc());
        }
        _ => {}
    }
    if let Some(rm) = rm_op {
        match rm {
            Operand::Reg(r) => {
                rex.set_base(r.enc());
            }
            Operand::Mem(m) => {
                if let MemBase::Gp(base) = m.base_kind() {
                    rex.set_base(base);
                }
                if let Some(index) = m.index() {
                    rex.set_index(index);
                }
            }
            _ => return Err(Error::InvalidOperand),
        }
    }
    if high_byte_used && rex.must_emit() {
        return Err(Error::InvalidCombination);
    }
    if rex.must_emit() {
        debug_assert!(ctx.is64);
        scratch.push(rex.byte());
    }

    // Escape bytes and opcode, with the register folded into the opcode for
    // O/OI forms.
    scratch.extend_from_slice(row.map.escape());
    match row.enc {
        OpEnc::O | OpEnc::OI => {
            let r = ops[0].as_reg().ok_or(Error::InvalidOperand)?;
            scratch.push(row.opcode + (r.enc() & 7));
        }
        _ => scratch.push(row.opcode),
    }

    // ModR/M, SIB and displacement.
    let imm_bytes = imm_width(row) as u8;
    if let Some(rm) = rm_op {
        let reg_field = match reg_op.and_then(|op| op.as_reg()) {
            Some(r) => r.enc(),
            None => row.digit,
        };
        match rm {
            Operand::Reg(r) => {
                scratch.push(encode_modrm(0b11, reg_field & 7, r.enc() & 7));
            }
            Operand::Mem(m) => {
                emit_mem(scratch, pending, ctx, reg_field, *m, imm_bytes, None)?;
            }
            _ => return Err(Error::InvalidOperand),
        }
    }

    // Relative label field for branches.
    if row.enc == OpEnc::D {
        let label = ops[0].as_label().ok_or(Error::InvalidOperand)?;
        let rel8 = matches!(row.pats, [OpPat::Rel8]);
        emit_rel(scratch, pending, ctx, label, rel8)?;
    }

    // Immediate.
    if let Some(value) = imm_operand(row, ops) {
        push_imm(scratch, value, imm_width(row));
    }
    Ok(())
}

// ----------------------------------------------------------------------
// VEX encoding.

/// Split operands into (reg, vvvv, rm) roles for a VEX/EVEX row.
fn vector_roles<'a>(
    row: &InstRow,
    ops: &'a [Operand],
) -> CodeResult<(Reg, u8, &'a Operand)> {
    match row.enc {
        OpEnc::Rvm => {
            let reg = ops[0].as_reg().ok_or(Error::InvalidOperand)?;
            let vvvv = ops[1].as_reg().ok_or(Error::InvalidOperand)?.enc();
            Ok((reg, vvvv, &ops[2]))
        }
        OpEnc::RM => {
            let reg = ops[0].as_reg().ok_or(Error::InvalidOperand)?;
            Ok((reg, 0, &ops[1]))
        }
        OpEnc::MR => {
            let reg = ops[1].as_reg().ok_or(Error::InvalidOperand)?;
            Ok((reg, 0, &ops[0]))
        }
        _ => Err(Error::InvalidInstruction),
    }
}

/// Vector length from the row's first register pattern: 0=128, 1=256, 2=512.
fn vector_length(row: &InstRow) -> u8 {
    use OpPat::*;
    row.pats
        .iter()
        .map(|p| match p {
            Ymm | YmmM256 => 1,
            Zmm | ZmmM512 => 2,
            _ => 0,
        })
        .max()
        .unwrap_or(0)
}

/// The (base, index) pair feeding the prefix's B and X bits.
fn rm_bx(rm: &Operand) -> (Option<u8>, Option<u8>) {
    match rm {
        Operand::Reg(r) => (Some(r.enc()), None),
        Operand::Mem(m) => {
            let base = match m.base_kind() {
                MemBase::Gp(b) => Some(b),
                _ => None,
            };
            (base, m.index())
        }
        _ => (None, None),
    }
}

fn encode_vex(
    row: &InstRow,
    ops: &[Operand],
    ctx: &EmitCtx,
    scratch: &mut Scratch,
    pending: &mut Pending,
) -> CodeResult<()> {
    let (reg, vvvv, rm) = vector_roles(row, ops)?;
    // VEX register fields are four bits; xmm16+ would need EVEX.
    for op in ops {
        if let Some(r) = op.as_reg() {
            if r.enc() >= 16 {
                return Err(Error::InvalidOperand);
            }
        }
    }
    if let Some(mem) = ops.iter().find_map(|op| op.as_mem()) {
        if let Some(seg) = mem.segment() {
            scratch.push(seg.prefix());
        }
    }

    let (b, x) = rm_bx(rm);
    let prefix = VexPrefix::new(
        reg.enc(),
        vvvv,
        (b, x),
        vector_length(row),
        row.pfx.pp(),
        row.map.mm(),
        row.flags & F_W != 0,
    );
    prefix.encode(scratch);
    scratch.push(row.opcode);

    match rm {
        Operand::Reg(r) => scratch.push(encode_modrm(0b11, reg.enc() & 7, r.enc() & 7)),
        Operand::Mem(m) => emit_mem(scratch, pending, ctx, reg.enc(), *m, 0, None)?,
        _ => return Err(Error::InvalidOperand),
    }
    Ok(())
}

// ----------------------------------------------------------------------
// EVEX encoding.

fn encode_evex(
    row: &InstRow,
    ops: &[Operand],
    ctx: &EmitCtx,
    scratch: &mut Scratch,
    pending: &mut Pending,
) -> CodeResult<()> {
    let (reg, vvvv, rm) = vector_roles(row, ops)?;
    if let Some(mem) = ops.iter().find_map(|op| op.as_mem()) {
        // EVEX memory addressing uses GP registers, which stay below 16.
        if let MemBase::Gp(b) = mem.base_kind() {
            if b >= 16 {
                return Err(Error::InvalidOperand);
            }
        }
        if let Some(seg) = mem.segment() {
            scratch.push(seg.prefix());
        }
    }

    let ll = vector_length(row);
    let (b, x) = rm_bx(rm);
    let mut prefix = EvexPrefix::new(
        reg.enc(),
        vvvv,
        (b, x),
        ll,
        row.pfx.pp(),
        row.map.mm(),
        row.flags & F_W != 0,
    );
    if let Operand::Reg(r) = rm {
        prefix = prefix.with_rm_high_bit(r.enc());
    }
    prefix.encode(scratch);
    scratch.push(row.opcode);

    match rm {
        Operand::Reg(r) => scratch.push(encode_modrm(0b11, reg.enc() & 7, r.enc() & 7)),
        Operand::Mem(m) => {
            emit_mem(scratch, pending, ctx, reg.enc(), *m, 0, Some(disp8_scale(ll)))?
        }
        _ => return Err(Error::InvalidOperand),
    }
    Ok(())
}

// ----------------------------------------------------------------------
// ModR/M + SIB + displacement for memory operands.

/// Classify a displacement, honoring EVEX disp8*N compression.
fn classify_disp(value: i32, evex_scale: Option<i8>) -> Disp {
    match evex_scale {
        Some(scale) => {
            if value == 0 {
                Disp::None
            } else if value % i32::from(scale) == 0
                && i8::try_from(value / i32::from(scale)).is_ok()
            {
                Disp::Byte((value / i32::from(scale)) as i8)
            } else {
                Disp::Dword(value)
            }
        }
        None => Disp::classify(value),
    }
}

fn push_disp(scratch: &mut Scratch, disp: Disp) {
    match disp {
        Disp::None => {}
        Disp::Byte(b) => scratch.push(b as u8),
        Disp::Dword(d) => scratch.extend_from_slice(&d.to_le_bytes()),
    }
}

/// Encode the ModR/M byte, optional SIB, and displacement for `mem`, with
/// `reg_field` in ModRM.reg. `bytes_at_end` is the number of immediate bytes
/// that will follow the displacement; RIP-relative targets are relative to
/// the end of the instruction, so the compensation is folded into the
/// displacement field.
fn emit_mem(
    scratch: &mut Scratch,
    pending: &mut Pending,
    ctx: &EmitCtx,
    reg_field: u8,
    mem: Mem,
    bytes_at_end: u8,
    evex_scale: Option<i8>,
) -> CodeResult<()> {
    const RSP: u8 = 4;
    const RBP: u8 = 5;
    let g = reg_field & 7;

    match mem.base_kind() {
        MemBase::Gp(base) => {
            if let Some(index) = mem.index() {
                // The encoding of ModRM/SIB never allows rsp as an index;
                // r12 is fine because REX.X disambiguates it.
                if index == RSP {
                    return Err(Error::InvalidOperand);
                }
                let mut disp = classify_disp(mem.disp(), evex_scale);
                if base & 7 == RBP {
                    disp = disp.force_byte();
                }
                scratch.push(encode_modrm(disp.m0d(), g, 0b100));
                scratch.push(encode_sib(mem.scale().enc(), index & 7, base & 7));
                push_disp(scratch, disp);
            } else if base & 7 == RSP {
                // rsp/r12 as base require a SIB byte with index=100 (none).
                let disp = classify_disp(mem.disp(), evex_scale);
                scratch.push(encode_modrm(disp.m0d(), g, 0b100));
                scratch.push(encode_sib(0, 0b100, 0b100));
                push_disp(scratch, disp);
            } else {
                // rbp/r13 have no mod=00 form; force a zero disp8.
                let mut disp = classify_disp(mem.disp(), evex_scale);
                if base & 7 == RBP {
                    disp = disp.force_byte();
                }
                scratch.push(encode_modrm(disp.m0d(), g, base & 7));
                push_disp(scratch, disp);
            }
        }

        MemBase::Label(label) => {
            if !ctx.code.is_label_valid(label) {
                return Err(Error::InvalidLabel);
            }
            if ctx.is64 {
                // RIP-relative: mod=00, rm=101, disp32 relative to the end
                // of the instruction.
                scratch.push(encode_modrm(0b00, g, 0b101));
                let pos = scratch.len() as u32;
                match ctx.bound_here(label) {
                    Some(target) => {
                        let end = ctx.inst_start as i64 + pos as i64 + 4 + bytes_at_end as i64;
                        let value = target as i64 + mem.disp() as i64 - end;
                        let value =
                            i32::try_from(value).map_err(|_| Error::BranchTooFar)?;
                        scratch.extend_from_slice(&value.to_le_bytes());
                    }
                    None => {
                        scratch.extend_from_slice(&[0; 4]);
                        let addend = mem
                            .disp()
                            .checked_sub(i32::from(bytes_at_end))
                            .ok_or(Error::InvalidOperand)?;
                        match ctx.code.label_site(label) {
                            // Bound in another section: layout will know.
                            Some(_) => pending.push(PendingRef::Reloc {
                                pos,
                                target: RelocTarget::RelToLabel(label),
                                size: 4,
                                addend: addend.into(),
                            }),
                            None => pending.push(PendingRef::Fixup {
                                pos,
                                kind: FixupKind::Rel32,
                                label,
                                addend,
                            }),
                        }
                    }
                }
            } else {
                // 32-bit mode: absolute disp32, patched at layout.
                scratch.push(encode_modrm(0b00, g, 0b101));
                let pos = scratch.len() as u32;
                scratch.extend_from_slice(&[0; 4]);
                pending.push(PendingRef::Reloc {
                    pos,
                    target: RelocTarget::AbsToLabel(label),
                    size: 4,
                    addend: mem.disp().into(),
                });
            }
        }

        MemBase::None => {
            // Absolute displacement. Long mode requires the SIB form to
            // distinguish it from RIP-relative.
            if ctx.is64 {
                scratch.push(encode_modrm(0b00, g, 0b100));
                scratch.push(encode_sib(0, 0b100, 0b101));
            } else {
                scratch.push(encode_modrm(0b00, g, 0b101));
            }
            scratch.extend_from_slice(&mem.disp().to_le_bytes());
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// PC-relative branch fields.

fn emit_rel(
    scratch: &mut Scratch,
    pending: &mut Pending,
    ctx: &EmitCtx,
    label: Label,
    rel8: bool,
) -> CodeResult<()> {
    let pos = scratch.len() as u32;
    let size: u32 = if rel8 { 1 } else { 4 };
    match ctx.bound_here(label) {
        Some(target) => {
            let end = ctx.inst_start as i64 + pos as i64 + size as i64;
            let disp = target as i64 - end;
            if rel8 {
                let disp = i8::try_from(disp).map_err(|_| Error::BranchTooFar)?;
                scratch.push(disp as u8);
            } else {
                let disp = i32::try_from(disp).map_err(|_| Error::BranchTooFar)?;
                scratch.extend_from_slice(&disp.to_le_bytes());
            }
        }
        None => {
            if rel8 {
                scratch.push(0);
            } else {
                scratch.extend_from_slice(&[0; 4]);
            }
            match ctx.code.label_site(label) {
                // Bound in another section; resolved once bases are known.
                Some(_) => pending.push(PendingRef::Reloc {
                    pos,
                    target: RelocTarget::RelToLabel(label),
                    size: size as u8,
                    addend: 0,
                }),
                None => pending.push(PendingRef::Fixup {
                    pos,
                    kind: if rel8 { FixupKind::Rel8 } else { FixupKind::Rel32 },
                    label,
                    addend: 0,
                }),
            }
        }
    }
    Ok(())
}
