//! The x64 instruction table.
//!
//! Every encodable instruction has an [`InstId`] and an [`InstEntry`] whose
//! rows describe one encoding each: the operand signature, the encoding
//! family and its prefix/map/opcode bytes, the ModR/M arrangement, and the
//! CPU feature the row requires. Rows are ordered smallest-encoding-first;
//! the encoder scans them in order and takes the first match, which
//! implements the "prefer the shortest form" tie-break.

use crate::arch::Feature;

/// Instruction identifiers known to the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum InstId {
    // Data movement.
    Mov,
    Movzx,
    Movsx,
    Movsxd,
    Lea,
    Push,
    Pop,

    // Integer ALU.
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
    Test,
    Inc,
    Dec,
    Neg,
    Not,
    Mul,
    Imul,
    Div,
    Idiv,
    Shl,
    Shr,
    Sar,
    Rol,
    Ror,
    Cdq,
    Cqo,

    // Control flow.
    Call,
    Jmp,
    Ret,
    Nop,
    Int3,
    Ud2,
    Jo,
    Jno,
    Jb,
    Jae,
    Je,
    Jne,
    Jbe,
    Ja,
    Js,
    Jns,
    Jp,
    Jnp,
    Jl,
    Jge,
    Jle,
    Jg,

    // SSE/SSE2.
    Movaps,
    Movups,
    Movss,
    Movsd,
    Movdqa,
    Movdqu,
    Movd,
    Movq,
    Addps,
    Addpd,
    Addss,
    Addsd,
    Subps,
    Subpd,
    Subss,
    Subsd,
    Mulps,
    Mulpd,
    Mulss,
    Mulsd,
    Divps,
    Divpd,
    Divss,
    Divsd,
    Pand,
    Por,
    Pxor,
    Paddb,
    Paddw,
    Paddd,
    Paddq,
    Psubd,
    Ucomiss,
    Ucomisd,

    // AVX (VEX-encoded).
    Vaddps,
    Vaddpd,
    Vaddss,
    Vaddsd,
    Vsubps,
    Vsubpd,
    Vmulps,
    Vmulpd,
    Vmovaps,
    Vmovups,
    Vmovdqu,
    Vpand,
    Vpor,
    Vpxor,
    Vpaddd,

    // AVX-512 (EVEX-encoded).
    Vmovdqu32,
    Vmovdqu64,
}

/// One operand of a row's signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpPat {
    // Fixed registers.
    Al,
    Ax,
    Eax,
    Rax,
    Cl,
    /// The literal immediate 1 (short shift forms).
    One,

    // General-purpose registers, exact width.
    R8,
    R16,
    R32,
    R64,

    // Register or memory, by width.
    Rm8,
    Rm16,
    Rm32,
    Rm64,

    /// Any memory operand, width irrelevant (lea).
    M,

    // Vector registers and reg-or-mem forms.
    Xmm,
    XmmM32,
    XmmM64,
    XmmM128,
    Ymm,
    YmmM256,
    Zmm,
    ZmmM512,

    // Immediates.
    /// Strictly sign-extendable byte.
    Imm8,
    Imm16,
    /// 32 bits; also accepts unsigned values for 32-bit destinations.
    Imm32,
    /// 32 bits sign-extended to 64; strict.
    Imm32s,
    Imm64,

    // Code-relative label references.
    Rel8,
    Rel32,
}

/// How operands map onto ModR/M and immediate fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpEnc {
    /// No explicit operands, or immediate-only with an implicit register.
    None,
    /// Implicit accumulator, immediate payload.
    I,
    /// One PC-relative label operand.
    D,
    /// ModRM.rm = op0, opcode digit in ModRM.reg.
    M,
    /// ModRM.rm = op0, digit, immediate = op1.
    MI,
    /// ModRM.rm = op0, ModRM.reg = op1.
    MR,
    /// ModRM.reg = op0, ModRM.rm = op1.
    RM,
    /// ModRM.reg = op0, ModRM.rm = op1, immediate = op2.
    RMI,
    /// Register in opcode low bits = op0.
    O,
    /// Register in opcode low bits = op0, immediate = op1.
    OI,
    /// VEX/EVEX: ModRM.reg = op0, vvvv = op1, ModRM.rm = op2.
    Rvm,
}

/// Prefix/escape family of a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Family {
    Legacy,
    Vex,
    Evex,
}

/// Mandatory prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pfx {
    None,
    P66,
    PF3,
    PF2,
}

impl Pfx {
    /// The `pp` field value in VEX/EVEX encodings.
    pub fn pp(self) -> u8 {
        match self {
            Pfx::None => 0b00,
            Pfx::P66 => 0b01,
            Pfx::PF3 => 0b10,
            Pfx::PF2 => 0b11,
        }
    }

    /// The legacy prefix byte, if any.
    pub fn byte(self) -> Option<u8> {
        match self {
            Pfx::None => None,
            Pfx::P66 => Some(0x66),
            Pfx::PF3 => Some(0xF3),
            Pfx::PF2 => Some(0xF2),
        }
    }
}

/// Opcode map (escape bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Map {
    One,
    M0F,
    M0F38,
    M0F3A,
}

impl Map {
    /// Escape bytes emitted before the opcode in legacy encodings.
    pub fn escape(self) -> &'static [u8] {
        match self {
            Map::One => &[],
            Map::M0F => &[0x0F],
            Map::M0F38 => &[0x0F, 0x38],
            Map::M0F3A => &[0x0F, 0x3A],
        }
    }

    /// The `mmmmm`/`mm` field value in VEX/EVEX encodings.
    pub fn mm(self) -> u8 {
        match self {
            Map::One => 0,
            Map::M0F => 0b01,
            Map::M0F38 => 0b10,
            Map::M0F3A => 0b11,
        }
    }
}

// Row flags.
/// Set REX.W / VEX.W / EVEX.W.
pub(crate) const F_W: u16 = 1 << 0;
/// A LOCK prefix may be applied when the destination is memory.
pub(crate) const F_LOCK: u16 = 1 << 1;
/// Operand defaults to 64 bits in long mode; no REX.W required.
pub(crate) const F_D64: u16 = 1 << 2;
/// Memory operands must carry an explicit size (widening moves and
/// digit-selected forms with no register to fix the width).
pub(crate) const F_EXPM: u16 = 1 << 3;
/// Row only matches in 64-bit mode.
pub(crate) const F_X64: u16 = 1 << 4;
/// Row only matches in 32-bit mode.
pub(crate) const F_X86: u16 = 1 << 5;

/// One encoding of an instruction.
#[derive(Clone, Copy, Debug)]
pub(crate) struct InstRow {
    pub pats: &'static [OpPat],
    pub enc: OpEnc,
    pub family: Family,
    pub pfx: Pfx,
    pub map: Map,
    pub opcode: u8,
    /// ModRM.reg digit for M/MI encodings.
    pub digit: u8,
    pub flags: u16,
    pub feature: Feature,
}

/// The table entry of one [`InstId`].
#[derive(Debug)]
pub(crate) struct InstEntry {
    pub name: &'static str,
    pub rows: &'static [InstRow],
}

/// Row template: legacy one-byte map, no prefix, no flags.
const R: InstRow = InstRow {
    pats: &[],
    enc: OpEnc::None,
    family: Family::Legacy,
    pfx: Pfx::None,
    map: Map::One,
    opcode: 0,
    digit: 0,
    flags: 0,
    feature: Feature::Baseline,
};

use OpPat::*;

/// Generate the standard 19-row group-1 ALU entry (`add`, `sub`, ...).
/// `$base` is the 0x00-relative opcode base, `$digit` the 0x80-group digit.
macro_rules! alu_entry {
    ($name:literal, $base:expr, $digit:expr, $lock:expr) => {
        InstEntry {
            name: $name,
            rows: &[
                InstRow { pats: &[Al, Imm8], enc: OpEnc::I, opcode: $base + 0x04, ..R },
                InstRow { pats: &[Rm8, R8], enc: OpEnc::MR, opcode: $base, flags: $lock, ..R },
                InstRow { pats: &[R8, Rm8], enc: OpEnc::RM, opcode: $base + 0x02, ..R },
                InstRow { pats: &[Rm8, Imm8], enc: OpEnc::MI, opcode: 0x80, digit: $digit, flags: F_EXPM | $lock, ..R },
                InstRow { pats: &[Rm16, Imm8], enc: OpEnc::MI, opcode: 0x83, digit: $digit, flags: F_EXPM | $lock, ..R },
                InstRow { pats: &[Rm32, Imm8], enc: OpEnc::MI, opcode: 0x83, digit: $digit, flags: F_EXPM | $lock, ..R },
                InstRow { pats: &[Rm64, Imm8], enc: OpEnc::MI, opcode: 0x83, digit: $digit, flags: F_W | F_EXPM | $lock, ..R },
                InstRow { pats: &[Ax, Imm16], enc: OpEnc::I, opcode: $base + 0x05, ..R },
                InstRow { pats: &[Eax, Imm32], enc: OpEnc::I, opcode: $base + 0x05, ..R },
                InstRow { pats: &[Rax, Imm32s], enc: OpEnc::I, opcode: $base + 0x05, flags: F_W, ..R },
                InstRow { pats: &[Rm16, R16], enc: OpEnc::MR, opcode: $base + 0x01, flags: $lock, ..R },
                InstRow { pats: &[Rm32, R32], enc: OpEnc::MR, opcode: $base + 0x01, flags: $lock, ..R },
                InstRow { pats: &[Rm64, R64], enc: OpEnc::MR, opcode: $base + 0x01, flags: F_W | $lock, ..R },
                InstRow { pats: &[R16, Rm16], enc: OpEnc::RM, opcode: $base + 0x03, ..R },
                InstRow { pats: &[R32, Rm32], enc: OpEnc::RM, opcode: $base + 0x03, ..R },
                InstRow { pats: &[R64, Rm64], enc: OpEnc::RM, opcode: $base + 0x03, flags: F_W, ..R },
                InstRow { pats: &[Rm16, Imm16], enc: OpEnc::MI, opcode: 0x81, digit: $digit, flags: F_EXPM | $lock, ..R },
                InstRow { pats: &[Rm32, Imm32], enc: OpEnc::MI, opcode: 0x81, digit: $digit, flags: F_EXPM | $lock, ..R },
                InstRow { pats: &[Rm64, Imm32s], enc: OpEnc::MI, opcode: 0x81, digit: $digit, flags: F_W | F_EXPM | $lock, ..R },
            ],
        }
    };
}

/// Generate a shift/rotate entry from its 0xC0-group digit.
macro_rules! shift_entry {
    ($name:literal, $digit:expr) => {
        InstEntry {
            name: $name,
            rows: &[
                InstRow { pats: &[Rm8, One], enc: OpEnc::M, opcode: 0xD0, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm16, One], enc: OpEnc::M, opcode: 0xD1, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm32, One], enc: OpEnc::M, opcode: 0xD1, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm64, One], enc: OpEnc::M, opcode: 0xD1, digit: $digit, flags: F_W | F_EXPM, ..R },
                InstRow { pats: &[Rm8, Cl], enc: OpEnc::M, opcode: 0xD2, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm16, Cl], enc: OpEnc::M, opcode: 0xD3, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm32, Cl], enc: OpEnc::M, opcode: 0xD3, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm64, Cl], enc: OpEnc::M, opcode: 0xD3, digit: $digit, flags: F_W | F_EXPM, ..R },
                InstRow { pats: &[Rm8, Imm8], enc: OpEnc::MI, opcode: 0xC0, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm16, Imm8], enc: OpEnc::MI, opcode: 0xC1, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm32, Imm8], enc: OpEnc::MI, opcode: 0xC1, digit: $digit, flags: F_EXPM, ..R },
                InstRow { pats: &[Rm64, Imm8], enc: OpEnc::MI, opcode: 0xC1, digit: $digit, flags: F_W | F_EXPM, ..R },
            ],
        }
    };
}

/// Generate a unary group-3/group-4 entry (`neg`, `not`, `inc`, ...).
macro_rules! unary_entry {
    ($name:literal, $op8:expr, $op:expr, $digit:expr, $lock:expr) => {
        InstEntry {
            name: $name,
            rows: &[
                InstRow { pats: &[Rm8], enc: OpEnc::M, opcode: $op8, digit: $digit, flags: F_EXPM | $lock, ..R },
                InstRow { pats: &[Rm16], enc: OpEnc::M, opcode: $op, digit: $digit, flags: F_EXPM | $lock, ..R },
                InstRow { pats: &[Rm32], enc: OpEnc::M, opcode: $op, digit: $digit, flags: F_EXPM | $lock, ..R },
                InstRow { pats: &[Rm64], enc: OpEnc::M, opcode: $op, digit: $digit, flags: F_W | F_EXPM | $lock, ..R },
            ],
        }
    };
}

/// Generate a two-row conditional-jump entry from the condition code.
macro_rules! jcc_entry {
    ($name:literal, $cc:expr) => {
        InstEntry {
            name: $name,
            rows: &[
                InstRow { pats: &[Rel8], enc: OpEnc::D, opcode: 0x70 + $cc, ..R },
                InstRow { pats: &[Rel32], enc: OpEnc::D, map: Map::M0F, opcode: 0x80 + $cc, ..R },
            ],
        }
    };
}

/// Generate an SSE packed/scalar arithmetic entry: `xmm, xmm/mN`.
macro_rules! sse_rm_entry {
    ($name:literal, $pfx:expr, $opcode:expr, $rm:expr, $feature:expr) => {
        InstEntry {
            name: $name,
            rows: &[InstRow {
                pats: &[Xmm, $rm],
                enc: OpEnc::RM,
                pfx: $pfx,
                map: Map::M0F,
                opcode: $opcode,
                feature: $feature,
                ..R
            }],
        }
    };
}

/// Generate an AVX three-operand entry over XMM and YMM, VEX-encoded.
macro_rules! avx_rvm_entry {
    ($name:literal, $pfx:expr, $opcode:expr, $wide_feature:expr) => {
        InstEntry {
            name: $name,
            rows: &[
                InstRow {
                    pats: &[Xmm, Xmm, XmmM128],
                    enc: OpEnc::Rvm,
                    family: Family::Vex,
                    pfx: $pfx,
                    map: Map::M0F,
                    opcode: $opcode,
                    feature: Feature::Avx,
                    ..R
                },
                InstRow {
                    pats: &[Ymm, Ymm, YmmM256],
                    enc: OpEnc::Rvm,
                    family: Family::Vex,
                    pfx: $pfx,
                    map: Map::M0F,
                    opcode: $opcode,
                    feature: $wide_feature,
                    ..R
                },
            ],
        }
    };
}

static MOV: InstEntry = InstEntry {
    name: "mov",
    rows: &[
        InstRow { pats: &[Rm8, R8], enc: OpEnc::MR, opcode: 0x88, ..R },
        InstRow { pats: &[R8, Rm8], enc: OpEnc::RM, opcode: 0x8A, ..R },
        InstRow { pats: &[Rm16, R16], enc: OpEnc::MR, opcode: 0x89, ..R },
        InstRow { pats: &[Rm32, R32], enc: OpEnc::MR, opcode: 0x89, ..R },
        InstRow { pats: &[Rm64, R64], enc: OpEnc::MR, opcode: 0x89, flags: F_W, ..R },
        InstRow { pats: &[R16, Rm16], enc: OpEnc::RM, opcode: 0x8B, ..R },
        InstRow { pats: &[R32, Rm32], enc: OpEnc::RM, opcode: 0x8B, ..R },
        InstRow { pats: &[R64, Rm64], enc: OpEnc::RM, opcode: 0x8B, flags: F_W, ..R },
        InstRow { pats: &[R8, Imm8], enc: OpEnc::OI, opcode: 0xB0, ..R },
        InstRow { pats: &[R16, Imm16], enc: OpEnc::OI, opcode: 0xB8, ..R },
        InstRow { pats: &[R32, Imm32], enc: OpEnc::OI, opcode: 0xB8, ..R },
        InstRow { pats: &[Rm8, Imm8], enc: OpEnc::MI, opcode: 0xC6, digit: 0, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm16, Imm16], enc: OpEnc::MI, opcode: 0xC7, digit: 0, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm32, Imm32], enc: OpEnc::MI, opcode: 0xC7, digit: 0, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm64, Imm32s], enc: OpEnc::MI, opcode: 0xC7, digit: 0, flags: F_W | F_EXPM, ..R },
        InstRow { pats: &[R64, Imm64], enc: OpEnc::OI, opcode: 0xB8, flags: F_W, ..R },
    ],
};

static MOVZX: InstEntry = InstEntry {
    name: "movzx",
    rows: &[
        InstRow { pats: &[R16, Rm8], enc: OpEnc::RM, map: Map::M0F, opcode: 0xB6, flags: F_EXPM, ..R },
        InstRow { pats: &[R32, Rm8], enc: OpEnc::RM, map: Map::M0F, opcode: 0xB6, flags: F_EXPM, ..R },
        InstRow { pats: &[R64, Rm8], enc: OpEnc::RM, map: Map::M0F, opcode: 0xB6, flags: F_W | F_EXPM, ..R },
        InstRow { pats: &[R32, Rm16], enc: OpEnc::RM, map: Map::M0F, opcode: 0xB7, flags: F_EXPM, ..R },
        InstRow { pats: &[R64, Rm16], enc: OpEnc::RM, map: Map::M0F, opcode: 0xB7, flags: F_W | F_EXPM, ..R },
    ],
};

static MOVSX: InstEntry = InstEntry {
    name: "movsx",
    rows: &[
        InstRow { pats: &[R16, Rm8], enc: OpEnc::RM, map: Map::M0F, opcode: 0xBE, flags: F_EXPM, ..R },
        InstRow { pats: &[R32, Rm8], enc: OpEnc::RM, map: Map::M0F, opcode: 0xBE, flags: F_EXPM, ..R },
        InstRow { pats: &[R64, Rm8], enc: OpEnc::RM, map: Map::M0F, opcode: 0xBE, flags: F_W | F_EXPM, ..R },
        InstRow { pats: &[R32, Rm16], enc: OpEnc::RM, map: Map::M0F, opcode: 0xBF, flags: F_EXPM, ..R },
        InstRow { pats: &[R64, Rm16], enc: OpEnc::RM, map: Map::M0F, opcode: 0xBF, flags: F_W | F_EXPM, ..R },
    ],
};

static MOVSXD: InstEntry = InstEntry {
    name: "movsxd",
    rows: &[InstRow { pats: &[R64, Rm32], enc: OpEnc::RM, opcode: 0x63, flags: F_W | F_X64, ..R }],
};

static LEA: InstEntry = InstEntry {
    name: "lea",
    rows: &[
        InstRow { pats: &[R32, M], enc: OpEnc::RM, opcode: 0x8D, ..R },
        InstRow { pats: &[R64, M], enc: OpEnc::RM, opcode: 0x8D, flags: F_W, ..R },
    ],
};

static PUSH: InstEntry = InstEntry {
    name: "push",
    rows: &[
        InstRow { pats: &[R64], enc: OpEnc::O, opcode: 0x50, flags: F_D64 | F_X64, ..R },
        InstRow { pats: &[R32], enc: OpEnc::O, opcode: 0x50, flags: F_X86, ..R },
        InstRow { pats: &[Imm8], enc: OpEnc::I, opcode: 0x6A, flags: F_D64, ..R },
        InstRow { pats: &[Imm32s], enc: OpEnc::I, opcode: 0x68, flags: F_D64, ..R },
        InstRow { pats: &[Rm64], enc: OpEnc::M, opcode: 0xFF, digit: 6, flags: F_D64 | F_EXPM | F_X64, ..R },
        InstRow { pats: &[Rm32], enc: OpEnc::M, opcode: 0xFF, digit: 6, flags: F_EXPM | F_X86, ..R },
    ],
};

static POP: InstEntry = InstEntry {
    name: "pop",
    rows: &[
        InstRow { pats: &[R64], enc: OpEnc::O, opcode: 0x58, flags: F_D64 | F_X64, ..R },
        InstRow { pats: &[R32], enc: OpEnc::O, opcode: 0x58, flags: F_X86, ..R },
        InstRow { pats: &[Rm64], enc: OpEnc::M, opcode: 0x8F, digit: 0, flags: F_D64 | F_EXPM | F_X64, ..R },
    ],
};

static ADD: InstEntry = alu_entry!("add", 0x00, 0, F_LOCK);
static OR: InstEntry = alu_entry!("or", 0x08, 1, F_LOCK);
static ADC: InstEntry = alu_entry!("adc", 0x10, 2, F_LOCK);
static SBB: InstEntry = alu_entry!("sbb", 0x18, 3, F_LOCK);
static AND: InstEntry = alu_entry!("and", 0x20, 4, F_LOCK);
static SUB: InstEntry = alu_entry!("sub", 0x28, 5, F_LOCK);
static XOR: InstEntry = alu_entry!("xor", 0x30, 6, F_LOCK);
static CMP: InstEntry = alu_entry!("cmp", 0x38, 7, 0);

static TEST: InstEntry = InstEntry {
    name: "test",
    rows: &[
        InstRow { pats: &[Al, Imm8], enc: OpEnc::I, opcode: 0xA8, ..R },
        InstRow { pats: &[Rm8, R8], enc: OpEnc::MR, opcode: 0x84, ..R },
        InstRow { pats: &[Rm16, R16], enc: OpEnc::MR, opcode: 0x85, ..R },
        InstRow { pats: &[Rm32, R32], enc: OpEnc::MR, opcode: 0x85, ..R },
        InstRow { pats: &[Rm64, R64], enc: OpEnc::MR, opcode: 0x85, flags: F_W, ..R },
        InstRow { pats: &[Ax, Imm16], enc: OpEnc::I, opcode: 0xA9, ..R },
        InstRow { pats: &[Eax, Imm32], enc: OpEnc::I, opcode: 0xA9, ..R },
        InstRow { pats: &[Rax, Imm32s], enc: OpEnc::I, opcode: 0xA9, flags: F_W, ..R },
        InstRow { pats: &[Rm8, Imm8], enc: OpEnc::MI, opcode: 0xF6, digit: 0, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm16, Imm16], enc: OpEnc::MI, opcode: 0xF7, digit: 0, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm32, Imm32], enc: OpEnc::MI, opcode: 0xF7, digit: 0, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm64, Imm32s], enc: OpEnc::MI, opcode: 0xF7, digit: 0, flags: F_W | F_EXPM, ..R },
    ],
};

static INC: InstEntry = unary_entry!("inc", 0xFE, 0xFF, 0, F_LOCK);
static DEC: InstEntry = unary_entry!("dec", 0xFE, 0xFF, 1, F_LOCK);
static NOT: InstEntry = unary_entry!("not", 0xF6, 0xF7, 2, F_LOCK);
static NEG: InstEntry = unary_entry!("neg", 0xF6, 0xF7, 3, F_LOCK);
static MUL: InstEntry = unary_entry!("mul", 0xF6, 0xF7, 4, 0);
static DIV: InstEntry = unary_entry!("div", 0xF6, 0xF7, 6, 0);
static IDIV: InstEntry = unary_entry!("idiv", 0xF6, 0xF7, 7, 0);

static IMUL: InstEntry = InstEntry {
    name: "imul",
    rows: &[
        InstRow { pats: &[R16, Rm16, Imm8], enc: OpEnc::RMI, opcode: 0x6B, ..R },
        InstRow { pats: &[R32, Rm32, Imm8], enc: OpEnc::RMI, opcode: 0x6B, ..R },
        InstRow { pats: &[R64, Rm64, Imm8], enc: OpEnc::RMI, opcode: 0x6B, flags: F_W, ..R },
        InstRow { pats: &[R16, Rm16], enc: OpEnc::RM, map: Map::M0F, opcode: 0xAF, ..R },
        InstRow { pats: &[R32, Rm32], enc: OpEnc::RM, map: Map::M0F, opcode: 0xAF, ..R },
        InstRow { pats: &[R64, Rm64], enc: OpEnc::RM, map: Map::M0F, opcode: 0xAF, flags: F_W, ..R },
        InstRow { pats: &[R16, Rm16, Imm16], enc: OpEnc::RMI, opcode: 0x69, ..R },
        InstRow { pats: &[R32, Rm32, Imm32], enc: OpEnc::RMI, opcode: 0x69, ..R },
        InstRow { pats: &[R64, Rm64, Imm32s], enc: OpEnc::RMI, opcode: 0x69, flags: F_W, ..R },
        InstRow { pats: &[Rm8], enc: OpEnc::M, opcode: 0xF6, digit: 5, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm16], enc: OpEnc::M, opcode: 0xF7, digit: 5, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm32], enc: OpEnc::M, opcode: 0xF7, digit: 5, flags: F_EXPM, ..R },
        InstRow { pats: &[Rm64], enc: OpEnc::M, opcode: 0xF7, digit: 5, flags: F_W | F_EXPM, ..R },
    ],
};

static SHL: InstEntry = shift_entry!("shl", 4);
static SHR: InstEntry = shift_entry!("shr", 5);
static SAR: InstEntry = shift_entry!("sar", 7);
static ROL: InstEntry = shift_entry!("rol", 0);
static ROR: InstEntry = shift_entry!("ror", 1);

static CDQ: InstEntry = InstEntry {
    name: "cdq",
    rows: &[InstRow { enc: OpEnc::None, opcode: 0x99, ..R }],
};

static CQO: InstEntry = InstEntry {
    name: "cqo",
    rows: &[InstRow { enc: OpEnc::None, opcode: 0x99, flags: F_W | F_X64, ..R }],
};

static CALL: InstEntry = InstEntry {
    name: "call",
    rows: &[
        InstRow { pats: &[Rel32], enc: OpEnc::D, opcode: 0xE8, ..R },
        InstRow { pats: &[Rm64], enc: OpEnc::M, opcode: 0xFF, digit: 2, flags: F_D64 | F_EXPM | F_X64, ..R },
    ],
};

static JMP: InstEntry = InstEntry {
    name: "jmp",
    rows: &[
        InstRow { pats: &[Rel8], enc: OpEnc::D, opcode: 0xEB, ..R },
        InstRow { pats: &[Rel32], enc: OpEnc::D, opcode: 0xE9, ..R },
        InstRow { pats: &[Rm64], enc: OpEnc::M, opcode: 0xFF, digit: 4, flags: F_D64 | F_EXPM | F_X64, ..R },
    ],
};

static RET: InstEntry = InstEntry {
    name: "ret",
    rows: &[
        InstRow { enc: OpEnc::None, opcode: 0xC3, ..R },
        InstRow { pats: &[Imm16], enc: OpEnc::I, opcode: 0xC2, ..R },
    ],
};

static NOP: InstEntry = InstEntry {
    name: "nop",
    rows: &[InstRow { enc: OpEnc::None, opcode: 0x90, ..R }],
};

static INT3: InstEntry = InstEntry {
    name: "int3",
    rows: &[InstRow { enc: OpEnc::None, opcode: 0xCC, ..R }],
};

static UD2: InstEntry = InstEntry {
    name: "ud2",
    rows: &[InstRow { enc: OpEnc::None, map: Map::M0F, opcode: 0x0B, ..R }],
};

static JO: InstEntry = jcc_entry!("jo", 0x0);
static JNO: InstEntry = jcc_entry!("jno", 0x1);
static JB: InstEntry = jcc_entry!("jb", 0x2);
static JAE: InstEntry = jcc_entry!("jae", 0x3);
static JE: InstEntry = jcc_entry!("je", 0x4);
static JNE: InstEntry = jcc_entry!("jne", 0x5);
static JBE: InstEntry = jcc_entry!("jbe", 0x6);
static JA: InstEntry = jcc_entry!("ja", 0x7);
static JS: InstEntry = jcc_entry!("js", 0x8);
static JNS: InstEntry = jcc_entry!("jns", 0x9);
static JP: InstEntry = jcc_entry!("jp", 0xA);
static JNP: InstEntry = jcc_entry!("jnp", 0xB);
static JL: InstEntry = jcc_entry!("jl", 0xC);
static JGE: InstEntry = jcc_entry!("jge", 0xD);
static JLE: InstEntry = jcc_entry!("jle", 0xE);
static JG: InstEntry = jcc_entry!("jg", 0xF);

/// Generate an SSE load/store pair entry: RM load plus MR store.
macro_rules! sse_mov_entry {
    ($name:literal, $pfx:expr, $load:expr, $store:expr, $rm:expr, $feature:expr) => {
        InstEntry {
            name: $name,
            rows: &[
                InstRow {
                    pats: &[Xmm, $rm],
                    enc: OpEnc::RM,
                    pfx: $pfx,
                    map: Map::M0F,
                    opcode: $load,
                    feature: $feature,
                    ..R
                },
                InstRow {
                    pats: &[$rm, Xmm],
                    enc: OpEnc::MR,
                    pfx: $pfx,
                    map: Map::M0F,
                    opcode: $store,
                    feature: $feature,
                    ..R
                },
            ],
        }
    };
}

static MOVAPS: InstEntry = sse_mov_entry!("movaps", Pfx::None, 0x28, 0x29, XmmM128, Feature::Sse);
static MOVUPS: InstEntry = sse_mov_entry!("movups", Pfx::None, 0x10, 0x11, XmmM128, Feature::Sse);
static MOVSS: InstEntry = sse_mov_entry!("movss", Pfx::PF3, 0x10, 0x11, XmmM32, Feature::Sse);
static MOVSD: InstEntry = sse_mov_entry!("movsd", Pfx::PF2, 0x10, 0x11, XmmM64, Feature::Sse2);
static MOVDQA: InstEntry = sse_mov_entry!("movdqa", Pfx::P66, 0x6F, 0x7F, XmmM128, Feature::Sse2);
static MOVDQU: InstEntry = sse_mov_entry!("movdqu", Pfx::PF3, 0x6F, 0x7F, XmmM128, Feature::Sse2);

static MOVD: InstEntry = InstEntry {
    name: "movd",
    rows: &[
        InstRow { pats: &[Xmm, Rm32], enc: OpEnc::RM, pfx: Pfx::P66, map: Map::M0F, opcode: 0x6E, feature: Feature::Sse2, ..R },
        InstRow { pats: &[Rm32, Xmm], enc: OpEnc::MR, pfx: Pfx::P66, map: Map::M0F, opcode: 0x7E, feature: Feature::Sse2, ..R },
    ],
};

static MOVQ: InstEntry = InstEntry {
    name: "movq",
    rows: &[
        InstRow { pats: &[Xmm, XmmM64], enc: OpEnc::RM, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x7E, feature: Feature::Sse2, ..R },
        InstRow { pats: &[XmmM64, Xmm], enc: OpEnc::MR, pfx: Pfx::P66, map: Map::M0F, opcode: 0xD6, feature: Feature::Sse2, ..R },
        InstRow { pats: &[Xmm, Rm64], enc: OpEnc::RM, pfx: Pfx::P66, map: Map::M0F, opcode: 0x6E, flags: F_W | F_X64, feature: Feature::Sse2, ..R },
        InstRow { pats: &[Rm64, Xmm], enc: OpEnc::MR, pfx: Pfx::P66, map: Map::M0F, opcode: 0x7E, flags: F_W | F_X64, feature: Feature::Sse2, ..R },
    ],
};

static ADDPS: InstEntry = sse_rm_entry!("addps", Pfx::None, 0x58, XmmM128, Feature::Sse);
static ADDPD: InstEntry = sse_rm_entry!("addpd", Pfx::P66, 0x58, XmmM128, Feature::Sse2);
static ADDSS: InstEntry = sse_rm_entry!("addss", Pfx::PF3, 0x58, XmmM32, Feature::Sse);
static ADDSD: InstEntry = sse_rm_entry!("addsd", Pfx::PF2, 0x58, XmmM64, Feature::Sse2);
static SUBPS: InstEntry = sse_rm_entry!("subps", Pfx::None, 0x5C, XmmM128, Feature::Sse);
static SUBPD: InstEntry = sse_rm_entry!("subpd", Pfx::P66, 0x5C, XmmM128, Feature::Sse2);
static SUBSS: InstEntry = sse_rm_entry!("subss", Pfx::PF3, 0x5C, XmmM32, Feature::Sse);
static SUBSD: InstEntry = sse_rm_entry!("subsd", Pfx::PF2, 0x5C, XmmM64, Feature::Sse2);
static MULPS: InstEntry = sse_rm_entry!("mulps", Pfx::None, 0x59, XmmM128, Feature::Sse);
static MULPD: InstEntry = sse_rm_entry!("mulpd", Pfx::P66, 0x59, XmmM128, Feature::Sse2);
static MULSS: InstEntry = sse_rm_entry!("mulss", Pfx::PF3, 0x59, XmmM32, Feature::Sse);
static MULSD: InstEntry = sse_rm_entry!("mulsd", Pfx::PF2, 0x59, XmmM64, Feature::Sse2);
static DIVPS: InstEntry = sse_rm_entry!("divps", Pfx::None, 0x5E, XmmM128, Feature::Sse);
static DIVPD: InstEntry = sse_rm_entry!("divpd", Pfx::P66, 0x5E, XmmM128, Feature::Sse2);
static DIVSS: InstEntry = sse_rm_entry!("divss", Pfx::PF3, 0x5E, XmmM32, Feature::Sse);
static DIVSD: InstEntry = sse_rm_entry!("divsd", Pfx::PF2, 0x5E, XmmM64, Feature::Sse2);
static PAND: InstEntry = sse_rm_entry!("pand", Pfx::P66, 0xDB, XmmM128, Feature::Sse2);
static POR: InstEntry = sse_rm_entry!("por", Pfx::P66, 0xEB, XmmM128, Feature::Sse2);
static PXOR: InstEntry = sse_rm_entry!("pxor", Pfx::P66, 0xEF, XmmM128, Feature::Sse2);
static PADDB: InstEntry = sse_rm_entry!("paddb", Pfx::P66, 0xFC, XmmM128, Feature::Sse2);
static PADDW: InstEntry = sse_rm_entry!("paddw", Pfx::P66, 0xFD, XmmM128, Feature::Sse2);
static PADDD: InstEntry = sse_rm_entry!("paddd", Pfx::P66, 0xFE, XmmM128, Feature::Sse2);
static PADDQ: InstEntry = sse_rm_entry!("paddq", Pfx::P66, 0xD4, XmmM128, Feature::Sse2);
static PSUBD: InstEntry = sse_rm_entry!("psubd", Pfx::P66, 0xFA, XmmM128, Feature::Sse2);
static UCOMISS: InstEntry = sse_rm_entry!("ucomiss", Pfx::None, 0x2E, XmmM32, Feature::Sse);
static UCOMISD: InstEntry = sse_rm_entry!("ucomisd", Pfx::P66, 0x2E, XmmM64, Feature::Sse2);

static VADDPS: InstEntry = avx_rvm_entry!("vaddps", Pfx::None, 0x58, Feature::Avx);
static VADDPD: InstEntry = avx_rvm_entry!("vaddpd", Pfx::P66, 0x58, Feature::Avx);
static VSUBPS: InstEntry = avx_rvm_entry!("vsubps", Pfx::None, 0x5C, Feature::Avx);
static VSUBPD: InstEntry = avx_rvm_entry!("vsubpd", Pfx::P66, 0x5C, Feature::Avx);
static VMULPS: InstEntry = avx_rvm_entry!("vmulps", Pfx::None, 0x59, Feature::Avx);
static VMULPD: InstEntry = avx_rvm_entry!("vmulpd", Pfx::P66, 0x59, Feature::Avx);
static VPAND: InstEntry = avx_rvm_entry!("vpand", Pfx::P66, 0xDB, Feature::Avx2);
static VPOR: InstEntry = avx_rvm_entry!("vpor", Pfx::P66, 0xEB, Feature::Avx2);

static VADDSS: InstEntry = InstEntry {
    name: "vaddss",
    rows: &[InstRow { pats: &[Xmm, Xmm, XmmM32], enc: OpEnc::Rvm, family: Family::Vex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x58, feature: Feature::Avx, ..R }],
};

static VADDSD: InstEntry = InstEntry {
    name: "vaddsd",
    rows: &[InstRow { pats: &[Xmm, Xmm, XmmM64], enc: OpEnc::Rvm, family: Family::Vex, pfx: Pfx::PF2, map: Map::M0F, opcode: 0x58, feature: Feature::Avx, ..R }],
};

static VPXOR: InstEntry = avx_rvm_entry!("vpxor", Pfx::P66, 0xEF, Feature::Avx2);

static VPADDD: InstEntry = InstEntry {
    name: "vpaddd",
    rows: &[
        InstRow { pats: &[Xmm, Xmm, XmmM128], enc: OpEnc::Rvm, family: Family::Vex, pfx: Pfx::P66, map: Map::M0F, opcode: 0xFE, feature: Feature::Avx, ..R },
        InstRow { pats: &[Ymm, Ymm, YmmM256], enc: OpEnc::Rvm, family: Family::Vex, pfx: Pfx::P66, map: Map::M0F, opcode: 0xFE, feature: Feature::Avx2, ..R },
        InstRow { pats: &[Zmm, Zmm, ZmmM512], enc: OpEnc::Rvm, family: Family::Evex, pfx: Pfx::P66, map: Map::M0F, opcode: 0xFE, feature: Feature::Avx512f, ..R },
    ],
};

static VMOVAPS: InstEntry = InstEntry {
    name: "vmovaps",
    rows: &[
        InstRow { pats: &[Xmm, XmmM128], enc: OpEnc::RM, family: Family::Vex, map: Map::M0F, opcode: 0x28, feature: Feature::Avx, ..R },
        InstRow { pats: &[XmmM128, Xmm], enc: OpEnc::MR, family: Family::Vex, map: Map::M0F, opcode: 0x29, feature: Feature::Avx, ..R },
        InstRow { pats: &[Ymm, YmmM256], enc: OpEnc::RM, family: Family::Vex, map: Map::M0F, opcode: 0x28, feature: Feature::Avx, ..R },
        InstRow { pats: &[YmmM256, Ymm], enc: OpEnc::MR, family: Family::Vex, map: Map::M0F, opcode: 0x29, feature: Feature::Avx, ..R },
    ],
};

static VMOVUPS: InstEntry = InstEntry {
    name: "vmovups",
    rows: &[
        InstRow { pats: &[Xmm, XmmM128], enc: OpEnc::RM, family: Family::Vex, map: Map::M0F, opcode: 0x10, feature: Feature::Avx, ..R },
        InstRow { pats: &[XmmM128, Xmm], enc: OpEnc::MR, family: Family::Vex, map: Map::M0F, opcode: 0x11, feature: Feature::Avx, ..R },
        InstRow { pats: &[Ymm, YmmM256], enc: OpEnc::RM, family: Family::Vex, map: Map::M0F, opcode: 0x10, feature: Feature::Avx, ..R },
        InstRow { pats: &[YmmM256, Ymm], enc: OpEnc::MR, family: Family::Vex, map: Map::M0F, opcode: 0x11, feature: Feature::Avx, ..R },
    ],
};

static VMOVDQU: InstEntry = InstEntry {
    name: "vmovdqu",
    rows: &[
        InstRow { pats: &[Xmm, XmmM128], enc: OpEnc::RM, family: Family::Vex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x6F, feature: Feature::Avx, ..R },
        InstRow { pats: &[XmmM128, Xmm], enc: OpEnc::MR, family: Family::Vex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x7F, feature: Feature::Avx, ..R },
        InstRow { pats: &[Ymm, YmmM256], enc: OpEnc::RM, family: Family::Vex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x6F, feature: Feature::Avx, ..R },
        InstRow { pats: &[YmmM256, Ymm], enc: OpEnc::MR, family: Family::Vex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x7F, feature: Feature::Avx, ..R },
    ],
};

static VMOVDQU32: InstEntry = InstEntry {
    name: "vmovdqu32",
    rows: &[
        InstRow { pats: &[Zmm, ZmmM512], enc: OpEnc::RM, family: Family::Evex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x6F, feature: Feature::Avx512f, ..R },
        InstRow { pats: &[ZmmM512, Zmm], enc: OpEnc::MR, family: Family::Evex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x7F, feature: Feature::Avx512f, ..R },
    ],
};

static VMOVDQU64: InstEntry = InstEntry {
    name: "vmovdqu64",
    rows: &[
        InstRow { pats: &[Zmm, ZmmM512], enc: OpEnc::RM, family: Family::Evex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x6F, flags: F_W, feature: Feature::Avx512f, ..R },
        InstRow { pats: &[ZmmM512, Zmm], enc: OpEnc::MR, family: Family::Evex, pfx: Pfx::PF3, map: Map::M0F, opcode: 0x7F, flags: F_W, feature: Feature::Avx512f, ..R },
    ],
};

/// Look up the table entry for an instruction.
pub(crate) fn entry(id: InstId) -> &'static InstEntry {
    match id {
        InstId::Mov => &MOV,
        InstId::Movzx => &MOVZX,
        InstId::Movsx => &MOVSX,
        InstId::Movsxd => &MOVSXD,
        InstId::Lea => &LEA,
        InstId::Push => &PUSH,
        InstId::Pop => &POP,
        InstId::Add => &ADD,
        InstId::Or => &OR,
        InstId::Adc => &ADC,
        InstId::Sbb => &SBB,
        InstId::And => &AND,
        InstId::Sub => &SUB,
        InstId::Xor => &XOR,
        InstId::Cmp => &CMP,
        InstId::Test => &TEST,
        InstId::Inc => &INC,
        InstId::Dec => &DEC,
        InstId::Neg => &NEG,
        InstId::Not => &NOT,
        InstId::Mul => &MUL,
        InstId::Imul => &IMUL,
        InstId::Div => &DIV,
        InstId::Idiv => &IDIV,
        InstId::Shl => &SHL,
        InstId::Shr => &SHR,
        InstId::Sar => &SAR,
        InstId::Rol => &ROL,
        InstId::Ror => &ROR,
        InstId::Cdq => &CDQ,
        InstId::Cqo => &CQO,
        InstId::Call => &CALL,
        InstId::Jmp => &JMP,
        InstId::Ret => &RET,
        InstId::Nop => &NOP,
        InstId::Int3 => &INT3,
        InstId::Ud2 => &UD2,
        InstId::Jo => &JO,
        InstId::Jno => &JNO,
        InstId::Jb => &JB,
        InstId::Jae => &JAE,
        InstId::Je => &JE,
        InstId::Jne => &JNE,
        InstId::Jbe => &JBE,
        InstId::Ja => &JA,
        InstId::Js => &JS,
        InstId::Jns => &JNS,
        InstId::Jp => &JP,
        InstId::Jnp => &JNP,
        InstId::Jl => &JL,
        InstId::Jge => &JGE,
        InstId::Jle => &JLE,
        InstId::Jg => &JG,
        InstId::Movaps => &MOVAPS,
        InstId::Movups => &MOVUPS,
        InstId::Movss => &MOVSS,
        InstId::Movsd => &MOVSD,
        InstId::Movdqa => &MOVDQA,
        InstId::Movdqu => &MOVDQU,
        InstId::Movd => &MOVD,
        InstId::Movq => &MOVQ,
        InstId::Addps => &ADDPS,
        InstId::Addpd => &ADDPD,
        InstId::Addss => &ADDSS,
        InstId::Addsd => &ADDSD,
        InstId::Subps => &SUBPS,
        InstId::Subpd => &SUBPD,
        InstId::Subss => &SUBSS,
        InstId::Subsd => &SUBSD,
        InstId::Mulps => &MULPS,
        InstId::Mulpd => &MULPD,
        InstId::Mulss => &MULSS,
        InstId::Mulsd => &MULSD,
        InstId::Divps => &DIVPS,
        InstId::Divpd => &DIVPD,
        InstId::Divss => &DIVSS,
        InstId::Divsd => &DIVSD,
        InstId::Pand => &PAND,
        InstId::Por => &POR,
        InstId::Pxor => &PXOR,
        InstId::Paddb => &PADDB,
        InstId::Paddw => &PADDW,
        InstId::Paddd => &PADDD,
        InstId::Paddq => &PADDQ,
        InstId::Psubd => &PSUBD,
        InstId::Ucomiss => &UCOMISS,
        InstId::Ucomisd => &UCOMISD,
        InstId::Vaddps => &VADDPS,
        InstId::Vaddpd => &VADDPD,
        InstId::Vaddss => &VADDSS,
        InstId::Vaddsd => &VADDSD,
        InstId::Vsubps => &VSUBPS,
        InstId::Vsubpd => &VSUBPD,
        InstId::Vmulps => &VMULPS,
        InstId::Vmulpd => &VMULPD,
        InstId::Vmovaps => &VMOVAPS,
        InstId::Vmovups => &VMOVUPS,
        InstId::Vmovdqu => &VMOVDQU,
        InstId::Vpand => &VPAND,
        InstId::Vpor => &VPOR,
        InstId::Vpxor => &VPXOR,
        InstId::Vpaddd => &VPADDD,
        InstId::Vmovdqu32 => &VMOVDQU32,
        InstId::Vmovdqu64 => &VMOVDQU64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_ordered_shortest_first_for_branches() {
        let jmp = entry(InstId::Jmp);
        assert_eq!(jmp.rows[0].pats, &[Rel8]);
        assert_eq!(jmp.rows[1].pats, &[Rel32]);
    }

    #[test]
    fn alu_imm8_row_precedes_imm32() {
        let add = entry(InstId::Add);
        let i8_pos = add
            .rows
            .iter()
            .position(|r| r.pats == [Rm32, Imm8])
            .unwrap();
        let i32_pos = add
            .rows
            .iter()
            .position(|r| r.pats == [Rm32, Imm32])
            .unwrap();
        assert!(i8_pos < i32_pos);
    }

    #[test]
    fn every_id_has_rows() {
        // Spot-check a few entries across families.
        for id in [InstId::Mov, InstId::Vpaddd, InstId::Vmovdqu32, InstId::Ret] {
            assert!(!entry(id).rows.is_empty());
        }
    }
}
