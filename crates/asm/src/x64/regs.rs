//! Constructors for the x64 register file.
//!
//! These return plain [`Reg`] values; sizes select the encoding the operand
//! participates in (`eax()` vs `rax()` and so on). The high-byte bank
//! (`ah()`..`bh()`) is distinct from `spl()`..`dil()` even though they share
//! hardware encodings; see [`RegSize`].

use crate::operand::{Reg, RegGroup, RegSize};

macro_rules! gp {
    ($($name:ident = $enc:expr, $size:ident;)+) => {
        $(
            pub fn $name() -> Reg {
                Reg::new(RegGroup::Gp, RegSize::$size, $enc)
            }
        )+
    };
}

gp! {
    rax = 0, Qword; rcx = 1, Qword; rdx = 2, Qword; rbx = 3, Qword;
    rsp = 4, Qword; rbp = 5, Qword; rsi = 6, Qword; rdi = 7, Qword;
    r8 = 8, Qword; r9 = 9, Qword; r10 = 10, Qword; r11 = 11, Qword;
    r12 = 12, Qword; r13 = 13, Qword; r14 = 14, Qword; r15 = 15, Qword;

    eax = 0, Dword; ecx = 1, Dword; edx = 2, Dword; ebx = 3, Dword;
    esp = 4, Dword; ebp = 5, Dword; esi = 6, Dword; edi = 7, Dword;
    r8d = 8, Dword; r9d = 9, Dword; r10d = 10, Dword; r11d = 11, Dword;
    r12d = 12, Dword; r13d = 13, Dword; r14d = 14, Dword; r15d = 15, Dword;

    ax = 0, Word; cx = 1, Word; dx = 2, Word; bx = 3, Word;
    sp = 4, Word; bp = 5, Word; si = 6, Word; di = 7, Word;

    al = 0, Byte; cl = 1, Byte; dl = 2, Byte; bl = 3, Byte;
    spl = 4, Byte; bpl = 5, Byte; sil = 6, Byte; dil = 7, Byte;
    r8b = 8, Byte; r9b = 9, Byte; r10b = 10, Byte; r11b = 11, Byte;
    r12b = 12, Byte; r13b = 13, Byte; r14b = 14, Byte; r15b = 15, Byte;

    ah = 4, HighByte; ch = 5, HighByte; dh = 6, HighByte; bh = 7, HighByte;
}

macro_rules! vec_regs {
    ($size:ident, $($name:ident = $enc:expr),+ $(,)?) => {
        $(
            pub fn $name() -> Reg {
                Reg::new(RegGroup::Vec, RegSize::$size, $enc)
            }
        )+
    };
}

vec_regs!(Vec128,
    xmm0 = 0, xmm1 = 1, xmm2 = 2, xmm3 = 3, xmm4 = 4, xmm5 = 5, xmm6 = 6,
    xmm7 = 7, xmm8 = 8, xmm9 = 9, xmm10 = 10, xmm11 = 11, xmm12 = 12,
    xmm13 = 13, xmm14 = 14, xmm15 = 15,
);

vec_regs!(Vec256,
    ymm0 = 0, ymm1 = 1, ymm2 = 2, ymm3 = 3, ymm4 = 4, ymm5 = 5, ymm6 = 6,
    ymm7 = 7, ymm8 = 8, ymm9 = 9, ymm10 = 10, ymm11 = 11, ymm12 = 12,
    ymm13 = 13, ymm14 = 14, ymm15 = 15,
);

vec_regs!(Vec512,
    zmm0 = 0, zmm1 = 1, zmm2 = 2, zmm3 = 3, zmm4 = 4, zmm5 = 5, zmm6 = 6,
    zmm7 = 7, zmm8 = 8, zmm9 = 9, zmm10 = 10, zmm11 = 11, zmm12 = 12,
    zmm13 = 13, zmm14 = 14, zmm15 = 15, zmm16 = 16, zmm17 = 17, zmm18 = 18,
    zmm19 = 19, zmm20 = 20, zmm21 = 21, zmm22 = 22, zmm23 = 23, zmm24 = 24,
    zmm25 = 25, zmm26 = 26, zmm27 = 27, zmm28 = 28, zmm29 = 29, zmm30 = 30,
    zmm31 = 31,
);

/// A general-purpose register of the given size class by hardware id.
pub fn gpr(size: RegSize, enc: u8) -> Reg {
    debug_assert!(enc < 16);
    Reg::new(RegGroup::Gp, size, enc)
}

/// An XMM register by hardware id.
pub fn xmm(enc: u8) -> Reg {
    Reg::new(RegGroup::Vec, RegSize::Vec128, enc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_match_hardware_ids() {
        assert_eq!(rax().enc(), 0);
        assert_eq!(r15().enc(), 15);
        assert_eq!(spl().enc(), ah().enc());
        assert_ne!(spl(), ah());
        assert_eq!(zmm31().enc(), 31);
    }
}
