//! Instruction operands.
//!
//! An [`Operand`] is a small, fixed-size tagged value: a register, a memory
//! reference, an immediate, or a label reference. The tag fully determines
//! which fields are meaningful; everything else is zero. Operands are plain
//! values and are freely copied.

use crate::code::Label;
use crate::error::{CodeResult, Error};

/// Register bank a register belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegGroup {
    /// General-purpose registers.
    Gp,
    /// Vector registers (XMM/YMM/ZMM).
    Vec,
    /// AVX-512 mask registers.
    Mask,
    /// Segment registers.
    Seg,
    /// Control registers.
    Control,
    /// Debug registers.
    Debug,
}

/// Size class of a register.
///
/// `HighByte` is the legacy AH/CH/DH/BH bank: it shares hardware encodings
/// 4..=7 with SPL/BPL/SIL/DIL but is only reachable without a REX prefix, a
/// distinction the encoder must see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegSize {
    Byte,
    HighByte,
    Word,
    Dword,
    Qword,
    Vec128,
    Vec256,
    Vec512,
}

impl RegSize {
    /// Width in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            RegSize::Byte | RegSize::HighByte => 1,
            RegSize::Word => 2,
            RegSize::Dword => 4,
            RegSize::Qword => 8,
            RegSize::Vec128 => 16,
            RegSize::Vec256 => 32,
            RegSize::Vec512 => 64,
        }
    }
}

/// A physical register operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reg {
    group: RegGroup,
    size: RegSize,
    id: u8,
}

impl Reg {
    /// Create a register from its group, size class and hardware id.
    pub fn new(group: RegGroup, size: RegSize, id: u8) -> Self {
        Reg { group, size, id }
    }

    /// The register bank.
    pub fn group(self) -> RegGroup {
        self.group
    }

    /// The size class.
    pub fn size(self) -> RegSize {
        self.size
    }

    /// The hardware encoding, `0..=31`.
    pub fn enc(self) -> u8 {
        self.id
    }

    /// Whether this is a general-purpose register.
    pub fn is_gp(self) -> bool {
        self.group == RegGroup::Gp
    }

    /// Whether this is a vector register of any width.
    pub fn is_vec(self) -> bool {
        self.group == RegGroup::Vec
    }

    /// Whether this is AH/CH/DH/BH. These forbid a REX prefix.
    pub fn is_high_byte(self) -> bool {
        self.size == RegSize::HighByte
    }

    /// Whether this is SPL/BPL/SIL/DIL, which are only addressable *with* a
    /// REX prefix.
    pub fn needs_rex_for_byte(self) -> bool {
        self.group == RegGroup::Gp
            && self.size == RegSize::Byte
            && (4..=7).contains(&self.id)
    }

    /// The same register id at a different size class.
    pub fn with_size(self, size: RegSize) -> Self {
        Reg { size, ..self }
    }
}

/// Index-register scale in a memory operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scale {
    One,
    Two,
    Four,
    Eight,
}

impl Scale {
    /// Create a [`Scale`] from a byte multiplier in {1, 2, 4, 8}.
    pub fn from_multiplier(m: u8) -> CodeResult<Self> {
        match m {
            1 => Ok(Scale::One),
            2 => Ok(Scale::Two),
            4 => Ok(Scale::Four),
            8 => Ok(Scale::Eight),
            _ => Err(Error::InvalidOperand),
        }
    }

    /// The 2-bit hardware encoding.
    pub fn enc(self) -> u8 {
        match self {
            Scale::One => 0b00,
            Scale::Two => 0b01,
            Scale::Four => 0b10,
            Scale::Eight => 0b11,
        }
    }
}

/// Segment override on a memory operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegOverride {
    Fs,
    Gs,
}

impl SegOverride {
    /// The legacy prefix byte for this override.
    pub fn prefix(self) -> u8 {
        match self {
            SegOverride::Fs => 0x64,
            SegOverride::Gs => 0x65,
        }
    }
}

/// Base of a memory operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemBase {
    /// Absolute: displacement only.
    None,
    /// A general-purpose base register, by hardware id.
    Gp(u8),
    /// A label; encoded RIP-relative in 64-bit mode.
    Label(Label),
}

/// A memory operand: `[base + index * scale + disp]`, with an optional
/// segment override and an optional operand-size hint in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mem {
    base: MemBase,
    index: Option<u8>,
    scale: Scale,
    disp: i32,
    seg: Option<SegOverride>,
    size: u8,
}

impl Mem {
    /// `[base]`.
    pub fn base(base: Reg) -> Self {
        debug_assert!(base.is_gp());
        Mem {
            base: MemBase::Gp(base.enc()),
            index: None,
            scale: Scale::One,
            disp: 0,
            seg: None,
            size: 0,
        }
    }

    /// `[base + disp]`.
    pub fn base_disp(base: Reg, disp: i32) -> Self {
        Mem {
            disp,
            ..Mem::base(base)
        }
    }

    /// `[base + index * scale + disp]`. The index must not be RSP.
    pub fn base_index_disp(base: Reg, index: Reg, scale: Scale, disp: i32) -> Self {
        debug_assert!(index.is_gp());
        Mem {
            index: Some(index.enc()),
            scale,
            disp,
            ..Mem::base_disp(base, disp)
        }
    }

    /// `[disp]`, absolute addressing.
    pub fn abs(disp: i32) -> Self {
        Mem {
            base: MemBase::None,
            index: None,
            scale: Scale::One,
            disp,
            seg: None,
            size: 0,
        }
    }

    /// `[label + disp]`; RIP-relative in 64-bit mode.
    pub fn label(label: Label, disp: i32) -> Self {
        Mem {
            base: MemBase::Label(label),
            index: None,
            scale: Scale::One,
            disp,
            seg: None,
            size: 0,
        }
    }

    /// Attach a segment override.
    pub fn with_segment(self, seg: SegOverride) -> Self {
        Mem {
            seg: Some(seg),
            ..self
        }
    }

    /// Attach an operand-size hint in bytes; disambiguates encodings such as
    /// `mov [mem], imm`.
    pub fn with_size(self, bytes: u8) -> Self {
        Mem { size: bytes, ..self }
    }

    pub fn base_kind(self) -> MemBase {
        self.base
    }

    pub fn index(self) -> Option<u8> {
        self.index
    }

    pub fn scale(self) -> Scale {
        self.scale
    }

    pub fn disp(self) -> i32 {
        self.disp
    }

    pub fn segment(self) -> Option<SegOverride> {
        self.seg
    }

    /// The operand-size hint in bytes; 0 when unspecified.
    pub fn size(self) -> u8 {
        self.size
    }
}

/// An immediate operand; a 64-bit payload interpreted per instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Imm {
    value: i64,
}

impl Imm {
    pub fn new(value: i64) -> Self {
        Imm { value }
    }

    pub fn value(self) -> i64 {
        self.value
    }

    pub fn fits_i8(self) -> bool {
        i8::try_from(self.value).is_ok()
    }

    pub fn fits_i16(self) -> bool {
        i16::try_from(self.value).is_ok()
    }

    pub fn fits_i32(self) -> bool {
        i32::try_from(self.value).is_ok()
    }

    /// Whether the value fits a 32-bit field that the CPU zero-extends, e.g.
    /// `mov r32, imm32` writing a 64-bit register.
    pub fn fits_u32(self) -> bool {
        u32::try_from(self.value).is_ok()
    }
}

/// An instruction operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Operand {
    /// An absent operand slot.
    #[default]
    None,
    Reg(Reg),
    Mem(Mem),
    Imm(Imm),
    /// A code location, e.g. a branch target.
    Label(Label),
}

impl Operand {
    pub fn is_none(self) -> bool {
        matches!(self, Operand::None)
    }

    pub fn as_reg(self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_mem(self) -> Option<Mem> {
        match self {
            Operand::Mem(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_imm(self) -> Option<Imm> {
        match self {
            Operand::Imm(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_label(self) -> Option<Label> {
        match self {
            Operand::Label(l) => Some(l),
            _ => None,
        }
    }
}

impl From<Reg> for Operand {
    fn from(r: Reg) -> Self {
        Operand::Reg(r)
    }
}

impl From<Mem> for Operand {
    fn from(m: Mem) -> Self {
        Operand::Mem(m)
    }
}

impl From<Imm> for Operand {
    fn from(i: Imm) -> Self {
        Operand::Imm(i)
    }
}

impl From<Label> for Operand {
    fn from(l: Label) -> Self {
        Operand::Label(l)
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Imm(Imm::new(v.into()))
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Imm(Imm::new(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_register_classes() {
        let spl = Reg::new(RegGroup::Gp, RegSize::Byte, 4);
        let ah = Reg::new(RegGroup::Gp, RegSize::HighByte, 4);
        assert!(spl.needs_rex_for_byte());
        assert!(!ah.needs_rex_for_byte());
        assert!(ah.is_high_byte());
    }

    #[test]
    fn scale_validation() {
        assert_eq!(Scale::from_multiplier(4).unwrap(), Scale::Four);
        assert_eq!(
            Scale::from_multiplier(3).unwrap_err(),
            Error::InvalidOperand
        );
    }

    #[test]
    fn immediate_widths() {
        assert!(Imm::new(-128).fits_i8());
        assert!(!Imm::new(-129).fits_i8());
        assert!(Imm::new(0x8000_0000).fits_u32());
        assert!(!Imm::new(0x8000_0000).fits_i32());
    }
}
