//! Encoding logic for the VEX prefix family.

use smallvec::SmallVec;

/// Construct and emit the VEX prefix bytes.
///
/// The 2-byte form is used whenever the fields it cannot represent (X, B, W,
/// maps other than 0F) are at their defaults.
pub(crate) enum VexPrefix {
    TwoByte(u8),
    ThreeByte(u8, u8),
}

/// The VEX prefix only ever uses the top bit (the fourth bit) of a
/// HW-encoded register, stored inverted.
#[inline]
fn invert_top_bit(enc: u8) -> u8 {
    (!(enc >> 3)) & 1
}

impl VexPrefix {
    /// Construct the prefix.
    ///
    /// - `reg` is the register going into ModRM.reg.
    /// - `vvvv` is the non-destructive source (0 when unused).
    /// - `b` and `x` are the optional rm/base and index registers.
    /// - `l`, `pp` and `mmmmm` correspond directly to prefix fields.
    pub fn new(
        reg: u8,
        vvvv: u8,
        (b, x): (Option<u8>, Option<u8>),
        l: u8,
        pp: u8,
        mmmmm: u8,
        w: bool,
    ) -> Self {
        let r = invert_top_bit(reg);
        let b = invert_top_bit(b.unwrap_or(0));
        let x = invert_top_bit(x.unwrap_or(0));

        debug_assert!(vvvv <= 0b1111);
        debug_assert!(l <= 0b1);
        debug_assert!(pp <= 0b11);
        debug_assert!((0b01..=0b11).contains(&mmmmm));

        let can_use_2byte = b == 1 && x == 1 && !w && mmmmm == 0b01;
        if can_use_2byte {
            // +-----+ +-------------------+
            // | C5h | | R | vvvv | L | pp |
            // +-----+ +-------------------+
            let last = r << 7 | (!vvvv & 0b1111) << 3 | (l & 1) << 2 | (pp & 0b11);
            VexPrefix::TwoByte(last)
        } else {
            // +-----+ +--------------+ +-------------------+
            // | C4h | | RXB | m-mmmm | | W | vvvv | L | pp |
            // +-----+ +--------------+ +-------------------+
            let second = r << 7 | x << 6 | b << 5 | mmmmm;
            let last = (w as u8) << 7 | (!vvvv & 0b1111) << 3 | (l & 1) << 2 | (pp & 0b11);
            VexPrefix::ThreeByte(second, last)
        }
    }

    pub fn encode(&self, sink: &mut SmallVec<[u8; 16]>) {
        match *self {
            VexPrefix::TwoByte(last) => {
                sink.push(0xC5);
                sink.push(last);
            }
            VexPrefix::ThreeByte(second, last) => {
                sink.push(0xC4);
                sink.push(second);
                sink.push(last);
            }
        }
    }
}
