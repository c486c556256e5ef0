//! Encoding logic for the EVEX prefix.

use smallvec::SmallVec;

/// The three payload bytes following the 0x62 escape.
///
/// ```text
/// P0: R X B R' 0 0 m m
/// P1: W v v v v 1 p p
/// P2: z L' L b V' a a a
/// ```
///
/// Register fields are stored inverted, including the high (fifth) bits R'
/// and V' that extend addressing to registers 16..=31. Masking (`aaa`),
/// zeroing (`z`) and broadcast (`b`) are not produced by this encoder and
/// stay zero.
pub(crate) struct EvexPrefix {
    p0: u8,
    p1: u8,
    p2: u8,
}

#[inline]
fn inv(bit: u8) -> u8 {
    (!bit) & 1
}

impl EvexPrefix {
    /// Construct the prefix from final hardware register encodings (5 bits
    /// each where applicable).
    ///
    /// - `reg` goes to ModRM.reg (R/R').
    /// - `vvvv` is the non-destructive source (V' carries its fifth bit).
    /// - `b` and `x` are the rm/base and index registers. For register rm
    ///   operands, `x` carries the rm register's fifth bit.
    /// - `ll` is the vector length: 0=128, 1=256, 2=512.
    pub fn new(
        reg: u8,
        vvvv: u8,
        (b, x): (Option<u8>, Option<u8>),
        ll: u8,
        pp: u8,
        mm: u8,
        w: bool,
    ) -> Self {
        debug_assert!(reg < 32 && vvvv < 32);
        debug_assert!(ll <= 2);
        debug_assert!(pp <= 0b11);
        debug_assert!((0b01..=0b11).contains(&mm));

        let b = b.unwrap_or(0);
        let x = x.unwrap_or(0);

        let p0 = inv(reg >> 3) << 7
            | inv(x >> 3) << 6
            | inv(b >> 3) << 5
            | inv(reg >> 4) << 4
            | mm;
        let p1 = (w as u8) << 7 | (inv_low4(vvvv)) << 3 | 1 << 2 | pp;
        let p2 = (ll & 0b11) << 5 | inv(vvvv >> 4) << 3;
        EvexPrefix { p0, p1, p2 }
    }

    /// Fold the fifth bit of a register rm operand into X, as EVEX requires
    /// when no index register is present.
    pub fn with_rm_high_bit(mut self, rm: u8) -> Self {
        if rm >= 16 {
            self.p0 &= !(1 << 6);
        }
        self
    }

    pub fn encode(&self, sink: &mut SmallVec<[u8; 16]>) {
        sink.push(0x62);
        sink.push(self.p0);
        sink.push(self.p1);
        sink.push(self.p2);
    }
}

#[inline]
fn inv_low4(enc: u8) -> u8 {
    (!enc) & 0b1111
}

/// The compressed-displacement scale for a full-width vector memory access
/// at the given vector length (Intel SDM 2.7.5, tuple type "full").
pub(crate) fn disp8_scale(ll: u8) -> i8 {
    match ll {
        0 => 16,
        1 => 32,
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(prefix: EvexPrefix) -> Vec<u8> {
        let mut sink = SmallVec::new();
        prefix.encode(&mut sink);
        sink.to_vec()
    }

    #[test]
    fn zmm_register_form() {
        // vpaddd zmm0, zmm1, zmm2: 62 F1 75 48 FE C2.
        let prefix = EvexPrefix::new(0, 1, (Some(2), None), 2, 0b01, 0b01, false);
        assert_eq!(bytes(prefix), vec![0x62, 0xF1, 0x75, 0x48]);
    }

    #[test]
    fn high_registers_drop_inverted_bits() {
        // vpaddd zmm24, zmm1, zmm2: reg 24 clears R and R'.
        let prefix = EvexPrefix::new(24, 1, (Some(2), None), 2, 0b01, 0b01, false);
        assert_eq!(bytes(prefix), vec![0x62, 0x61, 0x75, 0x48]);
    }

    #[test]
    fn full_vector_disp8_scaling() {
        assert_eq!(disp8_scale(0), 16);
        assert_eq!(disp8_scale(2), 64);
    }
}
