//! Calling-convention descriptors and function frame helpers.
//!
//! A [`CallConv`] describes how a convention passes arguments and which
//! registers survive a call; a [`FuncFrame`] accumulates what a generated
//! function actually clobbers and computes the prolog/epilog layout. The
//! assembler then materializes standard entry/exit sequences without the
//! caller spelling out pushes and stack adjustment by hand.

use crate::assembler::Assembler;
use crate::emitter::Emitter;
use crate::error::{CodeResult, Error};
use crate::operand::{Reg, RegGroup, RegSize};
use crate::x64::regs::{self, gpr};
use crate::x64::InstId;

/// Identifier of a calling convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallConvId {
    /// The convention of the host platform (SysV64 on Unix, Win64 on
    /// Windows).
    Host,
    SysV64,
    Win64,
    /// 32-bit conventions, kept for the descriptor surface.
    Cdecl,
    StdCall,
    FastCall,
    VectorCall,
}

/// An argument-passing and register-preservation descriptor.
#[derive(Clone, Copy, Debug)]
pub struct CallConv {
    id: CallConvId,
    /// Ordered GP argument registers, by hardware id.
    arg_gps: &'static [u8],
    /// Ordered vector argument registers, by hardware id.
    arg_vecs: &'static [u8],
    /// Callee-saved GP registers, by hardware id.
    preserved_gps: &'static [u8],
    red_zone: u32,
    shadow_space: u32,
    stack_alignment: u32,
}

// rdi, rsi, rdx, rcx, r8, r9.
const SYSV_ARG_GPS: &[u8] = &[7, 6, 2, 1, 8, 9];
// rbx, rbp, r12..r15.
const SYSV_PRESERVED: &[u8] = &[3, 5, 12, 13, 14, 15];
// rcx, rdx, r8, r9.
const WIN64_ARG_GPS: &[u8] = &[1, 2, 8, 9];
// rbx, rbp, rdi, rsi, r12..r15.
const WIN64_PRESERVED: &[u8] = &[3, 5, 7, 6, 12, 13, 14, 15];

impl CallConv {
    /// Resolve an identifier to a concrete descriptor. `Host` picks the
    /// convention of the compilation target.
    pub fn resolve(id: CallConvId) -> CodeResult<CallConv> {
        let id = match id {
            CallConvId::Host => {
                if cfg!(windows) {
                    CallConvId::Win64
                } else {
                    CallConvId::SysV64
                }
            }
            other => other,
        };
        match id {
            CallConvId::SysV64 => Ok(CallConv {
                id,
                arg_gps: SYSV_ARG_GPS,
                arg_vecs: &[0, 1, 2, 3, 4, 5, 6, 7],
                preserved_gps: SYSV_PRESERVED,
                red_zone: 128,
                shadow_space: 0,
                stack_alignment: 16,
            }),
            CallConvId::Win64 => Ok(CallConv {
                id,
                arg_gps: WIN64_ARG_GPS,
                arg_vecs: &[0, 1, 2, 3],
                preserved_gps: WIN64_PRESERVED,
                red_zone: 0,
                shadow_space: 32,
                stack_alignment: 16,
            }),
            // The 32-bit conventions are descriptor-only; prolog emission
            // targets long mode.
            CallConvId::Cdecl | CallConvId::StdCall | CallConvId::FastCall
            | CallConvId::VectorCall => Err(Error::InvalidArgument),
            CallConvId::Host => unreachable!(),
        }
    }

    pub fn id(&self) -> CallConvId {
        self.id
    }

    /// The GP register carrying argument `index`, if it is passed in a
    /// register.
    pub fn arg_gp(&self, index: usize) -> Option<Reg> {
        self.arg_gps
            .get(index)
            .map(|&enc| gpr(RegSize::Qword, enc))
    }

    /// The vector register carrying vector argument `index`.
    pub fn arg_vec(&self, index: usize) -> Option<Reg> {
        self.arg_vecs.get(index).map(|&enc| regs::xmm(enc))
    }

    pub fn is_preserved(&self, reg: Reg) -> bool {
        reg.group() == RegGroup::Gp && self.preserved_gps.contains(&reg.enc())
    }

    /// Bytes below the stack pointer a leaf function may use untouched.
    pub fn red_zone(&self) -> u32 {
        self.red_zone
    }

    /// Bytes of caller-allocated spill space above the return address.
    pub fn shadow_space(&self) -> u32 {
        self.shadow_space
    }

    pub fn stack_alignment(&self) -> u32 {
        self.stack_alignment
    }
}

/// Frame bookkeeping for one generated function.
///
/// Mark the registers the body clobbers, set the local stack size, then
/// [`FuncFrame::finalize`] computes the save list and stack adjustment that
/// [`Assembler::emit_prolog`] and [`Assembler::emit_epilog`] encode.
#[derive(Clone, Debug)]
pub struct FuncFrame {
    call_conv: CallConv,
    dirty_gps: u16,
    local_stack: u32,
    saved: Vec<u8>,
    stack_adjust: u32,
    finalized: bool,
}

impl FuncFrame {
    pub fn new(call_conv: CallConv) -> Self {
        FuncFrame {
            call_conv,
            dirty_gps: 0,
            local_stack: 0,
            saved: Vec::new(),
            stack_adjust: 0,
            finalized: false,
        }
    }

    pub fn call_conv(&self) -> &CallConv {
        &self.call_conv
    }

    /// Mark a register as clobbered by the function body.
    pub fn add_dirty(&mut self, reg: Reg) -> &mut Self {
        if reg.group() == RegGroup::Gp {
            self.dirty_gps |= 1 << reg.enc();
        }
        self
    }

    /// Reserve bytes of local stack addressable below the adjusted stack
    /// pointer.
    pub fn set_local_stack(&mut self, bytes: u32) -> &mut Self {
        self.local_stack = bytes;
        self
    }

    /// Compute the save list and stack adjustment.
    pub fn finalize(&mut self) -> CodeResult<()> {
        self.saved.clear();
        for &enc in self.call_conv.preserved_gps {
            if self.dirty_gps & (1 << enc) != 0 {
                self.saved.push(enc);
            }
        }
        // The return address leaves rsp 8 modulo 16 at entry; each push
        // flips it. Pad the local area so the body sees an aligned stack.
        let align = self.call_conv.stack_alignment.max(1);
        let locals = self.local_stack.next_multiple_of(align);
        let misalign = if self.saved.len() % 2 == 0 { 8 } else { 0 };
        self.stack_adjust = locals + misalign;
        self.finalized = true;
        Ok(())
    }

    /// Callee-saved registers the prolog pushes, in push order.
    pub fn saved_regs(&self) -> impl Iterator<Item = Reg> + '_ {
        self.saved.iter().map(|&enc| gpr(RegSize::Qword, enc))
    }

    /// Bytes subtracted from the stack pointer after the pushes.
    pub fn stack_adjust(&self) -> u32 {
        self.stack_adjust
    }
}

impl Assembler<'_> {
    /// Emit a standard function prolog for `frame`: push every dirty
    /// callee-saved register, then adjust the stack pointer.
    pub fn emit_prolog(&mut self, frame: &FuncFrame) -> CodeResult<()> {
        if !frame.finalized {
            return Err(Error::InvalidState);
        }
        for reg in frame.saved_regs() {
            self.emit1(InstId::Push, reg)?;
        }
        if frame.stack_adjust() > 0 {
            self.emit2(InstId::Sub, regs::rsp(), frame.stack_adjust() as i64)?;
        }
        Ok(())
    }

    /// Emit the matching epilog: undo the stack adjustment, pop the saved
    /// registers in reverse, and return.
    pub fn emit_epilog(&mut self, frame: &FuncFrame) -> CodeResult<()> {
        if !frame.finalized {
            return Err(Error::InvalidState);
        }
        if frame.stack_adjust() > 0 {
            self.emit2(InstId::Add, regs::rsp(), frame.stack_adjust() as i64)?;
        }
        let saved: Vec<_> = frame.saved_regs().collect();
        for reg in saved.into_iter().rev() {
            self.emit1(InstId::Pop, reg)?;
        }
        self.emit0(InstId::Ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysv_argument_order() {
        let cc = CallConv::resolve(CallConvId::SysV64).unwrap();
        assert_eq!(cc.arg_gp(0), Some(regs::rdi()));
        assert_eq!(cc.arg_gp(1), Some(regs::rsi()));
        assert_eq!(cc.arg_gp(6), None);
        assert!(cc.is_preserved(regs::rbx()));
        assert!(!cc.is_preserved(regs::rax()));
        assert_eq!(cc.red_zone(), 128);
    }

    #[test]
    fn frame_alignment_accounts_for_pushes() {
        let cc = CallConv::resolve(CallConvId::SysV64).unwrap();
        let mut frame = FuncFrame::new(cc);
        frame.add_dirty(regs::rbx());
        frame.set_local_stack(24);
        frame.finalize().unwrap();
        // One push: entry 8 + 8 = 16 aligned, locals pad to 32.
        assert_eq!(frame.saved_regs().count(), 1);
        assert_eq!(frame.stack_adjust(), 32);

        let mut frame = FuncFrame::new(cc);
        frame.set_local_stack(0);
        frame.finalize().unwrap();
        // No pushes: the return address alone misaligns by 8.
        assert_eq!(frame.stack_adjust(), 8);
    }

    #[test]
    fn win64_shadow_space() {
        let cc = CallConv::resolve(CallConvId::Win64).unwrap();
        assert_eq!(cc.shadow_space(), 32);
        assert_eq!(cc.arg_gp(0), Some(regs::rcx()));
    }
}
