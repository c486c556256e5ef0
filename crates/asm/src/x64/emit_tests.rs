//! Encoder tests: symbolic instruction in, exact bytes out.

use crate::arch::{Arch, CpuFeatures};
use crate::assembler::Assembler;
use crate::code::{CodeHolder, SectionFlags};
use crate::emitter::{AlignMode, Emitter};
use crate::error::Error;
use crate::operand::{Mem, Scale, SegOverride};
use crate::x64::regs::*;
use crate::x64::InstId::*;

fn assemble(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let mut asm = Assembler::new(&mut code).unwrap();
    f(&mut asm);
    assert_eq!(code.error(), None, "assembler recorded an error");
    let text = code.text_section();
    code.section(text).unwrap().buffer().data().to_vec()
}

#[track_caller]
fn check(expected: &[u8], f: impl FnOnce(&mut Assembler)) {
    let got = assemble(f);
    assert_eq!(
        got, expected,
        "encoded {got:02X?}, expected {expected:02X?}"
    );
}

#[test]
fn mov_forms() {
    check(&[0xB8, 0x01, 0x00, 0x00, 0x00], |a| {
        a.emit2(Mov, eax(), 1).unwrap();
    });
    check(&[0xB8, 0x00, 0x00, 0x00, 0x80], |a| {
        a.emit2(Mov, eax(), 0x8000_0000i64).unwrap();
    });
    check(&[0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00], |a| {
        a.emit2(Mov, rax(), 1).unwrap();
    });
    check(&[0x48, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF], |a| {
        a.emit2(Mov, rax(), -1).unwrap();
    });
    check(
        &[0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11],
        |a| {
            a.emit2(Mov, rax(), 0x1122_3344_5566_7788i64).unwrap();
        },
    );
    check(&[0x89, 0xD8], |a| {
        a.emit2(Mov, eax(), ebx()).unwrap();
    });
    check(&[0x66, 0xB9, 0x34, 0x12], |a| {
        a.emit2(Mov, cx(), 0x1234).unwrap();
    });
    check(&[0xB0, 0x07], |a| {
        a.emit2(Mov, al(), 7).unwrap();
    });
}

#[test]
fn alu_forms() {
    check(&[0x48, 0x01, 0xD8], |a| {
        a.emit2(Add, rax(), rbx()).unwrap();
    });
    check(&[0x48, 0x83, 0xC0, 0x05], |a| {
        a.emit2(Add, rax(), 5).unwrap();
    });
    check(&[0x05, 0x2C, 0x01, 0x00, 0x00], |a| {
        a.emit2(Add, eax(), 300).unwrap();
    });
    check(&[0x81, 0xC1, 0x2C, 0x01, 0x00, 0x00], |a| {
        a.emit2(Add, ecx(), 300).unwrap();
    });
    check(&[0x04, 0x05], |a| {
        a.emit2(Add, al(), 5).unwrap();
    });
    check(&[0x66, 0x83, 0xC0, 0x05], |a| {
        a.emit2(Add, ax(), 5).unwrap();
    });
    check(&[0x48, 0x29, 0xC8], |a| {
        a.emit2(Sub, rax(), rcx()).unwrap();
    });
    check(&[0x48, 0x31, 0xC0], |a| {
        a.emit2(Xor, rax(), rax()).unwrap();
    });
    check(&[0x85, 0xC0], |a| {
        a.emit2(Test, eax(), eax()).unwrap();
    });
    check(&[0x48, 0x83, 0xF8, 0x00], |a| {
        a.emit2(Cmp, rax(), 0).unwrap();
    });
    check(&[0x45, 0x01, 0xC8], |a| {
        a.emit2(Add, r8d(), r9d()).unwrap();
    });
}

#[test]
fn unary_and_shift_forms() {
    check(&[0xFF, 0xC0], |a| {
        a.emit1(Inc, eax()).unwrap();
    });
    check(&[0x48, 0xFF, 0xC8], |a| {
        a.emit1(Dec, rax()).unwrap();
    });
    check(&[0x48, 0xF7, 0xD8], |a| {
        a.emit1(Neg, rax()).unwrap();
    });
    check(&[0x48, 0xD1, 0xE0], |a| {
        a.emit2(Shl, rax(), 1).unwrap();
    });
    check(&[0x48, 0xC1, 0xE0, 0x05], |a| {
        a.emit2(Shl, rax(), 5).unwrap();
    });
    check(&[0x48, 0xD3, 0xE0], |a| {
        a.emit2(Shl, rax(), cl()).unwrap();
    });
    check(&[0x48, 0xC1, 0xF8, 0x03], |a| {
        a.emit2(Sar, rax(), 3).unwrap();
    });
    check(&[0x48, 0x0F, 0xAF, 0xC3], |a| {
        a.emit2(Imul, rax(), rbx()).unwrap();
    });
    check(&[0x48, 0x6B, 0xC0, 0x0A], |a| {
        a.emit3(Imul, rax(), rax(), 10).unwrap();
    });
}

#[test]
fn memory_addressing_special_cases() {
    // Plain base.
    check(&[0x8B, 0x00], |a| {
        a.emit2(Mov, eax(), Mem::base(rax())).unwrap();
    });
    // rbp/r13 have no mod=00 form: a zero disp8 is forced.
    check(&[0x8B, 0x45, 0x00], |a| {
        a.emit2(Mov, eax(), Mem::base(rbp())).unwrap();
    });
    check(&[0x41, 0x8B, 0x45, 0x00], |a| {
        a.emit2(Mov, eax(), Mem::base(r13())).unwrap();
    });
    // rsp/r12 force a SIB byte with index=none.
    check(&[0x8B, 0x04, 0x24], |a| {
        a.emit2(Mov, eax(), Mem::base(rsp())).unwrap();
    });
    check(&[0x41, 0x8B, 0x04, 0x24], |a| {
        a.emit2(Mov, eax(), Mem::base(r12())).unwrap();
    });
    // Disp sizing.
    check(&[0x8B, 0x40, 0x10], |a| {
        a.emit2(Mov, eax(), Mem::base_disp(rax(), 16)).unwrap();
    });
    check(&[0x8B, 0x80, 0x00, 0x01, 0x00, 0x00], |a| {
        a.emit2(Mov, eax(), Mem::base_disp(rax(), 256)).unwrap();
    });
    // Base + scaled index.
    check(&[0x89, 0x54, 0x88, 0x10], |a| {
        a.emit2(
            Mov,
            Mem::base_index_disp(rax(), rcx(), Scale::Four, 16),
            edx(),
        )
        .unwrap();
    });
    // Absolute addressing uses the SIB form in long mode.
    check(&[0x8B, 0x04, 0x25, 0x00, 0x10, 0x00, 0x00], |a| {
        a.emit2(Mov, eax(), Mem::abs(0x1000)).unwrap();
    });
    // Segment override.
    check(&[0x64, 0x8B, 0x00], |a| {
        a.emit2(Mov, eax(), Mem::base(rax()).with_segment(SegOverride::Fs))
            .unwrap();
    });
    // lea ignores the operand size of the address.
    check(&[0x48, 0x8D, 0x45, 0xF8], |a| {
        a.emit2(Lea, rax(), Mem::base_disp(rbp(), -8)).unwrap();
    });
}

#[test]
fn explicit_memory_widths() {
    check(&[0x80, 0x00, 0x05], |a| {
        a.emit2(Add, Mem::base(rax()).with_size(1), 5).unwrap();
    });
    check(&[0x83, 0x00, 0x05], |a| {
        a.emit2(Add, Mem::base(rax()).with_size(4), 5).unwrap();
    });
    check(&[0x48, 0xFF, 0x00], |a| {
        a.emit1(Inc, Mem::base(rax()).with_size(8)).unwrap();
    });
    check(&[0x0F, 0xB6, 0x00], |a| {
        a.emit2(Movzx, eax(), Mem::base(rax()).with_size(1)).unwrap();
    });
    check(&[0x48, 0x0F, 0xBF, 0x03], |a| {
        a.emit2(Movsx, rax(), bx()).unwrap();
    });
    check(&[0x48, 0x63, 0xC3], |a| {
        a.emit2(Movsxd, rax(), ebx()).unwrap();
    });
    // A size-less memory operand is ambiguous for digit-selected forms.
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let mut asm = Assembler::new(&mut code).unwrap();
    assert_eq!(
        asm.emit2(Add, Mem::base(rax()), 5).unwrap_err(),
        Error::InvalidOperandSize
    );
}

#[test]
fn byte_register_rex_interactions() {
    // spl..dil require an empty REX prefix.
    check(&[0x40, 0xB4, 0x01], |a| {
        a.emit2(Mov, spl(), 1).unwrap();
    });
    // ah..bh encode without REX.
    check(&[0xB4, 0x01], |a| {
        a.emit2(Mov, ah(), 1).unwrap();
    });
    check(&[0x88, 0xC4], |a| {
        a.emit2(Mov, ah(), al()).unwrap();
    });
    // Mixing a high-byte register with a REX-requiring one cannot encode.
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let mut asm = Assembler::new(&mut code).unwrap();
    assert_eq!(
        asm.emit2(Add, ah(), spl()).unwrap_err(),
        Error::InvalidCombination
    );
    code.clear_error();
    let mut asm = Assembler::new(&mut code).unwrap();
    assert_eq!(
        asm.emit2(Add, ah(), r8b()).unwrap_err(),
        Error::InvalidCombination
    );
}

#[test]
fn stack_and_control_forms() {
    check(&[0x55], |a| {
        a.emit1(Push, rbp()).unwrap();
    });
    check(&[0x41, 0x54], |a| {
        a.emit1(Push, r12()).unwrap();
    });
    check(&[0x5D], |a| {
        a.emit1(Pop, rbp()).unwrap();
    });
    check(&[0x6A, 0x08], |a| {
        a.emit1(Push, 8).unwrap();
    });
    check(&[0xC3], |a| {
        a.emit0(Ret).unwrap();
    });
    check(&[0xC2, 0x10, 0x00], |a| {
        a.emit1(Ret, 16).unwrap();
    });
    check(&[0xCC], |a| {
        a.emit0(Int3).unwrap();
    });
    check(&[0x0F, 0x0B], |a| {
        a.emit0(Ud2).unwrap();
    });
    check(&[0x99], |a| {
        a.emit0(Cdq).unwrap();
    });
    check(&[0x48, 0x99], |a| {
        a.emit0(Cqo).unwrap();
    });
    check(&[0xFF, 0xD0], |a| {
        a.emit1(Call, rax()).unwrap();
    });
    check(&[0xFF, 0xE0], |a| {
        a.emit1(Jmp, rax()).unwrap();
    });
}

#[test]
fn lock_prefix() {
    check(&[0xF0, 0x01, 0x18], |a| {
        a.lock()
            .emit2(Add, Mem::base(rax()).with_size(4), ebx())
            .unwrap();
    });
    // LOCK requires a memory destination and a lockable instruction.
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let mut asm = Assembler::new(&mut code).unwrap();
    assert_eq!(
        asm.lock().emit2(Add, eax(), ebx()).unwrap_err(),
        Error::InvalidCombination
    );
    code.clear_error();
    let mut asm = Assembler::new(&mut code).unwrap();
    assert_eq!(
        asm.lock()
            .emit2(Cmp, Mem::base(rax()).with_size(4), ebx())
            .unwrap_err(),
        Error::InvalidCombination
    );
}

#[test]
fn sse_forms() {
    check(&[0xF3, 0x0F, 0x6F, 0x01], |a| {
        a.emit2(Movdqu, xmm0(), Mem::base(rcx())).unwrap();
    });
    check(&[0xF3, 0x0F, 0x7F, 0x07], |a| {
        a.emit2(Movdqu, Mem::base(rdi()), xmm0()).unwrap();
    });
    check(&[0x66, 0x0F, 0x6F, 0xC1], |a| {
        a.emit2(Movdqa, xmm0(), xmm1()).unwrap();
    });
    check(&[0x0F, 0x28, 0xC1], |a| {
        a.emit2(Movaps, xmm0(), xmm1()).unwrap();
    });
    check(&[0xF3, 0x0F, 0x10, 0x00], |a| {
        a.emit2(Movss, xmm0(), Mem::base(rax())).unwrap();
    });
    check(&[0xF2, 0x0F, 0x58, 0xC1], |a| {
        a.emit2(Addsd, xmm0(), xmm1()).unwrap();
    });
    check(&[0x0F, 0x58, 0xC1], |a| {
        a.emit2(Addps, xmm0(), xmm1()).unwrap();
    });
    check(&[0x66, 0x0F, 0xEF, 0xC0], |a| {
        a.emit2(Pxor, xmm0(), xmm0()).unwrap();
    });
    check(&[0x66, 0x0F, 0xFE, 0xC1], |a| {
        a.emit2(Paddd, xmm0(), xmm1()).unwrap();
    });
    check(&[0x66, 0x48, 0x0F, 0x7E, 0xC0], |a| {
        a.emit2(Movq, rax(), xmm0()).unwrap();
    });
    check(&[0x66, 0x0F, 0x6E, 0xC8], |a| {
        a.emit2(Movd, xmm1(), eax()).unwrap();
    });
    // Extended registers pick up REX.R.
    check(&[0x66, 0x44, 0x0F, 0xEF, 0xC0], |a| {
        a.emit2(Pxor, xmm8(), xmm0()).unwrap();
    });
}

#[test]
fn avx_forms() {
    check(&[0xC5, 0xF0, 0x58, 0xC2], |a| {
        a.emit3(Vaddps, xmm0(), xmm1(), xmm2()).unwrap();
    });
    check(&[0xC5, 0xF4, 0x58, 0xC2], |a| {
        a.emit3(Vaddps, ymm0(), ymm1(), ymm2()).unwrap();
    });
    check(&[0xC5, 0xF0, 0x58, 0x00], |a| {
        a.emit3(Vaddps, xmm0(), xmm1(), Mem::base(rax())).unwrap();
    });
    // An extended rm register forces the three-byte prefix.
    check(&[0xC4, 0xC1, 0x70, 0x58, 0xC2], |a| {
        a.emit3(Vaddps, xmm0(), xmm1(), xmm10()).unwrap();
    });
    check(&[0xC5, 0xF9, 0xEF, 0xC1], |a| {
        a.emit3(Vpxor, xmm0(), xmm0(), xmm1()).unwrap();
    });
    check(&[0xC5, 0xFA, 0x6F, 0x01], |a| {
        a.emit2(Vmovdqu, xmm0(), Mem::base(rcx())).unwrap();
    });
    check(&[0xC5, 0xFE, 0x6F, 0x01], |a| {
        a.emit2(Vmovdqu, ymm0(), Mem::base(rcx())).unwrap();
    });
}

#[test]
fn avx512_forms() {
    check(&[0x62, 0xF1, 0x75, 0x48, 0xFE, 0xC2], |a| {
        a.emit3(Vpaddd, zmm0(), zmm1(), zmm2()).unwrap();
    });
    check(&[0x62, 0xF1, 0x7E, 0x48, 0x6F, 0x08], |a| {
        a.emit2(Vmovdqu32, zmm1(), Mem::base(rax())).unwrap();
    });
    // Compressed disp8: 64 bytes scales to 1 at 512-bit length.
    check(&[0x62, 0xF1, 0x7E, 0x48, 0x6F, 0x40, 0x01], |a| {
        a.emit2(Vmovdqu32, zmm0(), Mem::base_disp(rax(), 64)).unwrap();
    });
    // Unscalable displacements fall back to disp32.
    check(
        &[0x62, 0xF1, 0x7E, 0x48, 0x6F, 0x80, 0x01, 0x00, 0x00, 0x00],
        |a| {
            a.emit2(Vmovdqu32, zmm0(), Mem::base_disp(rax(), 1)).unwrap();
        },
    );
    // Registers 16..=31 only exist under EVEX.
    check(&[0x62, 0x61, 0x75, 0x48, 0xFE, 0xC2], |a| {
        a.emit3(Vpaddd, zmm24(), zmm1(), zmm2()).unwrap();
    });
}

#[test]
fn branches_and_labels() {
    // Forward short jump over five NOPs.
    check(&[0xEB, 0x05, 0x90, 0x90, 0x90, 0x90, 0x90], |a| {
        a.set_short_jumps(true);
        let l = a.new_label();
        a.emit1(Jmp, l).unwrap();
        for _ in 0..5 {
            a.emit0(Nop).unwrap();
        }
        a.bind(l).unwrap();
    });
    // Without short jumps an unbound target commits to rel32.
    check(&[0xE9, 0x00, 0x00, 0x00, 0x00], |a| {
        let l = a.new_label();
        a.emit1(Jmp, l).unwrap();
        a.bind(l).unwrap();
    });
    // Backward branches pick rel8 when in range.
    check(&[0x90, 0xEB, 0xFE], |a| {
        let l = a.new_label();
        a.emit0(Nop).unwrap();
        a.bind(l).unwrap();
        a.emit1(Jmp, l).unwrap();
    });
    // Conditional forms.
    check(&[0x74, 0xFE], |a| {
        let l = a.new_label();
        a.bind(l).unwrap();
        a.emit1(Je, l).unwrap();
    });
    // A bound target at exactly -128 still encodes as rel8.
    let bytes = assemble(|a| {
        let l = a.new_label();
        a.bind(l).unwrap();
        for _ in 0..126 {
            a.emit0(Nop).unwrap();
        }
        a.emit1(Jmp, l).unwrap();
    });
    assert_eq!(&bytes[126..], &[0xEB, 0x80]);
    // One byte further and the encoder falls back to rel32.
    let bytes = assemble(|a| {
        let l = a.new_label();
        a.bind(l).unwrap();
        for _ in 0..127 {
            a.emit0(Nop).unwrap();
        }
        a.emit1(Jmp, l).unwrap();
    });
    assert_eq!(&bytes[127..], &[0xE9, 0x7C, 0xFF, 0xFF, 0xFF]);
    // A short jump committed against an unbound label fails at bind when
    // the distance ends up out of range.
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let mut asm = Assembler::new(&mut code).unwrap();
    asm.set_short_jumps(true);
    let l = asm.new_label();
    asm.emit1(Jmp, l).unwrap();
    for _ in 0..200 {
        asm.emit0(Nop).unwrap();
    }
    assert_eq!(asm.bind(l).unwrap_err(), Error::BranchTooFar);
}

#[test]
fn call_with_forward_label() {
    let bytes = assemble(|a| {
        let l = a.new_label();
        a.emit1(Call, l).unwrap();
        a.emit0(Ret).unwrap();
        a.bind(l).unwrap();
        a.emit0(Int3).unwrap();
    });
    // call rel32 to offset 6: disp = 6 - 5 = 1.
    assert_eq!(bytes, &[0xE8, 0x01, 0x00, 0x00, 0x00, 0xC3, 0xCC]);
}

#[test]
fn alignment_padding() {
    let bytes = assemble(|a| {
        a.emit0(Ret).unwrap();
        a.align(AlignMode::Code, 8).unwrap();
    });
    assert_eq!(bytes.len(), 8);
    // The padding is one seven-byte NOP, executable straight through.
    assert_eq!(&bytes[1..4], &[0x0F, 0x1F, 0x80]);

    let bytes = assemble(|a| {
        a.emit0(Ret).unwrap();
        a.align(AlignMode::Data, 4).unwrap();
    });
    assert_eq!(bytes, &[0xC3, 0x00, 0x00, 0x00]);
}

#[test]
fn feature_mask_is_checked() {
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let mut asm = Assembler::new(&mut code).unwrap();
    asm.set_features(CpuFeatures::none());
    assert_eq!(
        asm.emit2(Movdqu, xmm0(), xmm1()).unwrap_err(),
        Error::FeatureNotEnabled
    );
}

#[test]
fn errors_are_sticky_on_the_holder() {
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let mut asm = Assembler::new(&mut code).unwrap();
    assert_eq!(
        asm.emit2(Add, eax(), rbx()).unwrap_err(),
        Error::InvalidOperandSize
    );
    // The buffer is untouched and later emits report the first error.
    assert_eq!(asm.offset(), 0);
    assert_eq!(asm.emit0(Ret).unwrap_err(), Error::InvalidOperandSize);
    code.clear_error();
    let mut asm = Assembler::new(&mut code).unwrap();
    asm.emit0(Ret).unwrap();
}

#[test]
fn immediate_width_mismatch() {
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let mut asm = Assembler::new(&mut code).unwrap();
    assert_eq!(
        asm.emit2(Add, al(), 300).unwrap_err(),
        Error::InvalidOperandSize
    );
    code.clear_error();
    let mut asm = Assembler::new(&mut code).unwrap();
    // A 64-bit ALU immediate beyond 32 bits has no encoding.
    assert_eq!(
        asm.emit2(Add, rax(), 0x1_0000_0000i64).unwrap_err(),
        Error::InvalidOperandSize
    );
}

#[test]
fn rip_relative_label_references() {
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let data = code
        .new_section(".data", SectionFlags::READ | SectionFlags::INIT, 8)
        .unwrap();
    let value = code.new_label();
    {
        let mut asm = Assembler::new(&mut code).unwrap();
        asm.emit2(Mov, rax(), Mem::label(value, 0).with_size(8))
            .unwrap();
        asm.emit0(Ret).unwrap();
        asm.set_active_section(data).unwrap();
        asm.bind(value).unwrap();
        asm.embed(&0x4242_4242_4242_4242u64.to_le_bytes()).unwrap();
    }
    code.relocate(0x1000).unwrap();
    let image = code.to_image().unwrap();
    // mov rax, [rip+disp32]: 48 8B 05 <disp32>, ret at 7, data at 8.
    assert_eq!(&image[..3], &[0x48, 0x8B, 0x05]);
    let disp = i32::from_le_bytes(image[3..7].try_into().unwrap());
    // Target 0x1008, next instruction at 0x1007.
    assert_eq!(disp, 1);
}

#[test]
fn data_section_alignment_shifts_rip_disp() {
    let disp_with_alignment = |align: u32| {
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        let data = code
            .new_section(".data", SectionFlags::READ | SectionFlags::INIT, align)
            .unwrap();
        let value = code.new_label();
        {
            let mut asm = Assembler::new(&mut code).unwrap();
            asm.emit2(Mov, rax(), Mem::label(value, 0).with_size(8))
                .unwrap();
            asm.set_active_section(data).unwrap();
            asm.bind(value).unwrap();
            asm.embed(&[0; 8]).unwrap();
        }
        code.relocate(0x1000).unwrap();
        let image = code.to_image().unwrap();
        i32::from_le_bytes(image[3..7].try_into().unwrap())
    };
    let disp8 = disp_with_alignment(8);
    let disp64 = disp_with_alignment(64);
    // .text occupies 7 bytes; .data lands at 0x1008 vs 0x1040.
    assert_eq!(disp64 - disp8, 0x38);
}

#[test]
fn constant_pool_folds_and_resolves() {
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    let (pool, offset) = code.insert_const(&1.5f64.to_le_bytes()).unwrap();
    let (_, dup) = code.insert_const(&1.5f64.to_le_bytes()).unwrap();
    assert_eq!(offset, dup);
    {
        let mut asm = Assembler::new(&mut code).unwrap();
        asm.emit2(Movsd, xmm0(), Mem::label(pool, offset as i32).with_size(8))
            .unwrap();
        asm.emit0(Ret).unwrap();
        asm.embed_const_pool().unwrap();
    }
    code.relocate(0x2000).unwrap();
    let image = code.to_image().unwrap();
    // movsd xmm0, [rip+disp32] is 8 bytes, ret at 8, pool aligned up to 16.
    assert_eq!(&image[..4], &[0xF2, 0x0F, 0x10, 0x05]);
    let disp = i32::from_le_bytes(image[4..8].try_into().unwrap());
    assert_eq!(disp, 8);
    assert_eq!(&image[16..24], &1.5f64.to_le_bytes());
}

#[test]
fn embed_label_stores_an_absolute_address() {
    let mut code = CodeHolder::new(Arch::X64).unwrap();
    {
        let mut asm = Assembler::new(&mut code).unwrap();
        let target = asm.new_label();
        // Forward reference first, then bind, then a backward reference.
        asm.embed_label(target).unwrap();
        asm.bind(target).unwrap();
        asm.emit0(Ret).unwrap();
        asm.embed_label(target).unwrap();
    }
    code.relocate(0x4000).unwrap();
    let image = code.to_image().unwrap();
    assert_eq!(&image[0..8], &0x4008u64.to_le_bytes());
    assert_eq!(&image[9..17], &0x4008u64.to_le_bytes());
}

#[test]
fn prolog_and_epilog_sequences() {
    use crate::callconv::{CallConv, CallConvId, FuncFrame};

    let cc = CallConv::resolve(CallConvId::SysV64).unwrap();
    let mut frame = FuncFrame::new(cc);
    frame.add_dirty(rbx()).add_dirty(r12());
    frame.set_local_stack(16);
    frame.finalize().unwrap();

    let bytes = assemble(|a| {
        a.emit_prolog(&frame).unwrap();
        a.emit_epilog(&frame).unwrap();
    });
    assert_eq!(
        bytes,
        &[
            0x53, // push rbx
            0x41, 0x54, // push r12
            0x48, 0x83, 0xEC, 0x18, // sub rsp, 24
            0x48, 0x83, 0xC4, 0x18, // add rsp, 24
            0x41, 0x5C, // pop r12
            0x5B, // pop rbx
            0xC3, // ret
        ]
    );
}
