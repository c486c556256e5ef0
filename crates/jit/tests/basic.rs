use anvil_asm::Error;
use anvil_jit::{JitAllocator, JitAllocatorOptions};

fn small_allocator() -> JitAllocator {
    JitAllocator::with_options(JitAllocatorOptions {
        granularity: 64,
        block_size: 4096,
        max_block_size: 4096,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn zero_size_allocation_is_rejected() {
    let alloc = small_allocator();
    assert_eq!(alloc.alloc(0, 0).unwrap_err(), Error::InvalidArgument);
}

#[test]
fn first_fit_reuses_released_slot() {
    let alloc = small_allocator();
    let a = alloc.alloc(64, 0).unwrap();
    let b = alloc.alloc(128, 0).unwrap();
    let c = alloc.alloc(64, 0).unwrap();
    assert_eq!(b.rx() as usize - a.rx() as usize, 64);
    assert_eq!(c.rx() as usize - a.rx() as usize, 192);

    let first = a.rx();
    alloc.release(first).unwrap();
    let reused = alloc.alloc(64, 0).unwrap();
    assert_eq!(reused.rx(), first);
}

#[test]
fn sizes_round_up_to_granularity() {
    let alloc = small_allocator();
    let span = alloc.alloc(1, 0).unwrap();
    assert_eq!(span.size(), 64);
    assert_eq!(alloc.stats().used_size, 64);
}

#[test]
fn alloc_release_round_trips_the_used_count() {
    let alloc = small_allocator();
    let before = alloc.stats();
    let span = alloc.alloc(320, 0).unwrap();
    assert_eq!(alloc.stats().used_size, before.used_size + 320);
    alloc.release(span.rx()).unwrap();
    assert_eq!(alloc.stats().used_size, before.used_size);
    assert_eq!(alloc.stats().allocation_count, 0);
}

#[test]
fn block_sized_allocation_fills_the_block() {
    let alloc = small_allocator();
    let span = alloc.alloc(4096, 0).unwrap();
    assert_eq!(span.size(), 4096);
    let stats = alloc.stats();
    assert_eq!(stats.used_size, 4096);
    assert_eq!(stats.largest_free, 0);
    alloc.release(span.rx()).unwrap();
    assert_eq!(alloc.stats().largest_free, 4096);
}

#[test]
fn interior_and_foreign_pointers_are_rejected() {
    let alloc = small_allocator();
    let span = alloc.alloc(256, 0).unwrap();
    // Interior: past the first granule of the allocation.
    let interior = unsafe { span.rx().add(64) };
    assert_eq!(alloc.release(interior).unwrap_err(), Error::InvalidArgument);
    // Misaligned.
    let odd = unsafe { span.rx().add(1) };
    assert_eq!(alloc.release(odd).unwrap_err(), Error::InvalidArgument);
    // Foreign.
    assert_eq!(
        alloc.release(core::ptr::null_mut()).unwrap_err(),
        Error::InvalidArgument
    );
    let stack_local = 0u8;
    let _ = alloc.release(&stack_local as *const u8 as *mut u8).unwrap_err();
    // The real allocation is still intact.
    alloc.release(span.rx()).unwrap();
}

#[test]
fn shrink_moves_the_stop_bit() {
    let alloc = small_allocator();
    let span = alloc.alloc(256, 0).unwrap();
    alloc.shrink(span.rx(), 128).unwrap();
    assert_eq!(alloc.stats().used_size, 128);
    // The freed tail is immediately reusable.
    let tail = alloc.alloc(128, 0).unwrap();
    assert_eq!(tail.rx() as usize - span.rx() as usize, 128);
    // Growing via shrink is rejected.
    assert_eq!(
        alloc.shrink(span.rx(), 512).unwrap_err(),
        Error::InvalidArgument
    );
    alloc.release(span.rx()).unwrap();
    assert_eq!(alloc.stats().used_size, 128);
}

#[test]
fn growth_spans_multiple_blocks() {
    let alloc = small_allocator();
    let a = alloc.alloc(4096, 0).unwrap();
    let b = alloc.alloc(4096, 0).unwrap();
    assert_eq!(alloc.stats().block_count, 2);
    alloc.release(a.rx()).unwrap();
    alloc.release(b.rx()).unwrap();
    // One empty block is retained to dampen churn.
    assert_eq!(alloc.stats().block_count, 1);
}

#[test]
fn allocator_is_shareable_across_threads() {
    use std::sync::Arc;

    let alloc = Arc::new(small_allocator());
    let mut handles = Vec::new();
    for _ in 0..4 {
        let alloc = Arc::clone(&alloc);
        handles.push(std::thread::spawn(move || {
            for _ in 0..64 {
                let span = alloc.alloc(64, 0).unwrap();
                alloc.release(span.rx()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(alloc.stats().used_size, 0);
}

#[cfg(all(target_arch = "x86_64", unix))]
mod execution {
    use super::*;
    use anvil_asm::assembler::Assembler;
    use anvil_asm::code::CodeHolder;
    use anvil_asm::emitter::Emitter;
    use anvil_asm::x64::regs::*;
    use anvil_asm::x64::InstId::*;
    use anvil_asm::Arch;
    use anvil_jit::JitRuntime;

    #[test]
    fn returns_a_constant() {
        let rt = JitRuntime::new().unwrap();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        {
            let mut asm = Assembler::new(&mut code).unwrap();
            asm.emit2(Mov, eax(), 42).unwrap();
            asm.emit0(Ret).unwrap();
        }
        let entry = rt.add(&mut code).unwrap();
        let f: extern "C" fn() -> i32 = unsafe { core::mem::transmute(entry) };
        assert_eq!(f(), 42);
        rt.release(entry).unwrap();
    }

    #[test]
    fn adds_its_arguments() {
        let rt = JitRuntime::new().unwrap();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        {
            let mut asm = Assembler::new(&mut code).unwrap();
            // SysV: args in rdi/rsi, result in rax.
            asm.emit2(Mov, rax(), rdi()).unwrap();
            asm.emit2(Add, rax(), rsi()).unwrap();
            asm.emit0(Ret).unwrap();
        }
        let entry = rt.add(&mut code).unwrap();
        let f: extern "C" fn(i64, i64) -> i64 = unsafe { core::mem::transmute(entry) };
        assert_eq!(f(2, 3), 5);
        assert_eq!(f(-7, 7), 0);
        rt.release(entry).unwrap();
    }

    #[test]
    fn branches_resolve_in_installed_code() {
        let rt = JitRuntime::new().unwrap();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        {
            let mut asm = Assembler::new(&mut code).unwrap();
            // max(a, b): cmp, jge over the swap.
            let done = asm.new_label();
            asm.emit2(Mov, rax(), rdi()).unwrap();
            asm.emit2(Cmp, rax(), rsi()).unwrap();
            asm.emit1(Jge, done).unwrap();
            asm.emit2(Mov, rax(), rsi()).unwrap();
            asm.bind(done).unwrap();
            asm.emit0(Ret).unwrap();
        }
        let entry = rt.add(&mut code).unwrap();
        let f: extern "C" fn(i64, i64) -> i64 = unsafe { core::mem::transmute(entry) };
        assert_eq!(f(3, 9), 9);
        assert_eq!(f(9, 3), 9);
        rt.release(entry).unwrap();
    }

    #[test]
    fn holder_in_error_state_is_refused() {
        let rt = JitRuntime::new().unwrap();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        {
            let mut asm = Assembler::new(&mut code).unwrap();
            let _ = asm.emit2(Add, eax(), rbx());
        }
        assert_eq!(rt.add(&mut code).unwrap_err(), Error::InvalidOperandSize);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dual_mapping_mode_executes() {
        let rt = JitRuntime::with_options(JitAllocatorOptions {
            use_dual_mapping: true,
            ..Default::default()
        })
        .unwrap();
        let mut code = CodeHolder::new(Arch::X64).unwrap();
        {
            let mut asm = Assembler::new(&mut code).unwrap();
            asm.emit2(Mov, eax(), 7).unwrap();
            asm.emit0(Ret).unwrap();
        }
        let entry = rt.add(&mut code).unwrap();
        let f: extern "C" fn() -> i32 = unsafe { core::mem::transmute(entry) };
        assert_eq!(f(), 7);
        rt.release(entry).unwrap();
    }
}
