//! Executable-memory allocation and code installation.
//!
//! This crate supplies the memory half of the `anvil` assembler: a
//! granule-bitmap [`JitAllocator`] over large OS reservations, the
//! [`virtmem`] platform adapter it builds on (reserve, protect, release,
//! instruction-cache sync, dual mapping), and a [`JitRuntime`] that installs
//! a laid-out [`anvil_asm::code::CodeHolder`] and returns a callable
//! pointer.
//!
//! ```no_run
//! use anvil_asm::assembler::Assembler;
//! use anvil_asm::code::CodeHolder;
//! use anvil_asm::emitter::Emitter;
//! use anvil_asm::x64::{regs, InstId};
//! use anvil_asm::Arch;
//! use anvil_jit::JitRuntime;
//!
//! let rt = JitRuntime::new()?;
//! let mut code = CodeHolder::new(Arch::X64)?;
//! let mut asm = Assembler::new(&mut code)?;
//! asm.emit2(InstId::Mov, regs::eax(), 42)?;
//! asm.emit0(InstId::Ret)?;
//!
//! let entry = rt.add(&mut code)?;
//! let f: extern "C" fn() -> i32 = unsafe { core::mem::transmute(entry) };
//! assert_eq!(f(), 42);
//! rt.release(entry)?;
//! # Ok::<(), anvil_asm::Error>(())
//! ```

mod addrtree;
pub mod allocator;
pub mod runtime;
pub mod virtmem;

pub use allocator::{JitAllocator, JitAllocatorOptions, JitAllocatorStats, JitSpan};
pub use runtime::JitRuntime;
