//! The emitted runtime library.
//!
//! Every compiled image begins with the same prelude: a `nop` at the
//! un-fixable address 0, the `jal` to `main` (patched once `main` is
//! defined), and one stub per system call. A stub pops its declared
//! arguments from the stack into `$a0..$a3`, zeroes the argument
//! registers it does not use, loads the call number into `$v0`, traps,
//! and jumps back through `$ra`. `exit` is emitted first so that a
//! `main` that simply returns falls through into it.

use mica_asm::{Imm16, Instruction, RegId, Syscall};

use crate::symtab::{ProcAddress, Ty};
use crate::{CompileError, Parser};

impl Parser<'_> {
    pub(crate) fn emit_runtime(&mut self) -> Result<(), CompileError> {
        // the instruction at address zero cannot be fixed up
        self.emit(Instruction::Nop)?;

        let main_site = self.emitter().pc();
        self.symbols().declare_procedure(
            "main".to_string(),
            Ty::Int,
            ProcAddress::Forward {
                sites: vec![main_site],
            },
        );
        self.emit(Instruction::Jal { index: 0 })?;

        self.exit_stub()?;
        self.read_stub()?;
        self.write_stub()?;
        self.open_stub()?;
        self.malloc_stub()?;
        self.putchar_stub()?;
        self.sched_yield_stub()?;
        self.alarm_stub()?;
        self.select_stub()?;
        self.no_argument_stub("mlock", Syscall::Mlock)?;
        self.no_argument_stub("munlock", Syscall::Munlock)?;
        self.no_argument_stub("getpid", Syscall::Getpid)?;
        self.no_argument_stub("signal", Syscall::Signal)?;
        self.mmap_stub()?;
        self.no_argument_stub("madvise", Syscall::Madvise)
    }

    fn declare_stub(&mut self, name: &str, ty: Ty) {
        let entry = self.emitter().pc();
        self.symbols()
            .declare_procedure(name.to_string(), ty, ProcAddress::Defined(entry));
    }

    /// `reg := 0`
    fn zero_argument(&mut self, reg: RegId) -> Result<(), CompileError> {
        self.emit(Instruction::Addiu {
            rt: reg,
            rs: RegId::ZR,
            imm: Imm16::from_word(0),
        })
    }

    /// Pops the top of the stack into `reg`.
    fn pop_argument(&mut self, reg: RegId) -> Result<(), CompileError> {
        self.emit(Instruction::Lw {
            rt: reg,
            rs: RegId::SP,
            imm: Imm16::from_word(0),
        })?;
        self.emit(Instruction::Addiu {
            rt: RegId::SP,
            rs: RegId::SP,
            imm: Imm16::from_word(4),
        })
    }

    fn trap(&mut self, call: Syscall) -> Result<(), CompileError> {
        self.emit(Instruction::Addiu {
            rt: RegId::V0,
            rs: RegId::ZR,
            imm: Imm16::from_word(call.number()),
        })?;
        self.emit(Instruction::Syscall)
    }

    fn ret(&mut self) -> Result<(), CompileError> {
        self.emit(Instruction::Jr { rs: RegId::RA })
    }

    fn exit_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("exit", Ty::Int);

        self.zero_argument(RegId::A3)?;
        self.zero_argument(RegId::A2)?;
        self.zero_argument(RegId::A1)?;
        self.pop_argument(RegId::A0)?;
        // the process is gone; no return
        self.trap(Syscall::Exit)
    }

    fn read_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("read", Ty::Int);

        self.zero_argument(RegId::A3)?;
        self.pop_argument(RegId::A2)?; // count
        self.pop_argument(RegId::A1)?; // buffer
        self.pop_argument(RegId::A0)?; // descriptor
        self.trap(Syscall::Read)?;
        self.ret()
    }

    fn write_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("write", Ty::Int);

        self.zero_argument(RegId::A3)?;
        self.pop_argument(RegId::A2)?; // count
        self.pop_argument(RegId::A1)?; // buffer
        self.pop_argument(RegId::A0)?; // descriptor
        self.trap(Syscall::Write)?;
        self.ret()
    }

    fn open_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("open", Ty::Int);

        self.zero_argument(RegId::A3)?;
        self.pop_argument(RegId::A2)?; // mode
        self.pop_argument(RegId::A1)?; // flags
        self.pop_argument(RegId::A0)?; // file name
        self.trap(Syscall::Open)?;
        self.ret()
    }

    fn malloc_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("malloc", Ty::IntPtr);

        self.zero_argument(RegId::A3)?;
        self.zero_argument(RegId::A2)?;
        self.zero_argument(RegId::A1)?;
        self.pop_argument(RegId::A0)?; // size
        self.trap(Syscall::Malloc)?;
        self.ret()
    }

    /// `putchar(c)` is `write(1, &c, 1)`: the argument is still on the
    /// stack, so its address is simply `$sp`.
    fn putchar_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("putchar", Ty::Int);

        self.zero_argument(RegId::A3)?;
        self.emit(Instruction::Addiu {
            rt: RegId::A2,
            rs: RegId::ZR,
            imm: Imm16::from_word(1),
        })?;
        self.emit(Instruction::Addiu {
            rt: RegId::A1,
            rs: RegId::SP,
            imm: Imm16::from_word(0),
        })?;
        self.emit(Instruction::Addiu {
            rt: RegId::SP,
            rs: RegId::SP,
            imm: Imm16::from_word(4),
        })?;
        self.emit(Instruction::Addiu {
            rt: RegId::A0,
            rs: RegId::ZR,
            imm: Imm16::from_word(1),
        })?;
        self.trap(Syscall::Write)?;
        self.ret()
    }

    fn sched_yield_stub(&mut self) -> Result<(), CompileError> {
        self.no_argument_stub("sched_yield", Syscall::SchedYield)
    }

    fn alarm_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("alarm", Ty::Int);

        self.pop_argument(RegId::A2)?; // file name
        self.pop_argument(RegId::A1)?; // segment size
        self.pop_argument(RegId::A0)?; // process id
        self.trap(Syscall::Alarm)?;
        self.ret()
    }

    fn select_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("select", Ty::Int);

        self.zero_argument(RegId::A2)?;
        self.pop_argument(RegId::A1)?; // next process
        self.pop_argument(RegId::A0)?; // previous process
        self.trap(Syscall::Select)?;
        self.ret()
    }

    fn mmap_stub(&mut self) -> Result<(), CompileError> {
        self.declare_stub("mmap", Ty::Int);

        self.zero_argument(RegId::A2)?;
        self.zero_argument(RegId::A1)?;
        self.pop_argument(RegId::A0)?; // size
        self.trap(Syscall::Mmap)?;
        self.ret()
    }

    fn no_argument_stub(&mut self, name: &str, call: Syscall) -> Result<(), CompileError> {
        self.declare_stub(name, Ty::Int);

        self.zero_argument(RegId::A3)?;
        self.zero_argument(RegId::A2)?;
        self.zero_argument(RegId::A1)?;
        self.trap(call)?;
        self.ret()
    }
}
