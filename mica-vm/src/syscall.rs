//! System call dispatch.
//!
//! The calling convention: the number in `$v0`, arguments in
//! `$a0..$a3`, the result back in `$v0`. Host-facing calls (read,
//! write, open) move bytes between packed emulated buffers and real
//! descriptors; machine-private calls bridge to the kernel state.
//! Calls that need a scheduling decision set the pending kernel action
//! and return a [`StepState::Trap`] instead of re-entering the
//! interpreter.

use mica_asm::{RegId, Syscall};
use mica_types::Word;
use tracing::{debug, info};

use crate::state::{KernelAction, StepState};
use crate::{Exception, Machine, VmError};

impl Machine {
    pub(crate) fn syscall(&mut self) -> Result<StepState, VmError> {
        let number = self.cpu.regs[RegId::V0];
        let call = Syscall::try_from(number).map_err(|_| Exception::UnknownSyscall)?;

        // the saved pc of a trapping process must point past the
        // syscall, so the program counter advances first
        self.cpu.pc += 4;

        match call {
            Syscall::Exit => {
                let code = self.cpu.regs[RegId::A0];
                self.cpu.regs[RegId::V0] = code;
                info!(pid = self.running_pid(), code, "exiting");
                Ok(StepState::Exited(code))
            }

            Syscall::Read => {
                let count = self.cpu.regs[RegId::A2];
                let vaddr = self.cpu.regs[RegId::A1];
                let fd = self.cpu.regs[RegId::A0];

                let mut buf = vec![0u8; count.max(0) as usize];
                let n = self.files.read(fd, &mut buf);
                if n > 0 {
                    self.write_bytes(vaddr, &buf[..n as usize])?;
                }
                self.cpu.regs[RegId::V0] = n;

                debug!(fd, count, read = n, "read");
                Ok(StepState::Continue)
            }

            Syscall::Write => {
                let count = self.cpu.regs[RegId::A2];
                let vaddr = self.cpu.regs[RegId::A1];
                let fd = self.cpu.regs[RegId::A0];

                let bytes = self.read_bytes(vaddr, count)?;
                let n = self.files.write(fd, &bytes);
                self.cpu.regs[RegId::V0] = n;

                debug!(fd, count, wrote = n, "write");
                Ok(StepState::Continue)
            }

            Syscall::Open => {
                let flags = self.cpu.regs[RegId::A1];
                let vaddr = self.cpu.regs[RegId::A0];

                let name = self.read_string(vaddr)?;
                let fd = self.files.open(&name, flags);
                self.cpu.regs[RegId::V0] = fd;

                debug!(name, flags, fd, "open");
                Ok(StepState::Continue)
            }

            Syscall::Malloc => {
                let size = self.cpu.regs[RegId::A0];
                let addr = self.malloc_bump(size)?;
                self.cpu.regs[RegId::V0] = addr;
                Ok(StepState::Continue)
            }

            Syscall::SchedYield => {
                self.action = KernelAction::Schedule;
                Ok(StepState::Trap(KernelAction::Schedule))
            }

            Syscall::Alarm => {
                let pid = self.cpu.regs[RegId::A0];
                let segment_size = self.cpu.regs[RegId::A1];
                let vaddr = self.cpu.regs[RegId::A2];

                let name = self.read_string(vaddr)?;
                self.load_executable(pid, segment_size, &name)?;
                Ok(StepState::Continue)
            }

            Syscall::Select => {
                let prev = self.cpu.regs[RegId::A0];
                let next = self.cpu.regs[RegId::A1];

                debug!(prev, next, "select");
                self.save_into(prev)?;
                self.restore(next)?;
                Ok(StepState::Continue)
            }

            Syscall::Mlock => {
                self.action = KernelAction::Lock;
                Ok(StepState::Trap(KernelAction::Lock))
            }

            Syscall::Munlock => {
                self.action = KernelAction::Unlock;
                Ok(StepState::Trap(KernelAction::Unlock))
            }

            Syscall::Getpid => {
                self.cpu.regs[RegId::V0] = self.running_pid();
                Ok(StepState::Continue)
            }

            Syscall::Signal => {
                self.cpu.regs[RegId::V0] = self.action.number();
                debug!(action = self.action.number(), "signal");
                Ok(StepState::Continue)
            }

            Syscall::Mmap => {
                let size = self.cpu.regs[RegId::A0];
                self.cpu.regs[RegId::V0] = self.shared_alloc(size);
                Ok(StepState::Continue)
            }

            Syscall::Madvise => {
                let addr = self.shared_queue()?;
                self.cpu.regs[RegId::V0] = addr;
                Ok(StepState::Continue)
            }
        }
    }
}
