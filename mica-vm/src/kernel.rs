//! The micro-kernel: scheduling policy over the machine.
//!
//! The kernel drives [`Machine::step`] in a loop, counts a tick per
//! executed instruction while interrupts are armed, and preempts the
//! running process when its slice is spent. Suspension points are
//! exactly the traps: a time-slice expiry, `sched_yield`, `mlock`, and
//! `munlock`. Handling a trap is always save, decide, restore; the
//! interpreter is never re-entered from inside a decision.

use std::collections::VecDeque;

use mica_asm::Image;
use mica_types::Word;
use tracing::{debug, info, warn};

use crate::process::ProcState;
use crate::state::{KernelAction, StepState};
use crate::{Machine, MachineConfig, VmError};

/// The one global blocking lock.
///
/// Waiters queue in FIFO order. Unlocking drains the whole wait queue
/// back into the ready queue, so blocked processes resume in the order
/// they blocked.
#[derive(Debug, Default)]
pub struct Lock {
    owner: Option<Word>,
    waiters: VecDeque<Word>,
}

impl Lock {
    /// The pid holding the lock, if any.
    pub fn owner(&self) -> Option<Word> {
        self.owner
    }
}

/// The kernel: a machine plus scheduling state.
#[derive(Debug)]
pub struct Kernel {
    machine: Machine,
    ready: VecDeque<Word>,
    lock: Lock,
    ticks: Word,
}

impl Kernel {
    /// Boots `image` as the bootstrap process (pid 0) with `args` on
    /// its stack.
    pub fn boot(image: &Image, config: MachineConfig, args: &[String]) -> Result<Self, VmError> {
        Ok(Kernel {
            machine: Machine::boot(image, config, args)?,
            ready: VecDeque::new(),
            lock: Lock::default(),
            ticks: 0,
        })
    }

    /// Loads `path` as a new user process and appends it to the ready
    /// queue; returns its pid.
    pub fn spawn(&mut self, path: &str) -> Result<Word, VmError> {
        let pid = self.machine.next_pid();
        let segment_size = self.machine.config().segment_size;
        self.machine.load_executable(pid, segment_size, path)?;
        self.ready.push_back(pid);
        Ok(pid)
    }

    /// Runs until every process has exited; returns the last exit code.
    pub fn run(&mut self) -> Result<Word, VmError> {
        let time_slice = self.machine.config().time_slice;

        loop {
            match self.machine.step()? {
                StepState::Continue => {
                    if self.machine.interrupts_active() {
                        self.ticks += 1;
                        if self.ticks == time_slice {
                            debug!(pid = self.machine.running_pid(), "time slice expired");
                            self.handle_trap(KernelAction::Schedule)?;
                        }
                    }
                }
                StepState::Trap(action) => self.handle_trap(action)?,
                StepState::Exited(code) => {
                    if let Some(last) = self.reap(code)? {
                        return Ok(last);
                    }
                }
            }
        }
    }

    /// The machine under this kernel.
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Mutable access to the machine, for harness code and tests.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// The global lock, for inspection.
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    // ------------------------------------------------------------------
    // trap handling

    fn handle_trap(&mut self, action: KernelAction) -> Result<(), VmError> {
        // trap to kernel: save the running context, mask interrupts;
        // the restore on the way out re-arms them. The pending action
        // must track every trap, tick-driven ones included, so that the
        // next `signal` query reads the current reason and not the one
        // left behind by an earlier syscall.
        self.machine.action = action;
        self.machine.save_running();
        self.machine.disable_interrupts();
        self.ticks = 0;

        match action {
            KernelAction::Schedule => self.schedule(),
            KernelAction::Lock => self.lock_take(),
            KernelAction::Unlock => self.unlock(),
        }
    }

    /// Round-robin: the preempted process goes to the back of the ready
    /// queue (the bootstrap process does not re-queue), the front runs
    /// next. An empty queue keeps the current process running.
    fn schedule(&mut self) -> Result<(), VmError> {
        let running = self.machine.running_pid();

        if running > 0 {
            self.machine.set_state(running, ProcState::Ready);
            self.ready.push_back(running);
        }

        let next = self.ready.pop_front().unwrap_or(running);
        self.machine.restore(next)
    }

    fn lock_take(&mut self) -> Result<(), VmError> {
        let running = self.machine.running_pid();

        if self.lock.owner.is_some() {
            debug!(pid = running, owner = ?self.lock.owner, "lock held, blocking");
            self.lock.waiters.push_back(running);
            self.machine.set_state(running, ProcState::Blocked);

            let next = self.ready.pop_front().unwrap_or(running);
            return self.machine.restore(next);
        }

        debug!(pid = running, "lock acquired");
        self.lock.owner = Some(running);
        self.machine.restore(running)
    }

    /// Only the owner may unlock; anyone else is silently ignored.
    fn unlock(&mut self) -> Result<(), VmError> {
        let running = self.machine.running_pid();

        if self.lock.owner == Some(running) {
            self.lock.owner = None;
            debug!(pid = running, "lock released");

            while let Some(waiter) = self.lock.waiters.pop_front() {
                self.machine.set_state(waiter, ProcState::Ready);
                self.ready.push_back(waiter);
            }
        }

        self.machine.restore(running)
    }

    /// Retires an exited process. Returns the final exit code once
    /// nothing is left to schedule.
    fn reap(&mut self, code: Word) -> Result<Option<Word>, VmError> {
        let pid = self.machine.running_pid();
        info!(pid, code, "process exited");

        self.machine.remove_process(pid);

        match self.ready.pop_front() {
            Some(next) => {
                self.machine.restore(next)?;
                Ok(None)
            }
            None => {
                if !self.machine.is_halted() {
                    warn!("halting with blocked processes remaining");
                }
                Ok(Some(code))
            }
        }
    }
}
