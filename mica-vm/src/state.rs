//! Step results of the interpreter.

use mica_types::Word;

/// Why a running process trapped to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum KernelAction {
    /// Give the processor to the next ready process.
    Schedule = 0,
    /// The process wants the global lock.
    Lock = 1,
    /// The process releases the global lock.
    Unlock = 2,
}

impl KernelAction {
    /// The action number, as the `signal` system call reports it.
    pub const fn number(self) -> Word {
        self as Word
    }
}

/// Resulting state of one interpreter step.
///
/// The interpreter never re-enters itself: a system call that needs a
/// scheduling decision returns [`StepState::Trap`] and the kernel acts
/// on it before stepping again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// The instruction completed; keep stepping.
    Continue,
    /// The running process trapped; the kernel must decide.
    Trap(KernelAction),
    /// The running process exited with the given code.
    Exited(Word),
}

impl StepState {
    /// True when the machine should simply keep stepping.
    pub const fn should_continue(&self) -> bool {
        matches!(self, StepState::Continue)
    }
}
