//! Emulator faults.

use mica_asm::DecodeError;
use mica_types::Word;

/// A fatal machine exception.
///
/// Every exception terminates the emulation; the numeric code becomes
/// the host exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum Exception {
    /// `teq` fired, or a division by zero.
    #[error("signal")]
    Signal = 1,
    /// Unaligned or out-of-range memory access.
    #[error("address error")]
    AddressError = 2,
    /// The fetched word does not decode to an instruction.
    #[error("unknown instruction")]
    UnknownInstruction = 3,
    /// The heap bump crossed the stack pointer.
    #[error("heap overflow")]
    HeapOverflow = 4,
    /// `$v0` named no known system call.
    #[error("unknown syscall")]
    UnknownSyscall = 5,
    /// A SPECIAL instruction with an unknown function field.
    #[error("unknown function")]
    UnknownFunction = 6,
}

impl Exception {
    /// The exception number, used as the process exit code.
    pub const fn code(self) -> Word {
        self as Word
    }
}

impl From<DecodeError> for Exception {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::UnknownOpcode(_) => Exception::UnknownInstruction,
            DecodeError::UnknownFunction(_) => Exception::UnknownFunction,
        }
    }
}

/// Anything that can stop the virtual machine.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// A machine exception; see [`Exception`].
    #[error("exception: {0}")]
    Exception(#[from] Exception),
    /// Host I/O failed while loading an executable.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A system call or the kernel named a process that does not exist.
    #[error("no such process: {0}")]
    NoSuchProcess(Word),
    /// Nothing is loaded or nothing is left to run.
    #[error("nothing to run")]
    NothingToRun,
}

impl VmError {
    /// The host exit status this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            VmError::Exception(e) => e.code(),
            _ => 1,
        }
    }
}
