//! The MICA machine: emulator, system calls, and micro-kernel.
//!
//! The [`Machine`] interprets one instruction per [`Machine::step`] and
//! reports what happened as a [`StepState`]: keep going, a trap that
//! needs a kernel decision, or a process exit. The [`Kernel`] drives the
//! machine, counts instruction ticks for preemption, and owns the
//! scheduling policy: a FIFO ready queue, round-robin time slices, and
//! one global blocking lock with a FIFO wait queue.
//!
//! Emulated processes live in segments of a virtual backing store and
//! are demand-paged into physical memory one 4 KiB page at a time. The
//! address range above [`consts::SHARED_SPACE_START`] bypasses
//! translation entirely and is shared between all processes; the
//! Michael–Scott queue in [`shared`] coordinates through it.

pub mod consts;
mod error;
mod kernel;
mod machine;
mod memory;
mod process;
pub mod shared;
mod state;
mod syscall;

pub use error::{Exception, VmError};
pub use kernel::{Kernel, Lock};
pub use machine::{Cpu, Machine, MachineConfig};
pub use memory::{Memory, PageTable};
pub use process::{ProcState, Process, Segment};
pub use state::{KernelAction, StepState};
