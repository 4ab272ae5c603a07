//! Instruction set of the MICA machine.
//!
//! A MIPS32-like ISA with three 32-bit formats (big-endian field
//! layout):
//!
//! ```text
//! R: opcode(6) | rs(5) | rt(5) | rd(5) | 00000 | function(6)
//! I: opcode(6) | rs(5) | rt(5) | immediate(16, two's complement)
//! J: opcode(6) | instr_index(26)
//! ```
//!
//! The crate provides the typed [`Instruction`] representation with its
//! encoder and decoder, the register file names, the system call numbers
//! of the machine ABI, and the [`Image`] container for executable
//! binaries.

#![warn(missing_docs)]

mod image;
mod instruction;
mod opcode;
mod reg;
mod syscall;

pub use image::Image;
pub use instruction::{Imm16, Instruction, RawInstruction};
pub use opcode::{DecodeError, Function, Opcode};
pub use reg::RegId;
pub use syscall::Syscall;
