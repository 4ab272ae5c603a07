//! Direct code emission into a binary image.
//!
//! The emitter owns the growing image and enforces two invariants the
//! rest of the machine relies on: a delay-slot `nop` follows every
//! branch and jump, and two `nop`s follow `mfhi`/`mflo` (the lo/hi
//! registers must not be touched by the next two instructions).

use mica_asm::{Image, Imm16, Instruction, RawInstruction};
use mica_types::Word;

use crate::CompileError;

/// Upper bound on emitted code plus data, in bytes.
pub const MAX_BINARY_LENGTH: Word = 131072;

/// Emits instructions and data words into an [`Image`].
#[derive(Debug, Default)]
pub struct Emitter {
    image: Image,
}

impl Emitter {
    /// An emitter over an empty image.
    pub fn new() -> Self {
        Emitter::default()
    }

    /// The address the next instruction will land on.
    pub fn pc(&self) -> Word {
        self.image.len_bytes()
    }

    /// Emits one instruction, plus the delay-slot padding it requires.
    pub fn emit(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.push(instr)?;

        match instr {
            Instruction::Beq { .. }
            | Instruction::Bne { .. }
            | Instruction::J { .. }
            | Instruction::Jal { .. }
            | Instruction::Jr { .. } => self.push(Instruction::Nop),
            Instruction::Mfhi { .. } | Instruction::Mflo { .. } => {
                self.push(Instruction::Nop)?;
                self.push(Instruction::Nop)
            }
            _ => Ok(()),
        }
    }

    fn push(&mut self, instr: Instruction) -> Result<(), CompileError> {
        if self.pc() >= MAX_BINARY_LENGTH {
            return Err(CompileError::BinaryTooLarge);
        }
        self.image.push_word(instr.encode() as Word);
        Ok(())
    }

    /// Appends a raw data word (globals, packed strings).
    pub fn emit_word(&mut self, w: Word) -> Result<(), CompileError> {
        if self.pc() >= MAX_BINARY_LENGTH {
            return Err(CompileError::BinaryTooLarge);
        }
        self.image.push_word(w);
        Ok(())
    }

    /// Points the jump or call at `site` to `target`.
    pub fn patch_jump(&mut self, site: Word, target: Word) {
        let index = (target / 4) as u32;
        let patched = match self.image.instruction(site) {
            Ok(Instruction::J { .. }) => Instruction::J { index },
            Ok(Instruction::Jal { .. }) => Instruction::Jal { index },
            other => unreachable!("jump fixup over non-jump at {site}: {other:?}"),
        };
        self.image.set_word(site, patched.encode() as Word);
    }

    /// Points the branch at `site` to the current address.
    ///
    /// The offset is relative to the instruction after the branch and is
    /// counted in words, so the delay-slot `nop` is included.
    pub fn patch_branch_to_here(&mut self, site: Word) {
        let imm = Imm16::from_word((self.pc() - site - 4) / 4);
        let patched = match self.image.instruction(site) {
            Ok(Instruction::Beq { rs, rt, .. }) => Instruction::Beq { rs, rt, imm },
            Ok(Instruction::Bne { rs, rt, .. }) => Instruction::Bne { rs, rt, imm },
            other => unreachable!("branch fixup over non-branch at {site}: {other:?}"),
        };
        self.image.set_word(site, patched.encode() as Word);
    }

    /// The raw word at `addr`, for inspection.
    pub fn word(&self, addr: Word) -> RawInstruction {
        self.image.word(addr) as RawInstruction
    }

    /// Finishes emission and hands over the image.
    pub fn into_image(self) -> Image {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_asm::RegId;

    #[test]
    fn branches_get_delay_slots() {
        let mut e = Emitter::new();
        e.emit(Instruction::Beq {
            rs: RegId::ZR,
            rt: RegId::T0,
            imm: Imm16::from_word(0),
        })
        .unwrap();
        assert_eq!(e.pc(), 8);
        assert_eq!(e.word(4), Instruction::Nop.encode());
    }

    #[test]
    fn moves_from_hi_lo_get_two() {
        let mut e = Emitter::new();
        e.emit(Instruction::Mflo { rd: RegId::T0 }).unwrap();
        assert_eq!(e.pc(), 12);
        assert_eq!(e.word(4), Instruction::Nop.encode());
        assert_eq!(e.word(8), Instruction::Nop.encode());
    }

    #[test]
    fn branch_fixup_counts_words() {
        let mut e = Emitter::new();
        let site = e.pc();
        e.emit(Instruction::Bne {
            rs: RegId::ZR,
            rt: RegId::T0,
            imm: Imm16::from_word(0),
        })
        .unwrap();
        e.emit(Instruction::Nop).unwrap();
        e.emit(Instruction::Nop).unwrap();
        e.patch_branch_to_here(site);

        match e.image.instruction(site).unwrap() {
            Instruction::Bne { imm, .. } => assert_eq!(imm.sign_extend(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn jump_fixup_writes_word_index() {
        let mut e = Emitter::new();
        let site = e.pc();
        e.emit(Instruction::Jal { index: 0 }).unwrap();
        e.patch_jump(site, 64);

        match e.image.instruction(site).unwrap() {
            Instruction::Jal { index } => assert_eq!(index, 16),
            other => panic!("unexpected {other:?}"),
        }
    }
}
