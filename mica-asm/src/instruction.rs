//! Typed instruction representation with encoder and decoder.

use core::fmt;

use mica_types::Word;

use crate::{DecodeError, Function, Opcode, RegId};

/// An instruction as it sits in memory.
pub type RawInstruction = u32;

/// A 16-bit immediate in two's complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Imm16(u16);

impl Imm16 {
    /// Wraps the raw 16-bit field.
    pub const fn new(raw: u16) -> Self {
        Imm16(raw)
    }

    /// Truncates a word to its low 16 bits.
    ///
    /// The emitter only ever passes values in `-2^15 .. 2^15`, which this
    /// truncation represents exactly.
    pub const fn from_word(w: Word) -> Self {
        Imm16(w as u16)
    }

    /// Sign-extends the field back to a word.
    pub const fn sign_extend(self) -> Word {
        let imm = self.0 as Word;
        if imm < 1 << 15 {
            imm
        } else {
            imm - (1 << 16)
        }
    }

    /// The raw field bits.
    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl From<Word> for Imm16 {
    fn from(w: Word) -> Self {
        Imm16::from_word(w)
    }
}

/// One decoded MICA instruction.
///
/// R-format operands appear in the order `rd, rs, rt`, I-format in
/// `rt, rs, imm`, matching the assembler syntax rather than the bit
/// layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// `nop`
    Nop,
    /// `addu rd, rs, rt` — rd := rs + rt, wrapping.
    Addu {
        /// Destination.
        rd: RegId,
        /// Left operand.
        rs: RegId,
        /// Right operand.
        rt: RegId,
    },
    /// `subu rd, rs, rt` — rd := rs - rt, wrapping.
    Subu {
        /// Destination.
        rd: RegId,
        /// Left operand.
        rs: RegId,
        /// Right operand.
        rt: RegId,
    },
    /// `slt rd, rs, rt` — rd := (rs < rt) as word.
    Slt {
        /// Destination.
        rd: RegId,
        /// Left operand.
        rs: RegId,
        /// Right operand.
        rt: RegId,
    },
    /// `multu rs, rt` — lo := rs * rt, truncated to a word.
    Multu {
        /// Left operand.
        rs: RegId,
        /// Right operand.
        rt: RegId,
    },
    /// `divu rs, rt` — lo := rs / rt, hi := rs mod rt.
    Divu {
        /// Dividend.
        rs: RegId,
        /// Divisor.
        rt: RegId,
    },
    /// `mfhi rd` — rd := hi.
    Mfhi {
        /// Destination.
        rd: RegId,
    },
    /// `mflo rd` — rd := lo.
    Mflo {
        /// Destination.
        rd: RegId,
    },
    /// `jr rs` — pc := rs.
    Jr {
        /// Jump target register.
        rs: RegId,
    },
    /// `syscall` — dispatch on `$v0`.
    Syscall,
    /// `teq rs, rt` — raise the signal exception when rs == rt.
    Teq {
        /// Left operand.
        rs: RegId,
        /// Right operand.
        rt: RegId,
    },
    /// `addiu rt, rs, imm` — rt := rs + sign_extend(imm), wrapping.
    Addiu {
        /// Destination.
        rt: RegId,
        /// Source.
        rs: RegId,
        /// Immediate addend.
        imm: Imm16,
    },
    /// `lw rt, imm(rs)` — load the word at rs + sign_extend(imm).
    Lw {
        /// Destination.
        rt: RegId,
        /// Base address register.
        rs: RegId,
        /// Byte offset.
        imm: Imm16,
    },
    /// `sw rt, imm(rs)` — store rt at rs + sign_extend(imm).
    Sw {
        /// Value to store.
        rt: RegId,
        /// Base address register.
        rs: RegId,
        /// Byte offset.
        imm: Imm16,
    },
    /// `beq rs, rt, imm` — branch by imm words when rs == rt.
    Beq {
        /// Left operand.
        rs: RegId,
        /// Right operand.
        rt: RegId,
        /// Word offset relative to the delay slot.
        imm: Imm16,
    },
    /// `bne rs, rt, imm` — branch by imm words when rs != rt.
    Bne {
        /// Left operand.
        rs: RegId,
        /// Right operand.
        rt: RegId,
        /// Word offset relative to the delay slot.
        imm: Imm16,
    },
    /// `j index` — pc := index * 4.
    J {
        /// Absolute word index of the target.
        index: u32,
    },
    /// `jal index` — ra := pc + 8, pc := index * 4.
    Jal {
        /// Absolute word index of the target.
        index: u32,
    },
}

const fn r_format(rs: u8, rt: u8, rd: u8, fct: Function) -> RawInstruction {
    // opcode is SPECIAL = 0
    ((rs as u32) << 21) | ((rt as u32) << 16) | ((rd as u32) << 11) | fct as u32
}

const fn i_format(op: Opcode, rs: u8, rt: u8, imm: Imm16) -> RawInstruction {
    ((op as u32) << 26) | ((rs as u32) << 21) | ((rt as u32) << 16) | imm.bits() as u32
}

const fn j_format(op: Opcode, index: u32) -> RawInstruction {
    ((op as u32) << 26) | (index & 0x03ff_ffff)
}

impl Instruction {
    /// Size of an encoded instruction in bytes.
    pub const SIZE: Word = 4;

    /// Packs the instruction into its raw 32-bit form.
    pub fn encode(&self) -> RawInstruction {
        use Instruction::*;

        match *self {
            Nop => r_format(0, 0, 0, Function::Nop),
            Addu { rd, rs, rt } => {
                r_format(rs.number(), rt.number(), rd.number(), Function::Addu)
            }
            Subu { rd, rs, rt } => {
                r_format(rs.number(), rt.number(), rd.number(), Function::Subu)
            }
            Slt { rd, rs, rt } => {
                r_format(rs.number(), rt.number(), rd.number(), Function::Slt)
            }
            Multu { rs, rt } => r_format(rs.number(), rt.number(), 0, Function::Multu),
            Divu { rs, rt } => r_format(rs.number(), rt.number(), 0, Function::Divu),
            Mfhi { rd } => r_format(0, 0, rd.number(), Function::Mfhi),
            Mflo { rd } => r_format(0, 0, rd.number(), Function::Mflo),
            Jr { rs } => r_format(rs.number(), 0, 0, Function::Jr),
            Syscall => r_format(0, 0, 0, Function::Syscall),
            Teq { rs, rt } => r_format(rs.number(), rt.number(), 0, Function::Teq),
            Addiu { rt, rs, imm } => i_format(Opcode::Addiu, rs.number(), rt.number(), imm),
            Lw { rt, rs, imm } => i_format(Opcode::Lw, rs.number(), rt.number(), imm),
            Sw { rt, rs, imm } => i_format(Opcode::Sw, rs.number(), rt.number(), imm),
            Beq { rs, rt, imm } => i_format(Opcode::Beq, rs.number(), rt.number(), imm),
            Bne { rs, rt, imm } => i_format(Opcode::Bne, rs.number(), rt.number(), imm),
            J { index } => j_format(Opcode::J, index),
            Jal { index } => j_format(Opcode::Jal, index),
        }
    }

    /// Unpacks a raw instruction word.
    pub fn decode(raw: RawInstruction) -> Result<Self, DecodeError> {
        let rs = RegId::new(((raw >> 21) & 0x1f) as u8);
        let rt = RegId::new(((raw >> 16) & 0x1f) as u8);
        let rd = RegId::new(((raw >> 11) & 0x1f) as u8);
        let imm = Imm16::new((raw & 0xffff) as u16);
        let index = raw & 0x03ff_ffff;

        let instr = match Opcode::try_from(raw >> 26)? {
            Opcode::Special => match Function::try_from(raw & 0x3f)? {
                Function::Nop => Instruction::Nop,
                Function::Jr => Instruction::Jr { rs },
                Function::Syscall => Instruction::Syscall,
                Function::Mfhi => Instruction::Mfhi { rd },
                Function::Mflo => Instruction::Mflo { rd },
                Function::Multu => Instruction::Multu { rs, rt },
                Function::Divu => Instruction::Divu { rs, rt },
                Function::Addu => Instruction::Addu { rd, rs, rt },
                Function::Subu => Instruction::Subu { rd, rs, rt },
                Function::Slt => Instruction::Slt { rd, rs, rt },
                Function::Teq => Instruction::Teq { rs, rt },
            },
            Opcode::J => Instruction::J { index },
            Opcode::Jal => Instruction::Jal { index },
            Opcode::Beq => Instruction::Beq { rs, rt, imm },
            Opcode::Bne => Instruction::Bne { rs, rt, imm },
            Opcode::Addiu => Instruction::Addiu { rt, rs, imm },
            Opcode::Lw => Instruction::Lw { rt, rs, imm },
            Opcode::Sw => Instruction::Sw { rt, rs, imm },
        };

        Ok(instr)
    }

    /// The primary opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        use Instruction::*;

        match self {
            Nop | Addu { .. } | Subu { .. } | Slt { .. } | Multu { .. } | Divu { .. }
            | Mfhi { .. } | Mflo { .. } | Jr { .. } | Syscall | Teq { .. } => Opcode::Special,
            Addiu { .. } => Opcode::Addiu,
            Lw { .. } => Opcode::Lw,
            Sw { .. } => Opcode::Sw,
            Beq { .. } => Opcode::Beq,
            Bne { .. } => Opcode::Bne,
            J { .. } => Opcode::J,
            Jal { .. } => Opcode::Jal,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        match *self {
            Nop => write!(f, "nop"),
            Addu { rd, rs, rt } => write!(f, "addu {rd},{rs},{rt}"),
            Subu { rd, rs, rt } => write!(f, "subu {rd},{rs},{rt}"),
            Slt { rd, rs, rt } => write!(f, "slt {rd},{rs},{rt}"),
            Multu { rs, rt } => write!(f, "multu {rs},{rt}"),
            Divu { rs, rt } => write!(f, "divu {rs},{rt}"),
            Mfhi { rd } => write!(f, "mfhi {rd}"),
            Mflo { rd } => write!(f, "mflo {rd}"),
            Jr { rs } => write!(f, "jr {rs}"),
            Syscall => write!(f, "syscall"),
            Teq { rs, rt } => write!(f, "teq {rs},{rt}"),
            Addiu { rt, rs, imm } => write!(f, "addiu {rt},{rs},{}", imm.sign_extend()),
            Lw { rt, rs, imm } => write!(f, "lw {rt},{}({rs})", imm.sign_extend()),
            Sw { rt, rs, imm } => write!(f, "sw {rt},{}({rs})", imm.sign_extend()),
            Beq { rs, rt, imm } => write!(f, "beq {rs},{rt},{}", imm.sign_extend()),
            Bne { rs, rt, imm } => write!(f, "bne {rs},{rt},{}", imm.sign_extend()),
            J { index } => write!(f, "j {}", mica_types::itoa(index as Word * 4, 16, 8)),
            Jal { index } => write!(f, "jal {}", mica_types::itoa(index as Word * 4, 16, 8)),
        }
    }
}
