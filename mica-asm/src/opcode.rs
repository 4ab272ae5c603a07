//! Opcode and function numbers.

use core::fmt;

/// Failure to map a raw word onto the instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The opcode field names no known instruction.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    /// A SPECIAL instruction with an unknown function field.
    #[error("unknown function {0}")]
    UnknownFunction(u32),
}

/// Primary opcode field, bits 31..26.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum Opcode {
    /// R-format instructions; the function field selects the operation.
    Special = 0,
    /// Unconditional jump.
    J = 2,
    /// Jump and link.
    Jal = 3,
    /// Branch on equal.
    Beq = 4,
    /// Branch on not equal.
    Bne = 5,
    /// Add immediate (no overflow trap).
    Addiu = 9,
    /// Load word.
    Lw = 35,
    /// Store word.
    Sw = 43,
}

impl TryFrom<u32> for Opcode {
    type Error = DecodeError;

    fn try_from(op: u32) -> Result<Self, DecodeError> {
        match op {
            0 => Ok(Opcode::Special),
            2 => Ok(Opcode::J),
            3 => Ok(Opcode::Jal),
            4 => Ok(Opcode::Beq),
            5 => Ok(Opcode::Bne),
            9 => Ok(Opcode::Addiu),
            35 => Ok(Opcode::Lw),
            43 => Ok(Opcode::Sw),
            _ => Err(DecodeError::UnknownOpcode(op)),
        }
    }
}

/// Function field of SPECIAL instructions, bits 5..0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum Function {
    /// No operation.
    Nop = 0,
    /// Jump register.
    Jr = 8,
    /// System call; the number is taken from `$v0`.
    Syscall = 12,
    /// Move from hi.
    Mfhi = 16,
    /// Move from lo.
    Mflo = 18,
    /// Multiply into lo.
    Multu = 25,
    /// Divide into lo, remainder into hi.
    Divu = 27,
    /// Add.
    Addu = 33,
    /// Subtract.
    Subu = 35,
    /// Set on less than.
    Slt = 42,
    /// Trap on equal.
    Teq = 52,
}

impl TryFrom<u32> for Function {
    type Error = DecodeError;

    fn try_from(fct: u32) -> Result<Self, DecodeError> {
        match fct {
            0 => Ok(Function::Nop),
            8 => Ok(Function::Jr),
            12 => Ok(Function::Syscall),
            16 => Ok(Function::Mfhi),
            18 => Ok(Function::Mflo),
            25 => Ok(Function::Multu),
            27 => Ok(Function::Divu),
            33 => Ok(Function::Addu),
            35 => Ok(Function::Subu),
            42 => Ok(Function::Slt),
            52 => Ok(Function::Teq),
            _ => Err(DecodeError::UnknownFunction(fct)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::Special => "special",
            Opcode::J => "j",
            Opcode::Jal => "jal",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Addiu => "addiu",
            Opcode::Lw => "lw",
            Opcode::Sw => "sw",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Function::Nop => "nop",
            Function::Jr => "jr",
            Function::Syscall => "syscall",
            Function::Mfhi => "mfhi",
            Function::Mflo => "mflo",
            Function::Multu => "multu",
            Function::Divu => "divu",
            Function::Addu => "addu",
            Function::Subu => "subu",
            Function::Slt => "slt",
            Function::Teq => "teq",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn opcode_numbers_roundtrip() {
        for op in Opcode::iter() {
            assert_eq!(Opcode::try_from(op as u32), Ok(op));
        }
        assert_eq!(Opcode::try_from(63), Err(DecodeError::UnknownOpcode(63)));
    }

    #[test]
    fn function_numbers_roundtrip() {
        for fct in Function::iter() {
            assert_eq!(Function::try_from(fct as u32), Ok(fct));
        }
        assert_eq!(Function::try_from(1), Err(DecodeError::UnknownFunction(1)));
    }
}
