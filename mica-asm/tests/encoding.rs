use mica_asm::{Imm16, Instruction, RegId};
use quickcheck_macros::quickcheck;

fn regs() -> impl Iterator<Item = RegId> {
    (0u8..32).map(RegId::new)
}

#[test]
fn every_instruction_roundtrips() {
    // values picked to exercise field boundaries
    let r = RegId::new(0x1d);
    let imm = Imm16::new(0x8ffd);
    let index = 0x02ff_fffd;

    let instructions = vec![
        Instruction::Nop,
        Instruction::Addu { rd: r, rs: r, rt: r },
        Instruction::Subu { rd: r, rs: r, rt: r },
        Instruction::Slt { rd: r, rs: r, rt: r },
        Instruction::Multu { rs: r, rt: r },
        Instruction::Divu { rs: r, rt: r },
        Instruction::Mfhi { rd: r },
        Instruction::Mflo { rd: r },
        Instruction::Jr { rs: r },
        Instruction::Syscall,
        Instruction::Teq { rs: r, rt: r },
        Instruction::Addiu { rt: r, rs: r, imm },
        Instruction::Lw { rt: r, rs: r, imm },
        Instruction::Sw { rt: r, rs: r, imm },
        Instruction::Beq { rs: r, rt: r, imm },
        Instruction::Bne { rs: r, rt: r, imm },
        Instruction::J { index },
        Instruction::Jal { index },
    ];

    for instr in instructions {
        let raw = instr.encode();
        assert_eq!(Instruction::decode(raw), Ok(instr), "{instr}");
    }
}

#[test]
fn all_register_operands_roundtrip() {
    for rs in regs() {
        for rt in regs() {
            let instr = Instruction::Teq { rs, rt };
            assert_eq!(Instruction::decode(instr.encode()), Ok(instr));
        }
    }
}

#[quickcheck]
fn immediates_survive_sign_extension(raw: u16) -> bool {
    let instr = Instruction::Addiu {
        rt: RegId::T0,
        rs: RegId::ZR,
        imm: Imm16::new(raw),
    };
    let decoded = Instruction::decode(instr.encode()).unwrap();
    match decoded {
        Instruction::Addiu { imm, .. } => {
            imm.bits() == raw && Imm16::from_word(imm.sign_extend()).bits() == raw
        }
        _ => false,
    }
}

#[quickcheck]
fn jump_indices_mask_to_26_bits(index: u32) -> bool {
    let instr = Instruction::J { index: index & 0x03ff_ffff };
    Instruction::decode(instr.encode()) == Ok(instr)
}

#[rstest::rstest]
#[case::unknown_opcode(0xfc00_0000)]
#[case::unknown_function(0x0000_0001)]
#[case::lui_is_not_part_of_the_set(0x3c00_0000)]
fn unknown_words_are_rejected(#[case] raw: u32) {
    assert!(Instruction::decode(raw).is_err());
}
