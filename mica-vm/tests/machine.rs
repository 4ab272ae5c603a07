//! Interpreter semantics on hand-assembled images.

use mica_asm::{Image, Imm16, Instruction, RegId};
use mica_types::Word;
use mica_vm::{Exception, Machine, MachineConfig, StepState, VmError};

fn assemble(instructions: &[Instruction]) -> Image {
    Image::from(
        instructions
            .iter()
            .map(|i| i.encode() as Word)
            .collect::<Vec<_>>(),
    )
}

fn boot(instructions: &[Instruction]) -> Machine {
    let config = MachineConfig {
        memory_mb: 32,
        ..MachineConfig::default()
    };
    Machine::boot(&assemble(instructions), config, &[]).unwrap()
}

#[test]
fn jal_links_past_the_delay_slot() {
    let mut m = boot(&[
        Instruction::Jal { index: 3 },
        Instruction::Nop,
        Instruction::Nop,
        Instruction::Jr { rs: RegId::RA },
    ]);

    assert_eq!(m.step().unwrap(), StepState::Continue);
    assert_eq!(m.cpu().pc, 12);
    assert_eq!(m.cpu().regs[RegId::RA.index()], 8);

    assert_eq!(m.step().unwrap(), StepState::Continue);
    assert_eq!(m.cpu().pc, 8);
}

#[test]
fn branches_scale_the_offset_by_the_word_size() {
    let mut m = boot(&[
        Instruction::Beq {
            rs: RegId::ZR,
            rt: RegId::ZR,
            imm: Imm16::from_word(2),
        },
        Instruction::Nop,
        Instruction::Nop,
        Instruction::Nop,
    ]);

    m.step().unwrap();
    // pc advances over the branch, then by two more words
    assert_eq!(m.cpu().pc, 12);
}

#[test]
fn untaken_branches_fall_through() {
    let mut m = boot(&[
        Instruction::Addiu {
            rt: RegId::T0,
            rs: RegId::ZR,
            imm: Imm16::from_word(1),
        },
        Instruction::Bne {
            rs: RegId::T0,
            rt: RegId::T0,
            imm: Imm16::from_word(5),
        },
        Instruction::Nop,
    ]);

    m.step().unwrap();
    m.step().unwrap();
    assert_eq!(m.cpu().pc, 8);
}

#[test]
fn teq_traps_on_equal_operands() {
    let mut m = boot(&[Instruction::Teq {
        rs: RegId::T0,
        rt: RegId::T0,
    }]);

    match m.step() {
        Err(VmError::Exception(Exception::Signal)) => {}
        other => panic!("expected signal, got {other:?}"),
    }
}

#[test]
fn undecodable_words_are_unknown_instructions() {
    let image = Image::from(vec![0xfc00_0000u32 as Word]);
    let config = MachineConfig {
        memory_mb: 32,
        ..MachineConfig::default()
    };
    let mut m = Machine::boot(&image, config, &[]).unwrap();

    match m.step() {
        Err(VmError::Exception(Exception::UnknownInstruction)) => {}
        other => panic!("expected unknown instruction, got {other:?}"),
    }
}

#[test]
fn unknown_syscall_numbers_fault() {
    let mut m = boot(&[
        Instruction::Addiu {
            rt: RegId::V0,
            rs: RegId::ZR,
            imm: Imm16::from_word(999),
        },
        Instruction::Syscall,
    ]);

    m.step().unwrap();
    match m.step() {
        Err(VmError::Exception(Exception::UnknownSyscall)) => {}
        other => panic!("expected unknown syscall, got {other:?}"),
    }
}

#[test]
fn multiplication_and_division_fill_hi_and_lo() {
    let mut m = boot(&[
        Instruction::Addiu {
            rt: RegId::T0,
            rs: RegId::ZR,
            imm: Imm16::from_word(17),
        },
        Instruction::Addiu {
            rt: RegId::T1,
            rs: RegId::ZR,
            imm: Imm16::from_word(5),
        },
        Instruction::Multu {
            rs: RegId::T0,
            rt: RegId::T1,
        },
        Instruction::Divu {
            rs: RegId::T0,
            rt: RegId::T1,
        },
    ]);

    for _ in 0..3 {
        m.step().unwrap();
    }
    assert_eq!(m.cpu().lo, 85);

    m.step().unwrap();
    assert_eq!(m.cpu().lo, 3);
    assert_eq!(m.cpu().hi, 2);
}

#[test]
fn sw_then_lw_roundtrips_through_paged_memory() {
    // store far into the segment, forcing a fresh page, then load back
    let mut m = boot(&[
        Instruction::Addiu {
            rt: RegId::T0,
            rs: RegId::ZR,
            imm: Imm16::from_word(0x4000),
        },
        Instruction::Addiu {
            rt: RegId::T1,
            rs: RegId::ZR,
            imm: Imm16::from_word(-7),
        },
        Instruction::Sw {
            rt: RegId::T1,
            rs: RegId::T0,
            imm: Imm16::from_word(8),
        },
        Instruction::Lw {
            rt: RegId::T2,
            rs: RegId::T0,
            imm: Imm16::from_word(8),
        },
    ]);

    for _ in 0..4 {
        m.step().unwrap();
    }
    assert_eq!(m.cpu().regs[RegId::T2.index()], -7);
}
