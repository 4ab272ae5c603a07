use mica_asm::{Image, Instruction};
use mica_cc::{compile, CompileError};

fn instructions(image: &Image) -> Vec<Instruction> {
    image
        .words()
        .iter()
        .map(|w| Instruction::decode(*w as u32).expect("code region decodes"))
        .collect()
}

#[test]
fn image_starts_with_nop_and_main_jump() {
    let image = compile("t.sl", "int main() { return 0; }").unwrap();

    assert_eq!(image.instruction(0).unwrap(), Instruction::Nop);

    match image.instruction(4).unwrap() {
        Instruction::Jal { index } => {
            assert_ne!(index, 0, "main jump must be patched");
            // the target is main's prologue
            assert_eq!(
                image.instruction(index as i32 * 4).unwrap(),
                Instruction::Addiu {
                    rt: mica_asm::RegId::SP,
                    rs: mica_asm::RegId::SP,
                    imm: mica_asm::Imm16::from_word(-4),
                }
            );
        }
        other => panic!("expected jal at address 4, found {other}"),
    }
}

#[test]
fn branches_and_jumps_are_followed_by_delay_nops() {
    // no globals and no strings, so the whole image is code
    let source = "
        int sum(int n) {
            int s;
            s = 0;
            while (0 < n) {
                s = s + n;
                n = n - 1;
            }
            return s;
        }
        int main() {
            if (sum(10) == 55)
                return 0;
            else
                return 1;
        }
    ";
    let image = compile("t.sl", source).unwrap();
    let code = instructions(&image);

    for (i, instr) in code.iter().enumerate() {
        match instr {
            Instruction::Beq { .. }
            | Instruction::Bne { .. }
            | Instruction::J { .. }
            | Instruction::Jal { .. }
            | Instruction::Jr { .. } => {
                assert_eq!(code[i + 1], Instruction::Nop, "delay slot after {instr}");
            }
            Instruction::Mfhi { .. } | Instruction::Mflo { .. } => {
                assert_eq!(code[i + 1], Instruction::Nop, "first nop after {instr}");
                assert_eq!(code[i + 2], Instruction::Nop, "second nop after {instr}");
            }
            _ => {}
        }
    }
}

#[test]
fn forward_references_are_all_resolved() {
    // f is called twice before its definition and once after
    let source = "
        int main() {
            int a;
            a = f(1) + f(2);
            return a + f(3);
        }
        int f(int x) { return x * 2; }
    ";
    let image = compile("t.sl", source).unwrap();

    for instr in instructions(&image) {
        match instr {
            Instruction::Jal { index } | Instruction::J { index } => {
                assert_ne!(index, 0, "unresolved fixup site: {instr}");
            }
            _ => {}
        }
    }
}

#[test]
fn globals_sit_at_the_end_in_reverse_declaration_order() {
    let source = "
        int x = 7;
        int y = -1;
        int main() { return x + y; }
    ";
    let image = compile("t.sl", source).unwrap();
    let words = image.words();

    // the most recent declaration carries the most negative $gp offset
    assert_eq!(words[words.len() - 1], 7);
    assert_eq!(words[words.len() - 2], -1);
}

#[test]
fn string_constants_are_packed_and_padded() {
    let source = "
        int main() {
            int* s;
            s = \"ok\";
            return 0;
        }
    ";
    let image = compile("t.sl", source).unwrap();
    let words = image.words();

    // 'o' | 'k' << 8, null terminated within one word
    assert_eq!(words[words.len() - 1], 0x6b6f);
}

#[rstest::rstest]
#[case("int x = -2147483648; int main() { return 0; }", true)]
#[case("int x = 2147483648; int main() { return 0; }", false)]
#[case("int main() { return -2147483648; }", true)]
#[case("int main() { return 2147483647; }", true)]
#[case("int main() { return (2147483648); }", false)]
fn int_min_literal_is_only_legal_after_unary_minus(#[case] source: &str, #[case] ok: bool) {
    assert_eq!(compile("t.sl", source).is_ok(), ok);
}

#[test]
fn type_mismatches_warn_but_compile() {
    let source = "
        int* p;
        int main() {
            p = 7;
            return p;
        }
    ";
    assert!(compile("t.sl", source).is_ok());
}

#[test]
fn missing_main_is_an_error() {
    match compile("t.sl", "int f() { return 1; }") {
        Err(CompileError::MissingMain) => {}
        other => panic!("expected missing main, got {other:?}"),
    }
}

#[test]
fn undeclared_variables_are_errors() {
    match compile("t.sl", "int main() { x = 1; return 0; }") {
        Err(CompileError::Undeclared { name, .. }) => assert_eq!(name, "x"),
        other => panic!("expected undeclared error, got {other:?}"),
    }
}

#[test]
fn redefinition_is_an_error() {
    let source = "
        int f() { return 1; }
        int f() { return 2; }
        int main() { return f(); }
    ";
    assert!(matches!(
        compile("t.sl", source),
        Err(CompileError::Redefined { .. })
    ));
}

#[test]
fn procedures_can_be_declared_then_defined() {
    let source = "
        int f(int x);
        int main() { return f(4); }
        int f(int x) { return x + 1; }
    ";
    assert!(compile("t.sl", source).is_ok());
}
