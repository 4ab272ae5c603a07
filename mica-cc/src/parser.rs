//! The recursive-descent parser and its direct code emitter.
//!
//! One token of lookahead, no backtracking, no AST: every grammar rule
//! emits its code the moment it is recognized. Expression results live
//! in a stack of temporary registers (`$t0..$t9`, `$s0..$s7`, indexed by
//! a monotone counter); statements always start and end with zero
//! temporaries allocated.

use mica_asm::{Imm16, Instruction, RegId};
use mica_types::{left_shift, right_shift, two_to_power, Word};
use tracing::warn;

use crate::emitter::Emitter;
use crate::symtab::{Global, ProcAddress, SymbolTable, Ty};
use crate::{CompileError, Scanner, Token};

/// Expression depth the register file can hold.
const MAX_TEMPORARIES: Word = 18;

/// Compiles one source text into an image; see [`crate::compile`].
pub struct Parser<'a> {
    scanner: Scanner<'a>,
    token: Token,
    emitter: Emitter,
    symbols: SymbolTable,
    /// Depth of the expression stack; temporary `i` is register `$a3 + i`.
    temporaries: Word,
    /// Bytes of global data allocated so far; offsets are its negation.
    allocated_data: Word,
    /// `j 0` placeholders emitted by `return`, patched at the epilogue.
    return_sites: Vec<Word>,
    current_procedure: String,
}

impl<'a> Parser<'a> {
    /// Prepares to compile `source`.
    pub fn new(source: &'a str) -> Self {
        Parser {
            scanner: Scanner::new(source),
            token: Token::Eof,
            emitter: Emitter::new(),
            symbols: SymbolTable::new(),
            temporaries: 0,
            allocated_data: 0,
            return_sites: Vec::new(),
            current_procedure: String::new(),
        }
    }

    /// Runs the single pass and returns the finished image.
    pub fn parse(mut self) -> Result<mica_asm::Image, CompileError> {
        self.emit_runtime()?;

        self.advance()?;
        self.program()?;
        self.emit_globals()?;

        match self.symbols.procedure("main").map(|p| &p.address) {
            Some(ProcAddress::Defined(_)) => Ok(self.emitter.into_image()),
            _ => Err(CompileError::MissingMain),
        }
    }

    // ------------------------------------------------------------------
    // token plumbing

    fn advance(&mut self) -> Result<(), CompileError> {
        self.token = self.scanner.next_token()?;
        Ok(())
    }

    fn line(&self) -> u32 {
        self.scanner.line()
    }

    fn eat(&mut self, expected: Token, name: &'static str) -> Result<(), CompileError> {
        if self.token == expected {
            self.advance()
        } else {
            Err(CompileError::Expected {
                line: self.line(),
                expected: name,
                found: self.token.clone(),
            })
        }
    }

    fn identifier(&mut self) -> Result<String, CompileError> {
        if let Token::Identifier(name) = self.token.clone() {
            self.advance()?;
            Ok(name)
        } else {
            Err(CompileError::Expected {
                line: self.line(),
                expected: "identifier",
                found: self.token.clone(),
            })
        }
    }

    fn unexpected(&self) -> CompileError {
        CompileError::Unexpected {
            line: self.line(),
            found: self.token.clone(),
        }
    }

    fn type_warning(&self, expected: Ty, found: Ty) {
        warn!(
            line = self.line(),
            "type mismatch, {expected} expected but {found} found"
        );
    }

    // ------------------------------------------------------------------
    // temporaries

    fn talloc(&mut self) -> Result<RegId, CompileError> {
        if self.temporaries < MAX_TEMPORARIES {
            self.temporaries += 1;
            Ok(self.current_temporary())
        } else {
            Err(CompileError::OutOfRegisters { line: self.line() })
        }
    }

    fn current_temporary(&self) -> RegId {
        debug_assert!(self.temporaries > 0, "no temporary allocated");
        RegId::new(RegId::A3.number() + self.temporaries as u8)
    }

    fn previous_temporary(&self) -> RegId {
        debug_assert!(self.temporaries > 1, "no previous temporary");
        RegId::new(RegId::A3.number() + self.temporaries as u8 - 1)
    }

    fn next_temporary(&mut self) -> Result<RegId, CompileError> {
        if self.temporaries < MAX_TEMPORARIES {
            Ok(RegId::new(RegId::A3.number() + self.temporaries as u8 + 1))
        } else {
            Err(CompileError::OutOfRegisters { line: self.line() })
        }
    }

    fn tfree(&mut self, n: Word) {
        debug_assert!(self.temporaries >= n, "temporary stack underflow");
        self.temporaries -= n;
    }

    fn save_temporaries(&mut self) -> Result<(), CompileError> {
        while self.temporaries > 0 {
            let cur = self.current_temporary();
            self.emit(Instruction::Addiu {
                rt: RegId::SP,
                rs: RegId::SP,
                imm: Imm16::from_word(-4),
            })?;
            self.emit(Instruction::Sw {
                rt: cur,
                rs: RegId::SP,
                imm: Imm16::from_word(0),
            })?;
            self.tfree(1);
        }
        Ok(())
    }

    fn restore_temporaries(&mut self, n: Word) -> Result<(), CompileError> {
        while self.temporaries < n {
            self.temporaries += 1;
            let cur = self.current_temporary();
            self.emit(Instruction::Lw {
                rt: cur,
                rs: RegId::SP,
                imm: Imm16::from_word(0),
            })?;
            self.emit(Instruction::Addiu {
                rt: RegId::SP,
                rs: RegId::SP,
                imm: Imm16::from_word(4),
            })?;
        }
        Ok(())
    }

    pub(crate) fn emit(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.emitter.emit(instr)
    }

    pub(crate) fn emitter(&mut self) -> &mut Emitter {
        &mut self.emitter
    }

    pub(crate) fn symbols(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    // ------------------------------------------------------------------
    // value loading

    fn load_variable(&mut self, name: &str) -> Result<Ty, CompileError> {
        let (ty, offset, base) = match self.symbols.variable(name) {
            Some(v) => (v.ty, v.offset, v.base),
            None => {
                return Err(CompileError::Undeclared {
                    line: self.line(),
                    name: name.to_string(),
                })
            }
        };

        let t = self.talloc()?;
        self.emit(Instruction::Lw {
            rt: t,
            rs: base,
            imm: Imm16::from_word(offset),
        })?;
        Ok(ty)
    }

    /// Multiplies the current temporary by 2^b through `multu`/`mflo`.
    fn emit_left_shift_by(&mut self, b: Word) -> Result<(), CompileError> {
        let cur = self.current_temporary();
        let next = self.next_temporary()?;

        // the factor is below 2^15, so no sign extension interferes
        self.emit(Instruction::Addiu {
            rt: next,
            rs: RegId::ZR,
            imm: Imm16::from_word(two_to_power(b)),
        })?;
        self.emit(Instruction::Multu { rs: cur, rt: next })?;
        self.emit(Instruction::Mflo { rd: cur })
    }

    /// Loads an integer constant into a fresh temporary.
    ///
    /// `addiu` sign-extends its immediate, so only magnitudes below 2^15
    /// load in one instruction; larger constants are accumulated in
    /// 14-bit pieces, and `INT_MIN` is synthesized as `2^14 << 14 << 3`.
    fn load_integer(&mut self, constant: Word) -> Result<(), CompileError> {
        // constant >= 0 or constant == INT_MIN, enforced by the scanner
        let t = self.talloc()?;

        if constant >= 0 {
            if constant < two_to_power(15) {
                self.emit(Instruction::Addiu {
                    rt: t,
                    rs: RegId::ZR,
                    imm: Imm16::from_word(constant),
                })?;
            } else if constant < two_to_power(28) {
                self.emit(Instruction::Addiu {
                    rt: t,
                    rs: RegId::ZR,
                    imm: Imm16::from_word(right_shift(constant, 14)),
                })?;
                self.emit_left_shift_by(14)?;
                self.emit(Instruction::Addiu {
                    rt: t,
                    rs: t,
                    imm: Imm16::from_word(right_shift(left_shift(constant, 18), 18)),
                })?;
            } else {
                self.emit(Instruction::Addiu {
                    rt: t,
                    rs: RegId::ZR,
                    imm: Imm16::from_word(right_shift(constant, 17)),
                })?;
                self.emit_left_shift_by(14)?;
                self.emit(Instruction::Addiu {
                    rt: t,
                    rs: t,
                    imm: Imm16::from_word(right_shift(left_shift(constant, 15), 18)),
                })?;
                self.emit_left_shift_by(3)?;
                self.emit(Instruction::Addiu {
                    rt: t,
                    rs: t,
                    imm: Imm16::from_word(right_shift(left_shift(constant, 29), 29)),
                })?;
            }
        } else {
            self.emit(Instruction::Addiu {
                rt: t,
                rs: RegId::ZR,
                imm: Imm16::from_word(two_to_power(14)),
            })?;
            self.emit_left_shift_by(14)?;
            self.emit_left_shift_by(3)?;
        }

        Ok(())
    }

    fn load_string(&mut self, text: &str) -> Result<(), CompileError> {
        let l = text.len() as Word + 1;

        self.allocated_data += l;
        if l % 4 != 0 {
            self.allocated_data += 4 - l % 4;
        }

        let offset = -self.allocated_data;
        self.symbols.intern_string(text.to_string(), offset);

        let t = self.talloc()?;
        self.emit(Instruction::Addiu {
            rt: t,
            rs: RegId::GP,
            imm: Imm16::from_word(offset),
        })
    }

    // ------------------------------------------------------------------
    // calls

    /// Parses and emits a call; the opening parenthesis is consumed.
    /// The result is left in `$v0`.
    fn call(&mut self, name: &str) -> Result<Ty, CompileError> {
        let live = self.temporaries;
        self.save_temporaries()?;

        if self.token.starts_expression() {
            self.push_argument()?;
            while self.token == Token::Comma {
                self.advance()?;
                self.push_argument()?;
            }
        }
        self.eat(Token::RParen, ")")?;

        let ty = self.call_codegen(name)?;
        self.restore_temporaries(live)?;
        Ok(ty)
    }

    fn push_argument(&mut self) -> Result<(), CompileError> {
        self.expression()?;
        let cur = self.current_temporary();
        self.emit(Instruction::Addiu {
            rt: RegId::SP,
            rs: RegId::SP,
            imm: Imm16::from_word(-4),
        })?;
        self.emit(Instruction::Sw {
            rt: cur,
            rs: RegId::SP,
            imm: Imm16::from_word(0),
        })?;
        self.tfree(1);
        Ok(())
    }

    fn call_codegen(&mut self, name: &str) -> Result<Ty, CompileError> {
        let site = self.emitter.pc();

        let known = match self.symbols.procedure_mut(name) {
            Some(proc) => match &mut proc.address {
                ProcAddress::Forward { sites } => {
                    sites.push(site);
                    Some((proc.ty, None))
                }
                ProcAddress::Defined(addr) => Some((proc.ty, Some(*addr))),
            },
            None => None,
        };

        let (ty, target) = match known {
            Some(pair) => pair,
            None => {
                // no definition, no declaration: assume int and fix up later
                self.symbols.declare_procedure(
                    name.to_string(),
                    Ty::Int,
                    ProcAddress::Forward { sites: vec![site] },
                );
                (Ty::Int, None)
            }
        };

        match target {
            None => self.emit(Instruction::Jal { index: 0 })?,
            Some(addr) => self.emit(Instruction::Jal {
                index: (addr / 4) as u32,
            })?,
        }

        Ok(ty)
    }

    // ------------------------------------------------------------------
    // expressions

    fn factor(&mut self) -> Result<Ty, CompileError> {
        let mut cast = None;

        if self.token == Token::LParen {
            self.advance()?;
            if self.token == Token::Int {
                // cast: "(" "int" [ "*" ] ")"
                cast = Some(self.parse_type()?);
                self.eat(Token::RParen, ")")?;
            } else {
                // grouping: "(" expression ")"
                let ty = self.expression()?;
                self.eat(Token::RParen, ")")?;
                return Ok(ty);
            }
        }

        let ty = if self.token == Token::Star {
            self.advance()?;

            let inner = if matches!(self.token, Token::Identifier(_)) {
                let name = self.identifier()?;
                self.load_variable(&name)?
            } else if self.token == Token::LParen {
                self.advance()?;
                let ty = self.expression()?;
                self.eat(Token::RParen, ")")?;
                ty
            } else {
                return Err(self.unexpected());
            };

            if inner != Ty::IntPtr {
                self.type_warning(Ty::IntPtr, inner);
            }

            let cur = self.current_temporary();
            self.emit(Instruction::Lw {
                rt: cur,
                rs: cur,
                imm: Imm16::from_word(0),
            })?;
            Ty::Int
        } else if matches!(self.token, Token::Identifier(_)) {
            let name = self.identifier()?;

            if self.token == Token::LParen {
                self.advance()?;
                let ty = self.call(&name)?;
                let t = self.talloc()?;
                self.emit(Instruction::Addiu {
                    rt: t,
                    rs: RegId::V0,
                    imm: Imm16::from_word(0),
                })?;
                ty
            } else {
                self.load_variable(&name)?
            }
        } else if let Token::Integer(n) = self.token {
            self.advance()?;
            self.load_integer(n)?;
            Ty::Int
        } else if let Token::Character(c) = self.token {
            self.advance()?;
            let t = self.talloc()?;
            self.emit(Instruction::Addiu {
                rt: t,
                rs: RegId::ZR,
                imm: Imm16::from_word(c),
            })?;
            Ty::Int
        } else if let Token::Str(text) = self.token.clone() {
            self.advance()?;
            self.load_string(&text)?;
            Ty::IntPtr
        } else if self.token == Token::LParen {
            self.advance()?;
            let ty = self.expression()?;
            self.eat(Token::RParen, ")")?;
            ty
        } else {
            return Err(self.unexpected());
        };

        Ok(cast.unwrap_or(ty))
    }

    fn term(&mut self) -> Result<Ty, CompileError> {
        let ltype = self.factor()?;

        while matches!(self.token, Token::Star | Token::Div | Token::Mod) {
            let op = self.token.clone();
            self.advance()?;

            let rtype = self.factor()?;
            if ltype != rtype {
                self.type_warning(ltype, rtype);
            }

            let prev = self.previous_temporary();
            let cur = self.current_temporary();

            match op {
                Token::Star => {
                    self.emit(Instruction::Multu { rs: prev, rt: cur })?;
                    self.emit(Instruction::Mflo { rd: prev })?;
                }
                Token::Div => {
                    self.emit(Instruction::Divu { rs: prev, rt: cur })?;
                    self.emit(Instruction::Mflo { rd: prev })?;
                }
                _ => {
                    self.emit(Instruction::Divu { rs: prev, rt: cur })?;
                    self.emit(Instruction::Mfhi { rd: prev })?;
                }
            }

            self.tfree(1);
        }

        Ok(ltype)
    }

    fn simple_expression(&mut self) -> Result<Ty, CompileError> {
        let mut sign = false;

        if self.token == Token::Minus {
            sign = true;
            self.scanner.allow_int_min(true);
            self.advance()?;
            self.scanner.allow_int_min(false);

            // INT_MIN cannot be negated; the literal already is the value
            if matches!(self.token, Token::Integer(n) if n == Word::MIN) {
                sign = false;
            }
        }

        let mut ltype = self.term()?;

        if sign {
            if ltype != Ty::Int {
                self.type_warning(Ty::Int, ltype);
                ltype = Ty::Int;
            }
            let cur = self.current_temporary();
            self.emit(Instruction::Subu {
                rd: cur,
                rs: RegId::ZR,
                rt: cur,
            })?;
        }

        while matches!(self.token, Token::Plus | Token::Minus) {
            let op = self.token.clone();
            self.advance()?;

            let rtype = self.term()?;

            if op == Token::Plus {
                if ltype == Ty::IntPtr {
                    if rtype == Ty::Int {
                        // pointer arithmetic scales the integer by the word size
                        self.emit_left_shift_by(2)?;
                    }
                } else if rtype == Ty::IntPtr {
                    self.type_warning(ltype, rtype);
                }

                let prev = self.previous_temporary();
                let cur = self.current_temporary();
                self.emit(Instruction::Addu {
                    rd: prev,
                    rs: prev,
                    rt: cur,
                })?;
            } else {
                if ltype != rtype {
                    self.type_warning(ltype, rtype);
                }

                let prev = self.previous_temporary();
                let cur = self.current_temporary();
                self.emit(Instruction::Subu {
                    rd: prev,
                    rs: prev,
                    rt: cur,
                })?;
            }

            self.tfree(1);
        }

        Ok(ltype)
    }

    fn expression(&mut self) -> Result<Ty, CompileError> {
        let ltype = self.simple_expression()?;

        if matches!(
            self.token,
            Token::Eq | Token::NotEq | Token::Lt | Token::Gt | Token::Leq | Token::Geq
        ) {
            let op = self.token.clone();
            self.advance()?;

            let rtype = self.simple_expression()?;
            if ltype != rtype {
                self.type_warning(ltype, rtype);
            }

            let prev = self.previous_temporary();
            let cur = self.current_temporary();

            match op {
                Token::Eq => {
                    // subtract; zero means equal
                    self.emit(Instruction::Subu {
                        rd: prev,
                        rs: prev,
                        rt: cur,
                    })?;
                    self.tfree(1);
                    self.boolean_from_branch(Instruction::Beq {
                        rs: RegId::ZR,
                        rt: self.current_temporary(),
                        imm: Imm16::from_word(4),
                    })?;
                }
                Token::NotEq => {
                    self.emit(Instruction::Subu {
                        rd: prev,
                        rs: prev,
                        rt: cur,
                    })?;
                    self.tfree(1);
                    self.boolean_from_branch(Instruction::Bne {
                        rs: RegId::ZR,
                        rt: self.current_temporary(),
                        imm: Imm16::from_word(4),
                    })?;
                }
                Token::Lt => {
                    self.emit(Instruction::Slt {
                        rd: prev,
                        rs: prev,
                        rt: cur,
                    })?;
                    self.tfree(1);
                }
                Token::Gt => {
                    self.emit(Instruction::Slt {
                        rd: prev,
                        rs: cur,
                        rt: prev,
                    })?;
                    self.tfree(1);
                }
                Token::Leq => {
                    // b < a inverted
                    self.emit(Instruction::Slt {
                        rd: prev,
                        rs: cur,
                        rt: prev,
                    })?;
                    self.tfree(1);
                    self.invert_boolean()?;
                }
                Token::Geq => {
                    // a < b inverted
                    self.emit(Instruction::Slt {
                        rd: prev,
                        rs: prev,
                        rt: cur,
                    })?;
                    self.tfree(1);
                    self.invert_boolean()?;
                }
                _ => unreachable!("comparison operator"),
            }
        }

        Ok(ltype)
    }

    /// Emits the branchy materialization of a comparison result: take
    /// the branch to load 1, fall through to load 0. The offsets count
    /// the delay-slot `nop`s.
    fn boolean_from_branch(&mut self, branch: Instruction) -> Result<(), CompileError> {
        let cur = self.current_temporary();
        self.emit(branch)?;
        self.emit(Instruction::Addiu {
            rt: cur,
            rs: RegId::ZR,
            imm: Imm16::from_word(0),
        })?;
        self.emit(Instruction::Beq {
            rs: RegId::ZR,
            rt: RegId::ZR,
            imm: Imm16::from_word(2),
        })?;
        self.emit(Instruction::Addiu {
            rt: cur,
            rs: RegId::ZR,
            imm: Imm16::from_word(1),
        })
    }

    /// Turns an `slt` result into its logical negation.
    fn invert_boolean(&mut self) -> Result<(), CompileError> {
        let cur = self.current_temporary();
        self.emit(Instruction::Bne {
            rs: RegId::ZR,
            rt: cur,
            imm: Imm16::from_word(4),
        })?;
        self.emit(Instruction::Addiu {
            rt: cur,
            rs: RegId::ZR,
            imm: Imm16::from_word(1),
        })?;
        self.emit(Instruction::Beq {
            rs: RegId::ZR,
            rt: RegId::ZR,
            imm: Imm16::from_word(2),
        })?;
        self.emit(Instruction::Addiu {
            rt: cur,
            rs: RegId::ZR,
            imm: Imm16::from_word(0),
        })
    }

    // ------------------------------------------------------------------
    // statements

    fn statement(&mut self) -> Result<(), CompileError> {
        match self.token.clone() {
            Token::Star => {
                self.advance()?;

                let ltype = if matches!(self.token, Token::Identifier(_)) {
                    let name = self.identifier()?;
                    self.load_variable(&name)?
                } else if self.token == Token::LParen {
                    self.advance()?;
                    let ty = self.expression()?;
                    self.eat(Token::RParen, ")")?;
                    ty
                } else {
                    return Err(self.unexpected());
                };

                if ltype != Ty::IntPtr {
                    self.type_warning(Ty::IntPtr, ltype);
                }

                self.eat(Token::Assign, "=")?;
                let rtype = self.expression()?;
                if rtype != Ty::Int {
                    self.type_warning(Ty::Int, rtype);
                }

                let prev = self.previous_temporary();
                let cur = self.current_temporary();
                self.emit(Instruction::Sw {
                    rt: cur,
                    rs: prev,
                    imm: Imm16::from_word(0),
                })?;
                self.tfree(2);

                self.eat(Token::Semicolon, ";")
            }
            Token::Identifier(name) => {
                self.advance()?;

                if self.token == Token::LParen {
                    self.advance()?;
                    self.call(&name)?;
                    self.eat(Token::Semicolon, ";")
                } else if self.token == Token::Assign {
                    let (ltype, offset, base) = match self.symbols.variable(&name) {
                        Some(v) => (v.ty, v.offset, v.base),
                        None => {
                            return Err(CompileError::Undeclared {
                                line: self.line(),
                                name,
                            })
                        }
                    };

                    self.advance()?;
                    let rtype = self.expression()?;
                    if ltype != rtype {
                        self.type_warning(ltype, rtype);
                    }

                    let cur = self.current_temporary();
                    self.emit(Instruction::Sw {
                        rt: cur,
                        rs: base,
                        imm: Imm16::from_word(offset),
                    })?;
                    self.tfree(1);

                    self.eat(Token::Semicolon, ";")
                } else {
                    Err(self.unexpected())
                }
            }
            Token::While => self.while_statement(),
            Token::If => self.if_statement(),
            Token::Return => {
                let return_ty = match self.symbols.procedure(&self.current_procedure) {
                    Some(p) => p.ty,
                    None => Ty::Int,
                };
                self.return_statement(return_ty)?;
                self.eat(Token::Semicolon, ";")
            }
            _ => Err(self.unexpected()),
        }
    }

    fn body(&mut self) -> Result<(), CompileError> {
        if self.token == Token::LBrace {
            self.advance()?;
            while self.token != Token::RBrace && self.token != Token::Eof {
                self.statement()?;
            }
            self.eat(Token::RBrace, "}")
        } else {
            // a single statement needs no braces
            self.statement()
        }
    }

    fn while_statement(&mut self) -> Result<(), CompileError> {
        let back = self.emitter.pc();

        self.eat(Token::While, "while")?;
        self.eat(Token::LParen, "(")?;
        self.expression()?;

        // exit branch, target patched after the body
        let forward = self.emitter.pc();
        self.emit(Instruction::Beq {
            rs: RegId::ZR,
            rt: self.current_temporary(),
            imm: Imm16::from_word(0),
        })?;
        self.tfree(1);

        self.eat(Token::RParen, ")")?;
        self.body()?;

        // unconditional branch back to the condition
        let imm = Imm16::from_word((back - self.emitter.pc() - 4) / 4);
        self.emit(Instruction::Beq {
            rs: RegId::ZR,
            rt: RegId::ZR,
            imm,
        })?;

        self.emitter.patch_branch_to_here(forward);
        Ok(())
    }

    fn if_statement(&mut self) -> Result<(), CompileError> {
        self.eat(Token::If, "if")?;
        self.eat(Token::LParen, "(")?;
        self.expression()?;

        let to_else = self.emitter.pc();
        self.emit(Instruction::Beq {
            rs: RegId::ZR,
            rt: self.current_temporary(),
            imm: Imm16::from_word(0),
        })?;
        self.tfree(1);

        self.eat(Token::RParen, ")")?;
        self.body()?;

        if self.token == Token::Else {
            self.advance()?;

            // the taken branch skips the else part
            let to_end = self.emitter.pc();
            self.emit(Instruction::Beq {
                rs: RegId::ZR,
                rt: RegId::ZR,
                imm: Imm16::from_word(0),
            })?;

            self.emitter.patch_branch_to_here(to_else);
            self.body()?;
            self.emitter.patch_branch_to_here(to_end);
        } else {
            self.emitter.patch_branch_to_here(to_else);
        }

        Ok(())
    }

    fn return_statement(&mut self, return_ty: Ty) -> Result<(), CompileError> {
        self.eat(Token::Return, "return")?;

        if self.token != Token::Semicolon {
            let ty = self.expression()?;

            if return_ty == Ty::Void {
                self.type_warning(ty, return_ty);
            } else if ty != return_ty {
                self.type_warning(return_ty, ty);
            }

            let cur = self.current_temporary();
            self.emit(Instruction::Addu {
                rd: RegId::V0,
                rs: RegId::ZR,
                rt: cur,
            })?;
            self.tfree(1);
        }

        // branch to the epilogue, resolved when the body ends
        let site = self.emitter.pc();
        self.emit(Instruction::J { index: 0 })?;
        self.return_sites.push(site);
        Ok(())
    }

    // ------------------------------------------------------------------
    // declarations

    fn parse_type(&mut self) -> Result<Ty, CompileError> {
        self.eat(Token::Int, "int")?;

        if self.token == Token::Star {
            self.advance()?;
            Ok(Ty::IntPtr)
        } else {
            Ok(Ty::Int)
        }
    }

    /// `type identifier`, declared locally at `offset`.
    fn local_variable(&mut self, offset: Word) -> Result<(), CompileError> {
        let ty = self.parse_type()?;
        let name = self.identifier()?;
        self.symbols.declare_local(name, ty, offset);
        Ok(())
    }

    fn prologue(&mut self, local_variables: Word) -> Result<(), CompileError> {
        // save return address and caller's frame pointer
        self.emit(Instruction::Addiu {
            rt: RegId::SP,
            rs: RegId::SP,
            imm: Imm16::from_word(-4),
        })?;
        self.emit(Instruction::Sw {
            rt: RegId::RA,
            rs: RegId::SP,
            imm: Imm16::from_word(0),
        })?;
        self.emit(Instruction::Addiu {
            rt: RegId::SP,
            rs: RegId::SP,
            imm: Imm16::from_word(-4),
        })?;
        self.emit(Instruction::Sw {
            rt: RegId::FP,
            rs: RegId::SP,
            imm: Imm16::from_word(0),
        })?;

        // this frame starts here
        self.emit(Instruction::Addiu {
            rt: RegId::FP,
            rs: RegId::SP,
            imm: Imm16::from_word(0),
        })?;

        if local_variables != 0 {
            self.emit(Instruction::Addiu {
                rt: RegId::SP,
                rs: RegId::SP,
                imm: Imm16::from_word(-4 * local_variables),
            })?;
        }
        Ok(())
    }

    fn epilogue(&mut self, parameters: Word) -> Result<(), CompileError> {
        // drop locals, restore caller's frame pointer and return address
        self.emit(Instruction::Addiu {
            rt: RegId::SP,
            rs: RegId::FP,
            imm: Imm16::from_word(0),
        })?;
        self.emit(Instruction::Lw {
            rt: RegId::FP,
            rs: RegId::SP,
            imm: Imm16::from_word(0),
        })?;
        self.emit(Instruction::Addiu {
            rt: RegId::SP,
            rs: RegId::SP,
            imm: Imm16::from_word(4),
        })?;
        self.emit(Instruction::Lw {
            rt: RegId::RA,
            rs: RegId::SP,
            imm: Imm16::from_word(0),
        })?;

        // pop the return-address slot and the arguments
        self.emit(Instruction::Addiu {
            rt: RegId::SP,
            rs: RegId::SP,
            imm: Imm16::from_word((parameters + 1) * 4),
        })?;

        self.emit(Instruction::Jr { rs: RegId::RA })
    }

    fn procedure(&mut self, name: String, ty: Ty) -> Result<(), CompileError> {
        self.current_procedure = name.clone();

        let mut parameters: usize = 0;

        self.eat(Token::LParen, "(")?;
        if self.token != Token::RParen {
            self.local_variable(0)?;
            parameters = 1;

            while self.token == Token::Comma {
                self.advance()?;
                self.local_variable(0)?;
                parameters += 1;
            }

            // the most recently declared parameter sits nearest the
            // frame, 8 bytes up to skip the saved $fp and $ra
            for (i, var) in self
                .symbols
                .locals_mut()
                .iter_mut()
                .rev()
                .take(parameters)
                .enumerate()
            {
                var.offset = (i as Word) * 4 + 8;
            }
        }
        self.eat(Token::RParen, ")")?;

        if self.token == Token::Semicolon {
            // declaration only
            self.advance()?;

            if self.symbols.procedure(&name).is_none() {
                self.symbols
                    .declare_procedure(name, ty, ProcAddress::Forward { sites: Vec::new() });
            }
        } else if self.token == Token::LBrace {
            let entry = self.emitter.pc();
            self.advance()?;

            let prior = match self.symbols.procedure_mut(&name) {
                None => None,
                Some(proc) => match &mut proc.address {
                    ProcAddress::Defined(_) => {
                        return Err(CompileError::Redefined {
                            line: self.line(),
                            name,
                        })
                    }
                    ProcAddress::Forward { sites } => {
                        let sites = std::mem::take(sites);
                        let declared_ty = proc.ty;
                        proc.ty = ty;
                        proc.address = ProcAddress::Defined(entry);
                        Some((sites, declared_ty))
                    }
                },
            };

            match prior {
                None => {
                    self.symbols
                        .declare_procedure(name, ty, ProcAddress::Defined(entry));
                }
                Some((sites, declared_ty)) => {
                    if declared_ty != ty {
                        self.type_warning(declared_ty, ty);
                    }
                    for site in sites {
                        self.emitter.patch_jump(site, entry);
                    }
                }
            }

            let mut local_variables = 0;
            while self.token == Token::Int {
                local_variables += 1;
                self.local_variable(-4 * local_variables)?;
                self.eat(Token::Semicolon, ";")?;
            }

            self.prologue(local_variables)?;
            self.return_sites.clear();

            while self.token != Token::RBrace && self.token != Token::Eof {
                self.statement()?;
            }
            self.eat(Token::RBrace, "}")?;

            // every return branches here, just before the epilogue
            let target = self.emitter.pc();
            for site in std::mem::take(&mut self.return_sites) {
                self.emitter.patch_jump(site, target);
            }

            self.epilogue(parameters as Word)?;
        } else {
            return Err(self.unexpected());
        }

        self.symbols.clear_locals();
        Ok(())
    }

    fn initialization(&mut self, name: String, offset: Word, ty: Ty) -> Result<(), CompileError> {
        self.eat(Token::Assign, "=")?;

        let mut cast = None;
        if self.token == Token::LParen {
            self.advance()?;
            cast = Some(self.parse_type()?);
            self.eat(Token::RParen, ")")?;
        }

        let mut sign = false;
        if self.token == Token::Minus {
            sign = true;
            self.scanner.allow_int_min(true);
            self.advance()?;
            self.scanner.allow_int_min(false);

            if matches!(self.token, Token::Integer(n) if n == Word::MIN) {
                sign = false;
            }
        }

        let mut value = match self.token {
            Token::Integer(n) => n,
            Token::Character(c) => c,
            _ => return Err(self.unexpected()),
        };
        self.advance()?;

        if sign {
            value = -value;
        }

        self.eat(Token::Semicolon, ";")?;

        match cast {
            Some(cast) if ty != cast => self.type_warning(ty, cast),
            None if ty != Ty::Int => self.type_warning(ty, Ty::Int),
            _ => {}
        }

        self.symbols.declare_global(name, ty, offset, value);
        Ok(())
    }

    fn program(&mut self) -> Result<(), CompileError> {
        while self.token != Token::Eof {
            if self.token == Token::Void {
                self.advance()?;
                let name = self.identifier()?;
                self.procedure(name, Ty::Void)?;
            } else if self.token == Token::Int {
                let ty = self.parse_type()?;
                let name = self.identifier()?;

                if self.token == Token::LParen {
                    self.procedure(name, ty)?;
                } else {
                    self.allocated_data += 4;
                    let offset = -self.allocated_data;

                    if self.token == Token::Semicolon {
                        self.advance()?;
                        self.symbols.declare_global(name, ty, offset, 0);
                    } else {
                        self.initialization(name, offset, ty)?;
                    }
                }
            } else {
                return Err(self.unexpected());
            }
        }
        Ok(())
    }

    /// Appends the global data region: one word per variable, the packed
    /// characters of every string.
    ///
    /// Entries go out in reverse declaration order; the most recent one
    /// carries the most negative `$gp` offset and therefore sits at the
    /// lowest address.
    fn emit_globals(&mut self) -> Result<(), CompileError> {
        let mut words = Vec::new();

        for global in self.symbols.globals().iter().rev() {
            match global {
                Global::Variable(v) => words.push(v.value),
                Global::StringConst(s) => words.extend(mica_types::pack_str(&s.text)),
            }
        }

        for w in words {
            self.emitter.emit_word(w)?;
        }

        self.allocated_data = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(source: &str) -> mica_asm::Image {
        Parser::new(source).parse().unwrap()
    }

    fn multu_count(image: &mica_asm::Image) -> usize {
        image
            .words()
            .iter()
            .filter_map(|w| Instruction::decode(*w as u32).ok())
            .filter(|i| matches!(i, Instruction::Multu { .. }))
            .count()
    }

    #[test]
    fn small_literals_load_in_one_instruction() {
        // the runtime prelude contains no multiplications, so any multu
        // comes from literal synthesis
        let image = compiled("int main() { return 16384; }");
        assert_eq!(multu_count(&image), 0);
    }

    #[test]
    fn wide_literals_are_accumulated_in_stages() {
        let image = compiled("int main() { return 100000; }");
        assert_eq!(multu_count(&image), 1, "one 14-bit shift below 2^28");

        let image = compiled("int main() { return 268435456; }");
        assert_eq!(multu_count(&image), 2, "two shifts at and above 2^28");

        let image = compiled("int main() { return -2147483648; }");
        assert_eq!(multu_count(&image), 2, "INT_MIN is 2^14 << 14 << 3");
    }

    #[test]
    fn expression_depth_maps_onto_the_temporary_registers() {
        let mut parser = Parser::new("");
        assert_eq!(parser.talloc().unwrap(), RegId::T0);
        assert_eq!(parser.talloc().unwrap(), RegId::new(9));

        for _ in 2..8 {
            parser.talloc().unwrap();
        }
        assert_eq!(parser.current_temporary(), RegId::T7);

        assert_eq!(parser.talloc().unwrap(), RegId::S0);
        for _ in 9..18 {
            parser.talloc().unwrap();
        }
        assert_eq!(parser.current_temporary(), RegId::T9);

        // the pool is exhausted
        assert!(parser.talloc().is_err());

        parser.tfree(18);
        assert_eq!(parser.temporaries, 0);
    }

    #[test]
    fn deep_expressions_run_out_of_registers() {
        // 19 operands held live at once, one more than the pool
        let wide = (0..19)
            .map(|i| format!("{i}"))
            .collect::<Vec<_>>()
            .join(" + (");
        let source = format!("int main() {{ return {wide}{}; }}", ")".repeat(18));

        match Parser::new(&source).parse() {
            Err(CompileError::OutOfRegisters { .. }) => {}
            other => panic!("expected register exhaustion, got {other:?}"),
        }
    }
}
