//! Symbol tables.
//!
//! Two scopes: a process-wide global table and a scratch local table
//! that is cleared after every procedure body. Lookups go local first,
//! then global, and are filtered by symbol class, so a variable can
//! never shadow a procedure.

use core::fmt;

use mica_asm::RegId;
use mica_types::Word;

/// A Slate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    /// Machine word.
    Int,
    /// Pointer to machine words.
    IntPtr,
    /// No value; only valid as a return type.
    Void,
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ty::Int => "int",
            Ty::IntPtr => "int*",
            Ty::Void => "void",
        })
    }
}

/// A declared variable, global or local.
#[derive(Debug)]
pub struct Variable {
    /// Identifier.
    pub name: String,
    /// Declared type.
    pub ty: Ty,
    /// Initial value; only meaningful for globals.
    pub value: Word,
    /// Byte offset from the home register: negative from `$gp` for
    /// globals, positive for parameters and negative for locals from
    /// `$fp`.
    pub offset: Word,
    /// The home register, `$gp` or `$fp`.
    pub base: RegId,
}

/// Where a procedure lives, or where calls to it wait for a definition.
#[derive(Debug)]
pub enum ProcAddress {
    /// Entry address of the emitted body.
    Defined(Word),
    /// Not yet defined. `sites` are byte addresses of emitted `jal 0`
    /// placeholders, patched when the body arrives.
    Forward {
        /// Call sites waiting for the definition.
        sites: Vec<Word>,
    },
}

/// A procedure symbol.
#[derive(Debug)]
pub struct Procedure {
    /// Identifier.
    pub name: String,
    /// Return type.
    pub ty: Ty,
    /// Definition state.
    pub address: ProcAddress,
}

/// An interned string literal.
#[derive(Debug)]
pub struct StringConst {
    /// The characters, without quotes.
    pub text: String,
    /// Byte offset of the packed string from `$gp`.
    pub offset: Word,
}

/// One entry of the global data region.
#[derive(Debug)]
pub enum Global {
    /// A global variable slot.
    Variable(Variable),
    /// A packed string constant.
    StringConst(StringConst),
}

/// The compiler's symbol tables.
#[derive(Debug, Default)]
pub struct SymbolTable {
    globals: Vec<Global>,
    procedures: Vec<Procedure>,
    locals: Vec<Variable>,
}

impl SymbolTable {
    /// An empty table set.
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Declares a global variable.
    pub fn declare_global(&mut self, name: String, ty: Ty, offset: Word, value: Word) {
        self.globals.push(Global::Variable(Variable {
            name,
            ty,
            value,
            offset,
            base: RegId::GP,
        }));
    }

    /// Declares a local variable or parameter.
    pub fn declare_local(&mut self, name: String, ty: Ty, offset: Word) {
        self.locals.push(Variable {
            name,
            ty,
            value: 0,
            offset,
            base: RegId::FP,
        });
    }

    /// Interns a string constant at the given data offset.
    pub fn intern_string(&mut self, text: String, offset: Word) {
        self.globals
            .push(Global::StringConst(StringConst { text, offset }));
    }

    /// Declares a procedure and returns it.
    pub fn declare_procedure(&mut self, name: String, ty: Ty, address: ProcAddress) {
        self.procedures.push(Procedure { name, ty, address });
    }

    /// Finds a variable, local scope first.
    ///
    /// The most recent declaration of a name wins, which is what the
    /// head-insertion of the original list tables gave.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.locals
            .iter()
            .rev()
            .find(|v| v.name == name)
            .or_else(|| {
                self.globals.iter().rev().find_map(|g| match g {
                    Global::Variable(v) if v.name == name => Some(v),
                    _ => None,
                })
            })
    }

    /// Finds a procedure.
    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    /// Finds a procedure for update.
    pub fn procedure_mut(&mut self, name: &str) -> Option<&mut Procedure> {
        self.procedures.iter_mut().find(|p| p.name == name)
    }

    /// The parameters and locals of the procedure being compiled.
    pub fn locals_mut(&mut self) -> &mut [Variable] {
        &mut self.locals
    }

    /// Drops the local scope at the end of a procedure body.
    pub fn clear_locals(&mut self) {
        self.locals.clear();
    }

    /// The global data entries in declaration order.
    pub fn globals(&self) -> &[Global] {
        &self.globals
    }
}
