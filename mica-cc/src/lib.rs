//! The Slate compiler.
//!
//! Slate is a tiny C dialect: `int` and `int*` values, `void` and `int`
//! procedures, assignment, `if`/`else`, `while`, `return`, and the usual
//! arithmetic and comparison operators. The compiler is a single pass:
//! the recursive-descent parser emits machine code directly while it
//! reads tokens, resolving forward references through per-symbol patch
//! lists. There is no AST and no optimizer.
//!
//! ```no_run
//! let image = mica_cc::compile("print.sl", &std::fs::read_to_string("print.sl").unwrap())?;
//! image.save("print.mx")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod emitter;
mod error;
mod parser;
mod runtime;
mod scanner;
mod symtab;
mod token;

pub use error::CompileError;
pub use parser::Parser;
pub use scanner::Scanner;
pub use token::Token;

use mica_asm::Image;

/// Compiles one Slate source into an executable image.
///
/// `name` is used only for diagnostics.
pub fn compile(name: &str, source: &str) -> Result<Image, CompileError> {
    tracing::info!(source = name, "compiling");
    Parser::new(source).parse()
}
