//! Tokens of the Slate language.

use derive_more::Display;
use mica_types::Word;

/// One token, as handed from the scanner to the parser.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Token {
    /// End of the source text.
    #[display(fmt = "end of file")]
    Eof,
    /// A name.
    #[display(fmt = "identifier {}", _0)]
    Identifier(String),
    /// A decimal integer literal, already converted.
    #[display(fmt = "integer {}", _0)]
    Integer(Word),
    /// A character literal, as its code point.
    #[display(fmt = "character")]
    Character(Word),
    /// A string literal, without quotes.
    #[display(fmt = "string")]
    Str(String),
    /// `int`
    #[display(fmt = "int")]
    Int,
    /// `void`
    #[display(fmt = "void")]
    Void,
    /// `if`
    #[display(fmt = "if")]
    If,
    /// `else`
    #[display(fmt = "else")]
    Else,
    /// `while`
    #[display(fmt = "while")]
    While,
    /// `return`
    #[display(fmt = "return")]
    Return,
    /// `;`
    #[display(fmt = ";")]
    Semicolon,
    /// `,`
    #[display(fmt = ",")]
    Comma,
    /// `(`
    #[display(fmt = "(")]
    LParen,
    /// `)`
    #[display(fmt = ")")]
    RParen,
    /// Opening brace.
    #[display(fmt = "{{")]
    LBrace,
    /// Closing brace.
    #[display(fmt = "}}")]
    RBrace,
    /// `=`
    #[display(fmt = "=")]
    Assign,
    /// `==`
    #[display(fmt = "==")]
    Eq,
    /// `!=`
    #[display(fmt = "!=")]
    NotEq,
    /// `<`
    #[display(fmt = "<")]
    Lt,
    /// `>`
    #[display(fmt = ">")]
    Gt,
    /// `<=`
    #[display(fmt = "<=")]
    Leq,
    /// `>=`
    #[display(fmt = ">=")]
    Geq,
    /// `+`
    #[display(fmt = "+")]
    Plus,
    /// `-`
    #[display(fmt = "-")]
    Minus,
    /// `*`, both multiplication and dereference.
    #[display(fmt = "*")]
    Star,
    /// `/`
    #[display(fmt = "/")]
    Div,
    /// `%`
    #[display(fmt = "%")]
    Mod,
}

impl Token {
    /// True for tokens that can start an expression.
    pub fn starts_expression(&self) -> bool {
        matches!(
            self,
            Token::Minus
                | Token::LParen
                | Token::Identifier(_)
                | Token::Integer(_)
                | Token::Star
                | Token::Str(_)
                | Token::Character(_)
        )
    }
}
