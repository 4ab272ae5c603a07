//! Word-level primitives shared by every crate of the MICA workspace.
//!
//! The emulated machine knows exactly one data type: the signed 32-bit
//! word. Characters are 7-bit ASCII packed four to a word, little-endian
//! within the word. The helpers here express shifts as multiplication and
//! division by powers of two, mirroring the arithmetic the Slate language
//! itself is able to perform.

#![warn(missing_docs)]

mod arith;
mod numeral;
mod packed;

pub use arith::{left_shift, right_shift, two_to_power};
pub use numeral::{atoi, itoa};
pub use packed::{
    load_byte, load_character, pack_str, store_byte, store_character, string_length,
    unpack_str,
};

/// The machine word. All registers and all memory cells hold one of these.
pub type Word = i32;

/// Unsigned view of a machine word, used when bit patterns matter.
pub type UWord = u32;

/// Size of a machine word in bytes.
pub const WORD_SIZE: Word = 4;
