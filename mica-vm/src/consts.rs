//! Machine parameters.

use mica_types::{Word, WORD_SIZE};

/// Bytes per page.
pub const PAGE_SIZE: Word = 4096;

/// Words per page.
pub const PAGE_WORDS: Word = PAGE_SIZE / WORD_SIZE;

/// Instructions a process may execute before it is preempted.
pub const TIME_SLICE: Word = 40_000;

/// First virtual address of the shared region.
///
/// Everything at or above this address bypasses translation and aliases
/// directly onto physical memory, in every process.
pub const SHARED_SPACE_START: Word = 16_777_216;

/// Default segment size for loaded executables, 4 MiB.
pub const DEFAULT_SEGMENT_SIZE: Word = 4 * 1024 * 1024;

/// Smallest configurable physical memory, in MiB.
pub const MIN_MEMORY_MB: u32 = 1;

/// Largest configurable physical memory, in MiB.
pub const MAX_MEMORY_MB: u32 = 1024;

static_assertions::const_assert!(PAGE_SIZE % WORD_SIZE == 0);
static_assertions::const_assert!(SHARED_SPACE_START % PAGE_SIZE == 0);
static_assertions::const_assert!(DEFAULT_SEGMENT_SIZE % PAGE_SIZE == 0);
