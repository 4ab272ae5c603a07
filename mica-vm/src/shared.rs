//! The shared region and the Michael–Scott queue that lives in it.
//!
//! Addresses above [`SHARED_SPACE_START`] alias onto physical memory in
//! every process, so data placed there is process-wide. Allocation is a
//! bump pointer that never rewinds; queue nodes and tagged pointers are
//! never freed.
//!
//! The queue is the two-pointer Michael–Scott FIFO. A tagged pointer is
//! a two-word cell `[node, count]`; the queue head, queue tail, and
//! every node's `next` field hold the *address* of such a cell and are
//! updated with a single-word [`Machine::cas`], replacing the cell
//! wholesale with a fresh one whose count is one higher. The count is
//! what defeats ABA.
//!
//! [`Machine::cas`] is atomic because exactly one host thread drives the
//! interpreter; there is no SMP. A port that adds a second machine must
//! revisit the primitive (a double-word CAS or hazard pointers), but the
//! retry structure here is already the real algorithm.

use mica_types::Word;
use tracing::debug;

use crate::consts::SHARED_SPACE_START;
use crate::{Exception, Machine};

// field offsets, in bytes
const QUEUE_HEAD: Word = 0;
const QUEUE_TAIL: Word = 4;
const NODE_VALUE: Word = 0;
const NODE_NEXT: Word = 4;
const PTR_NODE: Word = 0;
const PTR_COUNT: Word = 4;

impl Machine {
    /// Bump-allocates `size` bytes of the shared region, rounded up to
    /// whole words; returns the start of the block.
    pub fn shared_alloc(&mut self, size: Word) -> Word {
        let mut size = size;
        if size % 4 != 0 {
            size += 4 - size % 4;
        }

        let start = self.shared_bump;
        self.shared_bump += size;

        debug!(size, start, "shared alloc");
        start
    }

    /// The address of the process-wide message queue, creating it on
    /// first use; the `madvise` system call.
    pub fn shared_queue(&mut self) -> Result<Word, Exception> {
        match self.queue_addr {
            Some(addr) => Ok(addr),
            None => {
                let addr = self.queue_create()?;
                self.queue_addr = Some(addr);
                Ok(addr)
            }
        }
    }

    /// Compare-and-swap on one shared word.
    ///
    /// Atomic with respect to the whole machine, because a single host
    /// thread runs everything; see the module notes.
    pub fn cas(&mut self, addr: Word, old: Word, new: Word) -> Result<bool, Exception> {
        if self.load_word(addr)? != old {
            return Ok(false);
        }
        self.store_word(addr, new)?;
        Ok(true)
    }

    /// Allocates a `[node, count]` tagged-pointer cell.
    fn pointer_create(&mut self, node: Word, count: Word) -> Result<Word, Exception> {
        let p = self.shared_alloc(8);
        self.store_word(p + PTR_NODE, node)?;
        self.store_word(p + PTR_COUNT, count)?;
        Ok(p)
    }

    /// Allocates a `[value, next]` node with a null next pointer.
    fn node_create(&mut self, value: Word) -> Result<Word, Exception> {
        let node = self.shared_alloc(8);
        let next = self.pointer_create(0, 0)?;
        self.store_word(node + NODE_VALUE, value)?;
        self.store_word(node + NODE_NEXT, next)?;
        Ok(node)
    }

    /// Creates an empty queue: head and tail both at a sentinel node.
    pub fn queue_create(&mut self) -> Result<Word, Exception> {
        let queue = self.shared_alloc(8);
        let sentinel = self.node_create(0)?;
        let head = self.pointer_create(sentinel, 0)?;

        self.store_word(queue + QUEUE_HEAD, head)?;
        self.store_word(queue + QUEUE_TAIL, head)?;

        debug_assert!(queue >= SHARED_SPACE_START);
        debug!(queue, "queue created");
        Ok(queue)
    }

    /// Appends `value` to the queue at `queue`.
    pub fn queue_enqueue(&mut self, queue: Word, value: Word) -> Result<(), Exception> {
        let node = self.node_create(value)?;

        let mut tail;
        loop {
            tail = self.load_word(queue + QUEUE_TAIL)?;
            let tail_node = self.load_word(tail + PTR_NODE)?;
            let next = self.load_word(tail_node + NODE_NEXT)?;

            // consistency check: is tail still the tail?
            if tail != self.load_word(queue + QUEUE_TAIL)? {
                continue;
            }

            if self.load_word(next + PTR_NODE)? == 0 {
                // the tail really is last; link the new node
                let count = self.load_word(next + PTR_COUNT)?;
                let linked = self.pointer_create(node, count + 1)?;
                if self.cas(tail_node + NODE_NEXT, next, linked)? {
                    break;
                }
            } else {
                // the tail lags; help it forward
                let count = self.load_word(tail + PTR_COUNT)?;
                let next_node = self.load_word(next + PTR_NODE)?;
                let advanced = self.pointer_create(next_node, count + 1)?;
                self.cas(queue + QUEUE_TAIL, tail, advanced)?;
            }
        }

        // swing the tail to the inserted node
        let count = self.load_word(tail + PTR_COUNT)?;
        let swung = self.pointer_create(node, count + 1)?;
        self.cas(queue + QUEUE_TAIL, tail, swung)?;
        Ok(())
    }

    /// Removes the oldest value into `out`; returns false on empty,
    /// leaving `out` untouched.
    pub fn queue_dequeue(&mut self, queue: Word, out: &mut Word) -> Result<bool, Exception> {
        loop {
            let head = self.load_word(queue + QUEUE_HEAD)?;
            let tail = self.load_word(queue + QUEUE_TAIL)?;
            let head_node = self.load_word(head + PTR_NODE)?;
            let next = self.load_word(head_node + NODE_NEXT)?;

            if head != self.load_word(queue + QUEUE_HEAD)? {
                continue;
            }

            if head_node == self.load_word(tail + PTR_NODE)? {
                if self.load_word(next + PTR_NODE)? == 0 {
                    // only the sentinel is left
                    return Ok(false);
                }

                // the tail lags behind; help it forward
                let count = self.load_word(tail + PTR_COUNT)?;
                let next_node = self.load_word(next + PTR_NODE)?;
                let advanced = self.pointer_create(next_node, count + 1)?;
                self.cas(queue + QUEUE_TAIL, tail, advanced)?;
            } else {
                let next_node = self.load_word(next + PTR_NODE)?;
                let value = self.load_word(next_node + NODE_VALUE)?;

                let count = self.load_word(head + PTR_COUNT)?;
                let advanced = self.pointer_create(next_node, count + 1)?;
                if self.cas(queue + QUEUE_HEAD, head, advanced)? {
                    *out = value;
                    return Ok(true);
                }
            }
        }
    }
}
