//! Append-only frame store shared by one writer (the loader) and any number
//! of readers (the presenter) without a lock.
//!
//! The store is a singly linked chain of fixed-capacity blocks. Safety rests
//! on three rules:
//!
//! 1. Blocks are only ever appended; nothing is removed until the whole store
//!    is dropped.
//! 2. A block's fill state goes `Open(n) -> Finalized(count)` exactly once,
//!    and a finalized block never changes again.
//! 3. A frame is written into its slot before the write index is advanced
//!    past it (`Release`), and readers load the index (`Acquire`) before
//!    touching any slot below it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::media::types::Frame;

/// High bit of the packed fill state marks a finalized block.
const FINALIZED: usize = 1 << (usize::BITS - 1);

/// Fill state of a block as observed by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    /// Still being appended; frames `0..write_index` are readable.
    Open(usize),
    /// Immutable; holds exactly `count` frames.
    Finalized(usize),
}

impl FillState {
    fn decode(raw: usize) -> Self {
        if raw & FINALIZED != 0 {
            FillState::Finalized(raw & !FINALIZED)
        } else {
            FillState::Open(raw)
        }
    }

    /// Frames visible to readers in this state.
    pub fn len(self) -> usize {
        match self {
            FillState::Open(n) | FillState::Finalized(n) => n,
        }
    }

    pub fn is_finalized(self) -> bool {
        matches!(self, FillState::Finalized(_))
    }
}

/// Fixed-capacity run of frames plus a forward link to the next block.
pub struct Block {
    slots: Box<[OnceLock<Arc<Frame>>]>,
    state: AtomicUsize,
    next: OnceLock<Arc<Block>>,
}

impl Block {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            state: AtomicUsize::new(0),
            next: OnceLock::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn fill_state(&self) -> FillState {
        FillState::decode(self.state.load(Ordering::Acquire))
    }

    /// Number of frames currently readable.
    pub fn len(&self) -> usize {
        self.fill_state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame at `index` if it has been published.
    pub fn frame(&self, index: usize) -> Option<Arc<Frame>> {
        if index >= self.len() {
            return None;
        }
        self.slots.get(index)?.get().cloned()
    }

    pub fn next(&self) -> Option<&Arc<Block>> {
        self.next.get()
    }

    /// Write `frame` at `index` and reveal it. Writer only.
    fn publish(&self, index: usize, frame: Frame) {
        debug_assert_eq!(self.fill_state(), FillState::Open(index));
        if self.slots[index].set(Arc::new(frame)).is_err() {
            log::error!("Frame slot {index} written twice");
            return;
        }
        self.state.store(index + 1, Ordering::Release);
    }

    /// Freeze the block at `count` frames. Writer only, at most once.
    fn finalize(&self, count: usize) {
        let previous = self.state.swap(FINALIZED | count, Ordering::AcqRel);
        debug_assert_eq!(FillState::decode(previous), FillState::Open(count));
    }
}

/// Head of the block chain plus the running frame total.
pub struct Store {
    head: OnceLock<Arc<Block>>,
    capacity: usize,
    total_frames: AtomicU64,
    complete: AtomicBool,
    writer_taken: AtomicBool,
}

impl Store {
    pub fn new(block_capacity: usize) -> Self {
        Self {
            head: OnceLock::new(),
            capacity: block_capacity.max(1),
            total_frames: AtomicU64::new(0),
            complete: AtomicBool::new(false),
            writer_taken: AtomicBool::new(false),
        }
    }

    /// First block, once the writer has allocated it.
    pub fn head(&self) -> Option<&Arc<Block>> {
        self.head.get()
    }

    /// Frames in finalized blocks.
    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    /// The writer has finalized its last block; the chain will not grow.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn block_count(&self) -> usize {
        let mut count = 0;
        let mut block = self.head();
        while let Some(b) = block {
            count += 1;
            block = b.next();
        }
        count
    }

    /// The single writer for this store. Later calls return `None`.
    pub fn writer(&self) -> Option<StoreWriter<'_>> {
        if self.writer_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(StoreWriter {
            store: self,
            current: None,
            write_index: 0,
            blocks: 0,
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Unlink iteratively so a long chain cannot overflow the stack.
        let mut next = self.head.take();
        while let Some(block) = next {
            next = match Arc::try_unwrap(block) {
                Ok(mut b) => b.next.take(),
                Err(_) => None,
            };
        }
    }
}

/// Append handle held by the loader. Owns the open block's write index.
pub struct StoreWriter<'a> {
    store: &'a Store,
    current: Option<Arc<Block>>,
    write_index: usize,
    blocks: usize,
}

impl StoreWriter<'_> {
    /// Make sure an open block with room exists. When the current block is
    /// full it is finalized first, then the new block is linked after it.
    pub fn ensure_open_block(&mut self) {
        if let Some(block) = &self.current {
            if self.write_index < block.capacity() {
                return;
            }
        }

        let block = Arc::new(Block::new(self.store.capacity));
        match self.current.take() {
            None => {
                if self.store.head.set(block.clone()).is_err() {
                    log::error!("Frame store head set twice");
                }
            }
            Some(previous) => {
                self.finalize_block(&previous);
                if previous.next.set(block.clone()).is_err() {
                    log::error!("Frame block linked twice");
                }
            }
        }
        self.blocks += 1;
        log::debug!("Allocated frame block {}", self.blocks);
        self.current = Some(block);
        self.write_index = 0;
    }

    /// Append one frame to the open block, allocating as needed.
    pub fn append(&mut self, frame: Frame) {
        self.ensure_open_block();
        if let Some(block) = &self.current {
            block.publish(self.write_index, frame);
            self.write_index += 1;
        }
    }

    /// Finalize the open block at the number of frames actually written and
    /// mark the store complete. Returns the total frame count.
    pub fn finish(mut self) -> u64 {
        if let Some(block) = self.current.take() {
            self.finalize_block(&block);
        }
        self.store.complete.store(true, Ordering::Release);
        self.store.total_frames()
    }

    fn finalize_block(&self, block: &Block) {
        block.finalize(self.write_index);
        let total = self
            .store
            .total_frames
            .fetch_add(self.write_index as u64, Ordering::AcqRel)
            + self.write_index as u64;
        log::debug!("Finalized block at {} frames, {total} loaded", self.write_index);
    }
}
