use std::{cell::Cell, fmt, ptr::NonNull};

/// Low bit of the state word; set while the target is alive.
const ALIVE: usize = 1;
/// One weak reference, counted above the alive bit.
const WEAK: usize = 2;

/// The weak-count holder for one target.
///
/// A block is allocated separately from its target so it can outlive it. The
/// weak count and the validity flag share one state word, `count << 1 | alive`,
/// and the block is freed by whichever of [`BlockRef::release`] and
/// [`BlockRef::invalidate`] brings that word to zero.
pub struct ControlBlock {
    state: Cell<usize>,
}

impl ControlBlock {
    /// Allocates a block for a live target with no weak references.
    pub fn allocate() -> BlockRef {
        let ptr = NonNull::from(Box::leak(Box::new(ControlBlock {
            state: Cell::new(ALIVE),
        })));
        #[cfg(test)]
        live_blocks::adjust(1);
        debug_println!("allocated control block {:p}", ptr);
        BlockRef { ptr }
    }
}

/// A non-owning handle to a [`ControlBlock`].
///
/// Every method that touches the block is `unsafe`: the handle does not keep
/// the block alive, so the caller must know the block has not been freed. A
/// block is alive while its target is alive or while it has a nonzero weak
/// count.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    ptr: NonNull<ControlBlock>,
}

impl BlockRef {
    fn state<'a>(self) -> &'a Cell<usize> {
        unsafe { &(*self.ptr.as_ptr()).state }
    }

    /// # Safety
    ///
    /// The block must not have been freed.
    pub unsafe fn is_valid(self) -> bool {
        self.state().get() & ALIVE != 0
    }

    /// # Safety
    ///
    /// The block must not have been freed.
    pub unsafe fn weak_count(self) -> usize {
        self.state().get() / WEAK
    }

    /// Adds one weak reference.
    ///
    /// # Safety
    ///
    /// The block must not have been freed.
    pub unsafe fn acquire(self) {
        let state = self.state();
        state.set(state.get() + WEAK);
    }

    /// Drops one weak reference, freeing the block if it was the last one and
    /// the target is already gone. The handle must not be used afterward.
    ///
    /// # Safety
    ///
    /// The caller must own one of the block's weak references.
    pub unsafe fn release(self) {
        let state = self.state();
        let old = state.get();
        if old < WEAK {
            panic!("attempted to release a control block with a weak count of 0 {:p}", self.ptr);
        }
        state.set(old - WEAK);
        if old - WEAK == 0 {
            unsafe { self.free() };
        }
    }

    /// Marks the target dead. Frees the block at once if no weak references
    /// remain; otherwise the last [`release`](Self::release) frees it.
    ///
    /// # Safety
    ///
    /// Must be called exactly once, by the target's destruction path.
    pub unsafe fn invalidate(self) {
        let state = self.state();
        let old = state.get();
        debug_assert!(
            old & ALIVE != 0,
            "control block {:p} invalidated twice",
            self.ptr
        );
        state.set(old & !ALIVE);
        debug_println!(
            "invalidated control block {:p} with {} weak references",
            self.ptr,
            old / WEAK
        );
        if old & !ALIVE == 0 {
            unsafe { self.free() };
        }
    }

    unsafe fn free(self) {
        debug_println!("freeing control block {:p}", self.ptr);
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
        #[cfg(test)]
        live_blocks::adjust(-1);
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockRef").field(&self.ptr).finish()
    }
}

/// Null-guarded [`BlockRef::acquire`].
///
/// # Safety
///
/// A block in `block` must not have been freed.
pub(crate) unsafe fn acquire_opt(block: Option<BlockRef>) {
    if let Some(block) = block {
        unsafe { block.acquire() };
    }
}

/// Null-guarded [`BlockRef::release`]; empties the slot.
///
/// # Safety
///
/// A block in `block` must carry a weak reference owned by the slot.
pub(crate) unsafe fn release_opt(block: &mut Option<BlockRef>) {
    if let Some(block) = block.take() {
        unsafe { block.release() };
    }
}

/// Per-thread tally of allocated blocks, for leak checks in tests.
#[cfg(test)]
pub(crate) mod live_blocks {
    use std::cell::Cell;

    std::thread_local! {
        static LIVE: Cell<isize> = const { Cell::new(0) };
    }

    pub(crate) fn adjust(delta: isize) {
        LIVE.with(|live| live.set(live.get() + delta));
    }

    pub(crate) fn count() -> isize {
        LIVE.with(|live| live.get())
    }
}
