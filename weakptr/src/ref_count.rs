use std::{cell::Cell, fmt, ptr::NonNull};

use crate::control_block::{BlockRef, ControlBlock};

/// The intrusive header a reference-counted target embeds.
///
/// It carries the strong count, which starts at 1 for the creator's
/// reference, and the target's control block. The block is allocated when the
/// header is, so every weak reference taken on the target observes the same
/// block.
pub struct RefCount {
    strong: Cell<usize>,
    block: Cell<Option<BlockRef>>,
}

impl RefCount {
    pub fn new() -> Self {
        Self {
            strong: Cell::new(1),
            block: Cell::new(Some(ControlBlock::allocate())),
        }
    }

    pub fn strong_count(&self) -> usize {
        self.strong.get()
    }

    pub fn retain(&self) {
        let old = self.strong.get();
        if old == 0 {
            panic!("attempted to retain a target with a strong count of 0");
        }
        self.strong.set(old + 1);
    }

    /// Returns true when this was the last strong reference.
    pub fn release(&self) -> bool {
        let old = self.strong.get();
        if old == 0 {
            panic!("attempted to release a target with a strong count of 0 {:p}", self);
        }
        self.strong.set(old - 1);
        old == 1
    }

    /// The target's control block; the same block for the target's whole life.
    ///
    /// # Panics
    ///
    /// If the target has already been invalidated.
    pub fn control_block(&self) -> BlockRef {
        match self.block.get() {
            Some(block) => block,
            None => panic!("control block requested after the target was invalidated"),
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.block.get().is_none()
    }

    /// Marks every weak reference to the target invalid. Only the first call
    /// has an effect; the header forgets its block afterward.
    pub(crate) fn invalidate(&self) {
        if let Some(block) = self.block.take() {
            unsafe { block.invalidate() };
        }
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

/// A clone is a new target, so it gets a fresh header.
impl Clone for RefCount {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Drop for RefCount {
    fn drop(&mut self) {
        self.invalidate();
    }
}

impl fmt::Debug for RefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCount")
            .field("strong", &self.strong.get())
            .field("valid", &!self.is_invalidated())
            .finish()
    }
}

/// Types that can be the target of a [`WeakPtr`](crate::WeakPtr) or a
/// [`Strong`](crate::Strong).
///
/// Usually derived with `#[derive(RefCounted)]`.
///
/// # Safety
///
/// `ref_count` must return the same header, embedded in `self`, every time it
/// is called. A value that strong or weak references point at must not move
/// until it has been destroyed.
pub unsafe trait RefCounted: Sized {
    fn ref_count(&self) -> &RefCount;

    fn retain(&self) {
        self.ref_count().retain();
    }

    /// Drops one strong reference. The last one invalidates the control block
    /// and then destroys the target.
    ///
    /// # Safety
    ///
    /// `this` must point to a live target on which the caller owns a strong
    /// reference, allocated the way [`destroy`](Self::destroy) expects.
    unsafe fn release(this: NonNull<Self>) {
        let header = unsafe { this.as_ref() }.ref_count();
        if header.release() {
            header.invalidate();
            debug_println!("destroying target {:p}", this);
            unsafe { Self::destroy(this) };
        }
    }

    /// Reclaims a target whose strong count reached zero. The default matches
    /// [`Strong::new`](crate::Strong::new), which boxes the target.
    ///
    /// # Safety
    ///
    /// `this` must be dead and not yet reclaimed.
    unsafe fn destroy(this: NonNull<Self>) {
        drop(unsafe { Box::from_raw(this.as_ptr()) });
    }

    fn control_block(&self) -> BlockRef {
        self.ref_count().control_block()
    }

    fn strong_count(&self) -> usize {
        self.ref_count().strong_count()
    }
}
