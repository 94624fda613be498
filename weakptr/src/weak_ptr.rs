use std::{
    fmt,
    marker::PhantomData,
    mem,
    ptr::{self, NonNull},
};

use serde::{Serialize, Serializer};

use crate::{
    control_block::{BlockRef, acquire_opt, release_opt},
    RefCounted, Strong,
};

/// A non-owning reference to a reference-counted target.
///
/// A WeakPtr holds a raw pointer to its target and one weak count on the
/// target's control block. It never touches the strong count, so it does not
/// keep the target alive; when the target is destroyed, every WeakPtr to it
/// becomes invalid, and stays invalid.
///
/// The stored pointer is not cleared when the target dies, so every access
/// checks the control block first: [`get`](Self::get) returns null for an
/// invalid reference, and [`value`](Self::value) panics on one.
///
/// Access to the target goes through a [`Strong`] guard, so a borrow of the
/// target cannot outlive it.
pub struct WeakPtr<T: RefCounted> {
    ptr: Option<NonNull<T>>,
    block: Option<BlockRef>,
    _marker: PhantomData<*mut T>,
}

impl<T: RefCounted> WeakPtr<T> {
    /// An empty reference; never valid.
    pub const fn new() -> Self {
        Self {
            ptr: None,
            block: None,
            _marker: PhantomData,
        }
    }

    /// Observes the target at `ptr`, or returns an empty reference for null.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a live target that stays at that
    /// address until it is destroyed.
    pub unsafe fn from_raw(ptr: *const T) -> Self {
        let ptr = NonNull::new(ptr.cast_mut());
        let block = ptr.map(|ptr| T::control_block(unsafe { ptr.as_ref() }));
        unsafe { acquire_opt(block) };
        Self {
            ptr,
            block,
            _marker: PhantomData,
        }
    }

    /// Moves the reference out, leaving this one empty. The weak count is
    /// untouched.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    fn same_target(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.block == other.block
    }

    /// Copy-assigns `other`. Assigning a reference to the target already held
    /// is a no-op; otherwise the new block is acquired before the old one is
    /// released.
    pub fn assign(&mut self, other: &Self) {
        if self.same_target(other) {
            return;
        }
        unsafe {
            acquire_opt(other.block);
            release_opt(&mut self.block);
        }
        self.ptr = other.ptr;
        self.block = other.block;
    }

    /// Move-assigns `other`, leaving it empty. A no-op, and `other` is left
    /// as is, when both already refer to the same target.
    pub fn move_from(&mut self, other: &mut Self) {
        if self.same_target(other) {
            return;
        }
        unsafe { release_opt(&mut self.block) };
        self.ptr = other.ptr.take();
        self.block = other.block.take();
    }

    /// Points this reference at `ptr`, or empties it for null. A no-op when
    /// `ptr` is the target already held.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw`](Self::from_raw).
    pub unsafe fn set_raw(&mut self, ptr: *const T) {
        let ptr = NonNull::new(ptr.cast_mut());
        let block = ptr.map(|ptr| T::control_block(unsafe { ptr.as_ref() }));
        if self.ptr == ptr && self.block == block {
            return;
        }
        unsafe {
            acquire_opt(block);
            release_opt(&mut self.block);
        }
        self.ptr = ptr;
        self.block = block;
    }

    pub fn set(&mut self, target: &Strong<T>) {
        unsafe { self.set_raw(target.as_ptr()) };
    }

    /// Empties the reference, releasing its weak count.
    pub fn reset(&mut self) {
        unsafe { release_opt(&mut self.block) };
        self.ptr = None;
    }

    /// Assigns the null sentinel; same as [`reset`](Self::reset).
    pub fn set_null(&mut self) {
        self.reset();
    }

    /// Exchanges targets with `other`. Counts are unaffected.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// True iff the reference holds a target that is still alive.
    pub fn is_valid(&self) -> bool {
        match self.block {
            Some(block) => unsafe { block.is_valid() },
            None => false,
        }
    }

    /// True iff [`get`](Self::get) would return null.
    pub fn is_null(&self) -> bool {
        !self.is_valid()
    }

    /// The target's address if it is alive, null otherwise.
    pub fn get(&self) -> *const T {
        match self.ptr {
            Some(ptr) if self.is_valid() => ptr.as_ptr(),
            _ => ptr::null(),
        }
    }

    /// Borrows the target if it is alive.
    ///
    /// # Safety
    ///
    /// The returned reference is not tied to the target's lifetime. The
    /// caller must not hold it across the release of the target's last strong
    /// reference.
    pub unsafe fn as_ref(&self) -> Option<&T> {
        match self.ptr {
            Some(ptr) if self.is_valid() => Some(unsafe { ptr.as_ref() }),
            _ => None,
        }
    }

    /// Takes a strong reference on the target if it is still alive.
    pub fn upgrade(&self) -> Option<Strong<T>> {
        let target = unsafe { self.as_ref() }?;
        T::retain(target);
        Some(unsafe { Strong::from_raw(target) })
    }

    /// Dereferences the weak reference, keeping the target alive for as long
    /// as the returned guard lives.
    ///
    /// # Panics
    ///
    /// If the reference is empty or its target has been destroyed.
    pub fn value(&self) -> Strong<T> {
        match self.upgrade() {
            Some(target) => target,
            None => panic!("attempted to dereference an invalid WeakPtr"),
        }
    }

    /// Weak references sharing this one's control block, this one included.
    /// Still counted after the target dies; 0 for an empty reference.
    pub fn weak_count(&self) -> usize {
        match self.block {
            Some(block) => unsafe { block.weak_count() },
            None => 0,
        }
    }

    /// 0 once the target is gone.
    pub fn strong_count(&self) -> usize {
        unsafe { self.as_ref() }.map_or(0, T::strong_count)
    }
}

impl<T: RefCounted> Default for WeakPtr<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RefCounted> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        unsafe { acquire_opt(self.block) };
        Self {
            ptr: self.ptr,
            block: self.block,
            _marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T: RefCounted> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        unsafe { release_opt(&mut self.block) };
    }
}

impl<T: RefCounted> From<&Strong<T>> for WeakPtr<T> {
    fn from(strong: &Strong<T>) -> Self {
        unsafe { Self::from_raw(strong.as_ptr()) }
    }
}

/// Comparisons go through [`WeakPtr::get`], so references to a destroyed
/// target are equal to null and to each other. There is no `Eq` or `Hash`:
/// a reference's equality class changes when its target dies.
macro_rules! impl_weak_ptr_eq {
    ($other:ty, |$rhs:ident| $addr:expr) => {
        impl<T: RefCounted> PartialEq<$other> for WeakPtr<T> {
            fn eq(&self, $rhs: &$other) -> bool {
                self.get() == $addr
            }
        }
    };
}

impl_weak_ptr_eq!(WeakPtr<T>, |other| other.get());
impl_weak_ptr_eq!(*const T, |other| *other);
impl_weak_ptr_eq!(*mut T, |other| other.cast_const());
impl_weak_ptr_eq!(Strong<T>, |other| other.as_ptr());

impl<T: RefCounted> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            f.debug_tuple("WeakPtr").field(&self.get()).finish()
        } else {
            f.write_str("WeakPtr(<invalid>)")
        }
    }
}

// A WeakPtr serializes its target, but does not deserialize: it must be
// derived from a live target.
impl<T: RefCounted + Serialize> Serialize for WeakPtr<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match unsafe { self.as_ref() } {
            Some(target) => serializer.serialize_some(target),
            None => serializer.serialize_none(),
        }
    }
}
