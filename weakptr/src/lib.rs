//! Weak pointers for intrusively reference-counted objects.
//!
//! A target embeds a [`RefCount`] header and implements [`RefCounted`],
//! usually through `#[derive(RefCounted)]`. The header holds the strong count
//! and a pointer to the target's [`ControlBlock`], a small record allocated
//! together with the header that outlives the target for as long as weak
//! references remain. [`Strong`] handles keep a target alive; [`WeakPtr`]
//! handles only observe it and find out, through the control block, when it
//! is gone.
//!
//! ```
//! use weakptr::{RefCount, RefCounted, Strong, WeakPtr};
//!
//! #[derive(RefCounted)]
//! struct Sprite {
//!     header: RefCount,
//!     frame: u32,
//! }
//!
//! let sprite = Strong::new(Sprite { header: RefCount::new(), frame: 3 });
//! let weak: WeakPtr<Sprite> = sprite.downgrade();
//! assert_eq!(weak.value().frame, 3);
//!
//! drop(sprite);
//! assert!(!weak.is_valid());
//! assert!(weak.get().is_null());
//! ```
//!
//! Only reference-counted types can be observed:
//!
//! ```compile_fail
//! let weak: weakptr::WeakPtr<String> = weakptr::WeakPtr::new();
//! ```
//!
//! Only the destruction path may invalidate a target's header:
//!
//! ```compile_fail
//! weakptr::RefCount::new().invalidate();
//! ```
//!
//! ```compile_fail
//! #[derive(weakptr::RefCounted)]
//! enum Shape {
//!     Circle,
//! }
//! ```
//!
//! Counting is not atomic: every type here is `!Send` and `!Sync`, and there
//! is no cycle detection, so strong cycles leak.

extern crate self as weakptr;

#[macro_use]
mod debug;

mod control_block;
mod ref_count;
mod strong;
mod weak_ptr;

pub use control_block::{BlockRef, ControlBlock};
pub use ref_count::{RefCount, RefCounted};
pub use strong::Strong;
pub use weak_ptr::WeakPtr;
pub use weakptr_macros::RefCounted;

#[cfg(test)]
mod tests {
    use crate::{RefCount, RefCounted, Strong, WeakPtr};

    #[derive(RefCounted)]
    struct Marked {
        spare: RefCount,
        #[ref_count]
        header: RefCount,
    }

    #[derive(RefCounted)]
    struct Wrapper<V> {
        value: V,
        header: RefCount,
    }

    #[derive(RefCounted)]
    struct Tuple(u8, crate::RefCount);

    #[test]
    fn test_derive_marked_field() {
        let marked = Strong::new(Marked {
            spare: RefCount::new(),
            header: RefCount::new(),
        });
        let _weak = marked.downgrade();
        assert_eq!(marked.header.control_block(), marked.control_block());
        assert_ne!(marked.spare.control_block(), marked.control_block());
    }

    #[test]
    fn test_derive_generic() {
        let wrapper = Strong::new(Wrapper {
            value: vec![1, 2, 3],
            header: RefCount::new(),
        });
        let weak: WeakPtr<Wrapper<Vec<i32>>> = wrapper.downgrade();
        assert_eq!(weak.value().value.len(), 3);
        drop(wrapper);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_derive_tuple_struct() {
        let tuple = Strong::new(Tuple(9, RefCount::new()));
        let weak = tuple.downgrade();
        assert_eq!(weak.value().0, 9);
        assert_eq!(tuple.weak_count(), 1);
    }
}
