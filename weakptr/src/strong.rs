use std::{fmt, marker::PhantomData, mem, ops::Deref, ptr::NonNull};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{RefCounted, WeakPtr};

/// Strong is a thin owning pointer to a reference-counted target.
///
/// Cloning a Strong retains the target; dropping one releases it, and the last
/// release destroys the target after invalidating its weak references.
pub struct Strong<T: RefCounted> {
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

impl<T: RefCounted> Strong<T> {
    /// Boxes `value` and adopts the reference its fresh header starts with.
    pub fn new(value: T) -> Self {
        assert_eq!(
            T::strong_count(&value),
            1,
            "Strong::new requires a target with a fresh header"
        );
        Self {
            ptr: NonNull::from(Box::leak(Box::new(value))),
            _marker: PhantomData,
        }
    }

    pub fn strong_count(&self) -> usize {
        T::strong_count(self)
    }

    pub fn weak_count(&self) -> usize {
        unsafe { T::control_block(self).weak_count() }
    }

    pub fn downgrade(&self) -> WeakPtr<T> {
        WeakPtr::from(self)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Gives up this handle without releasing its strong reference.
    pub fn into_raw(self) -> *const T {
        let ptr = self.ptr;
        mem::forget(self);
        ptr.as_ptr()
    }

    /// # Safety
    ///
    /// `ptr` must come from [`into_raw`](Self::into_raw), or otherwise carry a
    /// strong reference the new handle takes over.
    pub unsafe fn from_raw(ptr: *const T) -> Self {
        match NonNull::new(ptr.cast_mut()) {
            Some(ptr) => Self {
                ptr,
                _marker: PhantomData,
            },
            None => panic!("Strong::from_raw called with a null pointer"),
        }
    }
}

impl<T: RefCounted> Clone for Strong<T> {
    fn clone(&self) -> Self {
        T::retain(self);
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: RefCounted> Drop for Strong<T> {
    fn drop(&mut self) {
        unsafe { T::release(self.ptr) };
    }
}

impl<T: RefCounted> Deref for Strong<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: RefCounted + fmt::Debug> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: RefCounted + fmt::Display> fmt::Display for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: RefCounted + Serialize> Serialize for Strong<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (**self).serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Strong<T>
where
    T: RefCounted + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Strong::new)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fmt;
    use std::rc::Rc;

    use serde::{Deserialize, Serialize};

    use super::Strong;
    use crate::control_block::live_blocks;
    use crate::{RefCount, RefCounted};

    #[derive(RefCounted)]
    struct Counted {
        header: RefCount,
        drops: Rc<Cell<usize>>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[derive(RefCounted, Serialize, Deserialize, Debug)]
    struct Label {
        #[serde(skip)]
        header: RefCount,
        text: String,
    }

    impl fmt::Display for Label {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "label {}", self.text)
        }
    }

    fn label(text: &str) -> Strong<Label> {
        Strong::new(Label {
            header: RefCount::new(),
            text: text.to_string(),
        })
    }

    #[test]
    fn test_clone_and_drop() {
        let drops = Rc::new(Cell::new(0));
        let strong1 = Strong::new(Counted {
            header: RefCount::new(),
            drops: drops.clone(),
        });
        assert_eq!(strong1.strong_count(), 1);

        let strong2 = strong1.clone();
        assert_eq!(strong1.strong_count(), 2);
        assert!(strong1.ptr_eq(&strong2));

        drop(strong2);
        assert_eq!(strong1.strong_count(), 1);
        assert_eq!(drops.get(), 0);

        drop(strong1);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_downgrade() {
        let before = live_blocks::count();
        let strong = label("a");
        let weak = strong.downgrade();
        assert_eq!(strong.weak_count(), 1);
        assert_eq!(strong.strong_count(), 1);
        assert!(weak == strong);

        drop(strong);
        assert!(!weak.is_valid());
        drop(weak);
        assert_eq!(live_blocks::count(), before);
    }

    #[test]
    fn test_raw_round_trip() {
        let strong = label("raw");
        let raw = strong.into_raw();
        unsafe {
            assert_eq!((*raw).strong_count(), 1);
            let strong = Strong::from_raw(raw);
            assert_eq!(strong.text, "raw");
        }
    }

    #[test]
    #[should_panic(expected = "fresh header")]
    fn test_new_requires_fresh_header() {
        let header = RefCount::new();
        header.retain();
        Strong::new(Label {
            header,
            text: String::new(),
        });
    }

    #[test]
    fn test_formatting() {
        let strong = label("hello");
        assert_eq!(format!("{}", strong), "label hello");
        assert!(format!("{:?}", strong).contains("hello"));
    }

    #[test]
    fn test_serde() {
        let strong = label("serialized");
        let json = serde_json::to_string(&strong).unwrap();
        assert_eq!(json, r#"{"text":"serialized"}"#);

        let back: Strong<Label> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text, "serialized");
        assert_eq!(back.strong_count(), 1);
        assert!(!back.ptr_eq(&strong));
    }
}
