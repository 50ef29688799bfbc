//! A raw-pointer wrapper used to pin pooled per-operation state ([`crate::state::SuspendSlot`])
//! at a stable address while a coroutine is suspended on it.

use std::alloc::{alloc, dealloc, Layout};
use std::fmt::Debug;
use std::ptr;

pub struct Ptr<T> {
    ptr: *mut T,
}

impl<T> Ptr<T> {
    /// Allocates `value` on the heap and returns a pointer to it.
    #[inline(always)]
    pub fn new(value: T) -> Self {
        let ptr = unsafe { alloc(Layout::new::<T>()) } as *mut T;
        unsafe { ptr.write(value) };
        Self { ptr }
    }

    #[inline(always)]
    pub fn null() -> Self {
        Self { ptr: ptr::null_mut() }
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }

    /// # Panics
    /// If the pointer is null.
    #[inline(always)]
    pub unsafe fn as_ref<'a>(self) -> &'a T {
        if self.ptr.is_null() {
            panic!("ptr is null");
        }
        unsafe { &*self.ptr }
    }

    /// # Panics
    /// If the pointer is null.
    #[inline(always)]
    pub unsafe fn as_mut<'a>(self) -> &'a mut T {
        if self.ptr.is_null() {
            panic!("ptr is null");
        }
        unsafe { &mut *self.ptr }
    }

    #[inline(always)]
    pub fn as_u64(&self) -> u64 {
        self.ptr as u64
    }

    /// Drops the value and frees the allocation.
    #[inline(always)]
    pub unsafe fn drop_in_place(self) {
        if self.ptr.is_null() {
            return;
        }
        unsafe {
            if std::mem::needs_drop::<T>() {
                drop(self.read());
            }
            dealloc(self.ptr as *mut u8, Layout::new::<T>());
        }
    }

    /// Frees the allocation without running `T`'s destructor.
    #[inline(always)]
    pub unsafe fn deallocate(self) {
        if self.ptr.is_null() {
            return;
        }
        unsafe { dealloc(self.ptr as *mut u8, Layout::new::<T>()) };
    }

    /// # Panics
    /// If the pointer is null.
    #[inline(always)]
    pub unsafe fn read(self) -> T {
        if self.ptr.is_null() {
            panic!("ptr is null");
        }
        unsafe { ptr::read(self.ptr) }
    }

    /// # Panics
    /// If the pointer is null.
    #[inline(always)]
    pub unsafe fn write(self, value: T) {
        if self.ptr.is_null() {
            panic!("ptr is null");
        }
        unsafe { ptr::write(self.ptr, value) }
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        Self { ptr: self.ptr }
    }
}

impl<T> Copy for Ptr<T> {}

unsafe impl<T: Send> Send for Ptr<T> {}
unsafe impl<T: Sync> Sync for Ptr<T> {}

impl<T> From<u64> for Ptr<T> {
    fn from(ptr: u64) -> Self {
        Self { ptr: ptr as *mut T }
    }
}

impl<T> From<&mut T> for Ptr<T> {
    fn from(ptr: &mut T) -> Self {
        Self { ptr }
    }
}

impl<T: Debug> Debug for Ptr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        unsafe { write!(f, "{:?}", self.as_ref()) }
    }
}

#[cfg(test)]
mod tests {
    use super::Ptr;

    struct MustDrop {
        #[allow(dead_code)]
        counter: u32,
    }

    impl Drop for MustDrop {
        fn drop(&mut self) {
            panic!("dropped");
        }
    }

    #[test]
    fn new_and_read() {
        let ptr = Ptr::new(10);
        unsafe {
            assert_eq!(*ptr.as_ref(), 10);
            ptr.drop_in_place();
        }
    }

    #[test]
    fn null_is_null() {
        let ptr: Ptr<i32> = Ptr::null();
        assert!(ptr.is_null());
    }

    #[test]
    #[should_panic(expected = "ptr is null")]
    fn as_ref_null_panics() {
        let ptr: Ptr<i32> = Ptr::null();
        unsafe {
            let _ = ptr.as_ref();
        }
    }

    #[test]
    fn as_mut_writes_through() {
        let ptr = Ptr::new(40);
        unsafe {
            *ptr.as_mut() = 50;
            assert_eq!(*ptr.as_ref(), 50);
            ptr.drop_in_place();
        }
    }

    #[test]
    fn as_u64_round_trips() {
        let ptr = Ptr::new(60);
        let raw = ptr.as_u64();
        let back: Ptr<i32> = Ptr::from(raw);
        unsafe {
            assert_eq!(*back.as_ref(), 60);
            ptr.drop_in_place();
        }
    }

    #[test]
    #[should_panic(expected = "dropped")]
    fn drop_in_place_runs_destructor() {
        let ptr = Ptr::new(MustDrop { counter: 5 });
        unsafe {
            ptr.drop_in_place();
        }
    }
}
