//! Scratch buffer for `recv`/`send`, modeled on the teacher's `Buffer` type
//! but without its pool-release machinery: this crate's recv/send paths are
//! short-lived request/response pairs, not a steady-state allocator workload.

use std::cmp;
use std::cmp::max;
use std::fmt::Debug;
use std::io::{Read, Write};

use crate::config::default_buf_len;

/// A heap-allocated byte buffer with a write cursor (`written`) and a read
/// cursor (`offset`).
///
/// ```text
/// +---+---+---+---+---+---+---+---+
/// | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 |
/// +---+---+---+---+---+---+---+---+
/// | X | X | X | X | X |   |   |   |
/// +---+---+---+---+---+---+---+---+
///     ^               ^           ^
///   offset         written       cap
/// ```
pub struct Buffer {
    slice: Box<[u8]>,
    written: usize,
    offset: usize,
}

impl Buffer {
    /// # Panics
    /// If `size` is 0.
    #[inline(always)]
    pub fn new(size: usize) -> Self {
        if size == 0 {
            panic!("cannot create Buffer with size 0");
        }
        let mut v = Vec::with_capacity(size);
        unsafe { v.set_len(size) };
        Buffer {
            slice: v.into_boxed_slice(),
            written: 0,
            offset: 0,
        }
    }

    /// A buffer sized from the current configuration's default buffer length.
    pub fn with_default_len() -> Self {
        Self::new(default_buf_len())
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.written - self.offset
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn set_written(&mut self, written: usize) {
        self.written = written;
    }

    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline(always)]
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    #[inline(always)]
    pub fn real_cap(&self) -> usize {
        self.slice.len()
    }

    #[inline(always)]
    pub fn cap(&self) -> usize {
        self.real_cap() - self.offset
    }

    fn resize(&mut self, new_size: usize) {
        if new_size < self.written {
            self.written = new_size;
        }
        let mut new_buf = Buffer::new(new_size);
        new_buf.slice[..self.written].copy_from_slice(&self.slice[..self.written]);
        new_buf.written = self.written;
        *self = new_buf;
    }

    /// Appends `buf`, growing the backing allocation if needed.
    pub fn append(&mut self, buf: &[u8]) {
        let len = buf.len();
        if len > self.slice.len() - self.written {
            self.resize(max(self.written + len, max(self.real_cap() * 2, 1)));
        }
        self.slice[self.written..self.written + len].copy_from_slice(buf);
        self.written += len;
    }

    pub fn as_ptr(&self) -> *const u8 {
        unsafe { self.slice.as_ptr().add(self.offset) }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        unsafe { self.slice.as_mut_ptr().add(self.offset) }
    }

    /// The whole backing slice, for a reader that writes raw bytes in
    /// before `set_written` records how many landed.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.slice
    }

    pub fn clear(&mut self) {
        self.written = 0;
        self.offset = 0;
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = cmp::min(buf.len(), self.written - self.offset);
        buf[..len].copy_from_slice(&self.slice[self.offset..self.offset + len]);
        self.offset += len;
        Ok(len)
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.slice[self.offset..self.written]
    }
}

impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.slice[self.offset..self.written]
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", AsRef::<[u8]>::as_ref(self))
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::with_default_len()
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<Buffer>();
}
