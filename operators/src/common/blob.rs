use std::{
    alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout},
    ops::{Deref, DerefMut},
    ptr::{copy_nonoverlapping, NonNull},
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 按 `usize` 对齐的主存字节块，创建时清零。
pub struct Blob {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    pub fn new(size: usize) -> Self {
        if size == 0 {
            return Self {
                ptr: NonNull::<usize>::dangling().cast(),
                len: 0,
            };
        }
        let layout = layout(size);
        let Some(ptr) = NonNull::new(unsafe { alloc_zeroed(layout) }) else {
            handle_alloc_error(layout)
        };
        Self { ptr, len: size }
    }
}

impl Clone for Blob {
    fn clone(&self) -> Self {
        let ans = Self::new(self.len);
        unsafe { copy_nonoverlapping(self.ptr.as_ptr(), ans.ptr.as_ptr(), self.len) };
        ans
    }
}

impl Drop for Blob {
    #[inline]
    fn drop(&mut self) {
        let &mut Blob { ptr, len } = self;
        if len > 0 {
            unsafe { dealloc(ptr.as_ptr(), layout(len)) }
        }
    }
}

#[inline(always)]
const fn layout(size: usize) -> Layout {
    unsafe { Layout::from_size_align_unchecked(size, align_of::<usize>()) }
}

impl Deref for Blob {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Blob {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
