//! Aligned, fixed-capacity byte regions used as pipeline slots

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use twinbuf_types::{Alignment, BufferSize, Error, Result};

/// A zero-initialised heap region whose start address honours a given alignment.
///
/// Direct I/O on most platforms needs the user buffer aligned to the logical
/// block size, which `Vec<u8>` cannot guarantee.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: AlignedBuffer uniquely owns its allocation, like Box<[u8]>
unsafe impl Send for AlignedBuffer {}
// SAFETY: shared access only hands out `&[u8]`
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `capacity` zeroed bytes aligned to `alignment`
    pub fn new(capacity: BufferSize, alignment: Alignment) -> Result<Self> {
        let layout = Layout::from_size_align(capacity.get(), alignment.get()).map_err(|e| {
            Error::config(format!(
                "Invalid buffer layout {} bytes / {} alignment: {}",
                capacity.get(),
                alignment.get(),
                e
            ))
        })?;

        // SAFETY: BufferSize guarantees a non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            Error::system(
                "allocate slot buffer",
                &std::io::Error::from(std::io::ErrorKind::OutOfMemory),
            )
        })?;

        Ok(Self { ptr, layout })
    }

    /// Capacity in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false: a buffer has at least one byte
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Alignment of the start address
    #[inline]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Immutable view of the whole region
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialised bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Mutable view of the whole region
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for layout.size() bytes and uniquely borrowed
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .field("alignment", &self.alignment())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1)]
    #[case(4096, 4096)]
    #[case(5000, 512)]
    #[case(64 * 1024, 4096)]
    fn test_alignment_and_zeroing(#[case] size: usize, #[case] align: usize) {
        let buffer =
            AlignedBuffer::new(BufferSize::new(size).unwrap(), Alignment::new(align).unwrap())
                .unwrap();

        assert_eq!(buffer.len(), size);
        assert_eq!(buffer.as_slice().as_ptr() as usize % align, 0);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mutation_is_visible() {
        let mut buffer = AlignedBuffer::new(BufferSize::new(16).unwrap(), Alignment::default()).unwrap();
        buffer.as_mut_slice()[3] = 0xAB;
        assert_eq!(buffer.as_slice()[3], 0xAB);
    }
}
