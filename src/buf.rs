//! Chunk buffer owning the backing memory for one coded stripe.
//!
//! A [`LrcBuf`] holds a single contiguous allocation partitioned into `n`
//! equal chunk windows: data chunks in slots `[0, k)`, local parities in
//! `[k, k + L)` and global parities in `[k + L, n)`. Every chunk view is an
//! index-based sub-slice of that one region; there are no per-chunk
//! allocations.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::slice;

use crate::lrc::{Error, LrcParam};

/// Start alignment of the backing region and the stride of chunk windows
/// inside it. Chunk contents only use `chunk_size` bytes of each window; the
/// padding keeps every window start SIMD-friendly.
pub const ALIGN: usize = 16;

/// Round `size` up to the next multiple of [`ALIGN`].
pub(crate) fn align_16(size: usize) -> usize {
    size.div_ceil(ALIGN) * ALIGN
}

/// A 16-byte aligned heap region. `Vec<u8>` only guarantees byte alignment,
/// so the region is carved out of the raw allocator with an explicit layout.
struct AlignedRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedRegion {
    fn zeroed(size: usize) -> Result<Self, Error> {
        debug_assert!(size > 0);
        let layout = Layout::from_size_align(size, ALIGN)
            .map_err(|_| Error::invalid_arguments("backing region size overflows"))?;
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(Error::OutOfMemory(size))?;
        Ok(Self { ptr, layout })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedRegion {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// The region is a plain byte buffer behind a unique pointer.
unsafe impl Send for AlignedRegion {}
unsafe impl Sync for AlignedRegion {}

/// Backing buffer for the `n = k + L + m` chunks of one stripe.
///
/// Created from the [`LrcParam`] it will be coded with; the caller fills the
/// first `k` chunks with data, [`LrcParam::encode`](crate::lrc::LrcParam::encode)
/// fills the rest with parity.
pub struct LrcBuf {
    k: usize,
    n_local: usize,
    m: usize,
    chunk_size: usize,
    aligned_chunk_size: usize,
    region: AlignedRegion,
}

impl LrcBuf {
    /// Allocate a zeroed buffer sized for `param` with `chunk_size`-byte
    /// chunks.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArguments`] if `chunk_size` is zero.
    /// * [`Error::OutOfMemory`] if the backing allocation fails.
    pub fn new(param: &LrcParam, chunk_size: usize) -> Result<Self, Error> {
        if chunk_size == 0 {
            return Err(Error::invalid_arguments("chunk_size must be greater than 0"));
        }
        let aligned_chunk_size = align_16(chunk_size);
        let region = AlignedRegion::zeroed(param.n() * aligned_chunk_size)?;
        Ok(Self {
            k: param.k(),
            n_local: param.n_local(),
            m: param.m(),
            chunk_size,
            aligned_chunk_size,
            region,
        })
    }

    /// Number of chunks, `k + L + m`.
    pub fn n(&self) -> usize {
        self.k + self.n_local + self.m
    }

    /// Logical chunk length in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Window stride in the backing region, `chunk_size` rounded up to 16.
    pub fn aligned_chunk_size(&self) -> usize {
        self.aligned_chunk_size
    }

    pub(crate) fn k(&self) -> usize {
        self.k
    }

    pub(crate) fn n_local(&self) -> usize {
        self.n_local
    }

    pub(crate) fn m(&self) -> usize {
        self.m
    }

    /// Borrow chunk `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= n`.
    pub fn chunk(&self, idx: usize) -> &[u8] {
        assert!(idx < self.n(), "chunk index {idx} out of range");
        let start = idx * self.aligned_chunk_size;
        &self.region.as_slice()[start..start + self.chunk_size]
    }

    /// Mutably borrow chunk `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= n`.
    pub fn chunk_mut(&mut self, idx: usize) -> &mut [u8] {
        assert!(idx < self.n(), "chunk index {idx} out of range");
        let start = idx * self.aligned_chunk_size;
        &mut self.region.as_mut_slice()[start..start + self.chunk_size]
    }

    /// Disjoint mutable views of all `n` chunks, in chunk order. The encoder
    /// splits this at `k` into sources and parity destinations.
    pub(crate) fn chunks_mut(&mut self) -> Vec<&mut [u8]> {
        let chunk_size = self.chunk_size;
        self.region
            .as_mut_slice()
            .chunks_exact_mut(self.aligned_chunk_size)
            .map(|window| &mut window[..chunk_size])
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn align_16_rounds_up() {
        assert_eq!(align_16(1), 16);
        assert_eq!(align_16(16), 16);
        assert_eq!(align_16(17), 32);
        assert_eq!(align_16(4096), 4096);
    }

    #[test]
    fn chunks_are_disjoint_aligned_windows() {
        let param = LrcParam::new(&[2, 2], 2).unwrap();
        let mut buf = LrcBuf::new(&param, 20).unwrap();
        assert_eq!(buf.n(), 8);
        assert_eq!(buf.aligned_chunk_size(), 32);

        let base = buf.chunk(0).as_ptr() as usize;
        assert_eq!(base % ALIGN, 0);
        for idx in 0..buf.n() {
            let chunk = buf.chunk(idx);
            assert_eq!(chunk.len(), 20);
            assert_eq!(chunk.as_ptr() as usize, base + idx * 32);
        }

        buf.chunk_mut(3).fill(0xab);
        assert!(buf.chunk(2).iter().all(|&b| b == 0));
        assert!(buf.chunk(4).iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let param = LrcParam::new(&[2, 2], 2).unwrap();
        assert!(matches!(
            LrcBuf::new(&param, 0),
            Err(Error::InvalidArguments(_))
        ));
    }
}
