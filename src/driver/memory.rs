//! Raw device memory allocations.
//!
//! A [`MemObject`] is one zeroed allocation owned by the driver. Both queue
//! workers (during transfer and launch commands) and the host (while the
//! owning object is mapped) access it through the raw pointer; mutual
//! exclusion between those two paths is enforced above by the runtime
//! layer's mapped/unmapped state machine, not here.

use crate::driver::DriverCode;
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Image rows are padded to this many bytes, so a mapped image's row pitch
/// is generally wider than its width.
const ROW_PITCH_ALIGN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    Buffer,
    Image2d { width: usize, height: usize },
    Image3d {
        width: usize,
        height: usize,
        depth: usize,
    },
}

#[derive(Debug)]
pub struct MemObject {
    ptr: NonNull<u8>,
    size: usize,
    kind: MemKind,
    row_pitch: usize,
    slice_pitch: usize,
}

// The raw pointer is only dereferenced by whoever currently owns access per
// the state machine; the allocation itself is freely sendable.
unsafe impl Send for MemObject {}
unsafe impl Sync for MemObject {}

impl MemObject {
    fn alloc(size: usize, kind: MemKind, row_pitch: usize, slice_pitch: usize) -> Result<Self, DriverCode> {
        let layout = Layout::from_size_align(size, ROW_PITCH_ALIGN)
            .map_err(|_| DriverCode::MemObjectAllocationFailure)?;
        // Device memory has no defined initial contents on real hardware;
        // the reference device zeroes it so launches are deterministic.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(DriverCode::MemObjectAllocationFailure)?;
        Ok(Self {
            ptr,
            size,
            kind,
            row_pitch,
            slice_pitch,
        })
    }

    /// Allocates a linear buffer of `len_bytes`.
    pub fn buffer(len_bytes: usize) -> Result<Self, DriverCode> {
        if len_bytes == 0 {
            return Err(DriverCode::InvalidBufferSize);
        }
        Self::alloc(len_bytes, MemKind::Buffer, len_bytes, len_bytes)
    }

    /// Allocates a 2D image of `width`×`height` pixels of `pixel_size` bytes.
    pub fn image2d(width: usize, height: usize, pixel_size: usize) -> Result<Self, DriverCode> {
        if width == 0 || height == 0 {
            return Err(DriverCode::InvalidImageSize);
        }
        let row_pitch = (width * pixel_size).next_multiple_of(ROW_PITCH_ALIGN);
        let slice_pitch = row_pitch * height;
        Self::alloc(
            slice_pitch,
            MemKind::Image2d { width, height },
            row_pitch,
            slice_pitch,
        )
    }

    /// Allocates a 3D image of `width`×`height`×`depth` pixels.
    pub fn image3d(
        width: usize,
        height: usize,
        depth: usize,
        pixel_size: usize,
    ) -> Result<Self, DriverCode> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(DriverCode::InvalidImageSize);
        }
        let row_pitch = (width * pixel_size).next_multiple_of(ROW_PITCH_ALIGN);
        let slice_pitch = row_pitch * height;
        Self::alloc(
            slice_pitch * depth,
            MemKind::Image3d {
                width,
                height,
                depth,
            },
            row_pitch,
            slice_pitch,
        )
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Allocation size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn kind(&self) -> MemKind {
        self.kind
    }

    /// Bytes between the start of consecutive rows (equals `size` for
    /// buffers).
    #[must_use]
    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// Bytes between the start of consecutive slices.
    #[must_use]
    pub fn slice_pitch(&self) -> usize {
        self.slice_pitch
    }

    /// Copies `src` into the allocation at `offset`.
    ///
    /// # Safety
    /// The caller must hold exclusive access to `offset..offset + src.len()`
    /// (a queue worker executing an ordered command, per the state machine).
    pub unsafe fn write_bytes(&self, offset: usize, src: &[u8]) {
        debug_assert!(offset + src.len() <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len());
        }
    }

    /// Copies `len` bytes from the allocation at `offset` to `dst`.
    ///
    /// # Safety
    /// Same access requirement as [`Self::write_bytes`]; `dst` must be valid
    /// for `len` bytes.
    pub unsafe fn read_bytes(&self, offset: usize, dst: *mut u8, len: usize) {
        debug_assert!(offset + len <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst, len);
        }
    }

    /// Walks the contiguous device-side runs covering the packed element
    /// range `offset..offset + len`. For buffers this is one run; for images
    /// the packed index is row-major over width×height(×depth) and runs stop
    /// at row boundaries because of the row pitch.
    fn packed_runs(
        &self,
        elem_size: usize,
        offset: usize,
        len: usize,
        mut f: impl FnMut(usize, usize, usize),
    ) {
        let width = match self.kind {
            MemKind::Buffer => {
                f(offset * elem_size, 0, len * elem_size);
                return;
            }
            MemKind::Image2d { width, .. } | MemKind::Image3d { width, .. } => width,
        };
        let per_slice = match self.kind {
            MemKind::Image2d { height, .. } | MemKind::Image3d { height, .. } => width * height,
            MemKind::Buffer => unreachable!(),
        };
        let mut elem = offset;
        let mut host = 0;
        let mut remaining = len;
        while remaining > 0 {
            let (slice, in_slice) = (elem / per_slice, elem % per_slice);
            let (row, col) = (in_slice / width, in_slice % width);
            let run = (width - col).min(remaining);
            let dev = slice * self.slice_pitch + row * self.row_pitch + col * elem_size;
            f(dev, host, run * elem_size);
            elem += run;
            host += run * elem_size;
            remaining -= run;
        }
    }

    /// Packed-range read: `len` elements starting at packed element `offset`
    /// land contiguously in `dst`, skipping any row padding.
    ///
    /// # Safety
    /// Same access requirement as [`Self::write_bytes`]; `dst` must be valid
    /// for `len * elem_size` bytes.
    pub unsafe fn read_packed(&self, elem_size: usize, offset: usize, len: usize, dst: *mut u8) {
        self.packed_runs(elem_size, offset, len, |dev, host, bytes| unsafe {
            self.read_bytes(dev, dst.add(host), bytes);
        });
    }

    /// Packed-range write, the inverse of [`Self::read_packed`].
    ///
    /// # Safety
    /// Same access requirement as [`Self::write_bytes`].
    pub unsafe fn write_packed(&self, elem_size: usize, offset: usize, src: &[u8]) {
        self.packed_runs(elem_size, offset, src.len() / elem_size, |dev, host, bytes| unsafe {
            self.write_bytes(dev, &src[host..host + bytes]);
        });
    }
}

impl Drop for MemObject {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.size, ROW_PITCH_ALIGN) {
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_zeroed_and_tight() {
        let mem = MemObject::buffer(128).unwrap();
        assert_eq!(mem.size(), 128);
        assert_eq!(mem.row_pitch(), 128);
        let mut out = [1u8; 128];
        unsafe { mem.read_bytes(0, out.as_mut_ptr(), 128) };
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn image_rows_are_padded() {
        // 10 pixels * 4 bytes = 40 bytes, padded up to 64.
        let mem = MemObject::image2d(10, 3, 4).unwrap();
        assert_eq!(mem.row_pitch(), 64);
        assert_eq!(mem.slice_pitch(), 64 * 3);
        assert_eq!(mem.size(), 64 * 3);
    }

    #[test]
    fn zero_extent_rejected() {
        assert_eq!(MemObject::buffer(0).unwrap_err(), DriverCode::InvalidBufferSize);
        assert_eq!(
            MemObject::image2d(0, 4, 4).unwrap_err(),
            DriverCode::InvalidImageSize
        );
        assert_eq!(
            MemObject::image3d(4, 4, 0, 4).unwrap_err(),
            DriverCode::InvalidImageSize
        );
    }

    #[test]
    fn write_read_roundtrip() {
        let mem = MemObject::buffer(16).unwrap();
        let src: Vec<u8> = (0..16).collect();
        unsafe { mem.write_bytes(0, &src) };
        let mut dst = [0u8; 8];
        unsafe { mem.read_bytes(4, dst.as_mut_ptr(), 8) };
        assert_eq!(&dst, &src[4..12]);
    }

    #[test]
    fn packed_transfer_skips_row_padding() {
        // 6 pixels per row, 4 bytes each: 24-byte rows padded to 64.
        let mem = MemObject::image2d(6, 2, 4).unwrap();
        let src: Vec<u8> = (0..48).collect();
        unsafe { mem.write_packed(4, 0, &src) };

        // Device-side: second row starts at the pitch, not at byte 24.
        let mut raw = vec![0u8; mem.size()];
        unsafe { mem.read_bytes(0, raw.as_mut_ptr(), mem.size()) };
        assert_eq!(&raw[..24], &src[..24]);
        assert!(raw[24..64].iter().all(|&b| b == 0));
        assert_eq!(&raw[64..88], &src[24..]);

        // Packed read restores the tight layout, and ranges may straddle
        // row boundaries.
        let mut out = vec![0u8; 48];
        unsafe { mem.read_packed(4, 0, 12, out.as_mut_ptr()) };
        assert_eq!(out, src);

        let mut mid = vec![0u8; 16];
        unsafe { mem.read_packed(4, 4, 4, mid.as_mut_ptr()) };
        assert_eq!(mid, &src[16..32]);
    }
}
