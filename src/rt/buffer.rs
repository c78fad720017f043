//! Linear device buffers.
//!
//! A `Buffer<T>` owns one device allocation and guards host access with a
//! two-state machine. While **unmapped** (the initial state) the queued
//! transfer operations are available; while **mapped** only direct host
//! access and `unmap` are. The device forbids overlapping a host mapping
//! with queued transfers against the same allocation, so the object rejects
//! the combination by construction instead of leaving it to caller
//! discipline.
//!
//! Buffers are deliberately not cloneable: a second releaser of the same
//! device allocation must be unrepresentable.

use crate::driver::memory::MemObject;
use crate::driver::queue::{CommandOp, HostPtr};
use crate::error::{Error, Result};
use crate::rt::MapAccess;
use crate::rt::context::Context;
use crate::rt::elem::Elem;
use crate::rt::event::Event;
use std::ops::{Index, IndexMut};
use std::ptr::NonNull;
use std::sync::Arc;

pub struct Buffer<T: Elem> {
    context: Context,
    mem: Arc<MemObject>,
    len: usize,
    /// Set only while mapped.
    host_ptr: Option<NonNull<T>>,
    last_event: Event,
}

unsafe impl<T: Elem> Send for Buffer<T> {}

impl<T: Elem> Buffer<T> {
    /// Allocates a device buffer of `len` elements.
    ///
    /// # Errors
    /// Driver error if the allocation fails (a zero length is rejected by
    /// the device).
    pub fn new(context: &Context, len: usize) -> Result<Self> {
        let mem = MemObject::buffer(len * size_of::<T>())?;
        Ok(Self {
            context: context.clone(),
            mem: Arc::new(mem),
            len,
            host_ptr: None,
            last_event: Event::new(),
        })
    }

    /// Element count fixed at construction.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.host_ptr.is_some()
    }

    /// Completion handle of the most recent operation on this buffer.
    #[must_use]
    pub fn last_event(&self) -> Event {
        self.last_event.clone()
    }

    pub(crate) fn mem(&self) -> &Arc<MemObject> {
        &self.mem
    }

    fn ensure_mapped(&self) -> Result<()> {
        if self.host_ptr.is_some() {
            Ok(())
        } else {
            Err(Error::State("buffer is not mapped"))
        }
    }

    fn ensure_unmapped(&self) -> Result<()> {
        if self.host_ptr.is_none() {
            Ok(())
        } else {
            Err(Error::State("buffer is mapped"))
        }
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            Err(Error::Bounds {
                offset,
                len,
                size: self.len,
            })
        } else {
            Ok(())
        }
    }

    /// Full transfers must cover the object exactly; a shorter slice would
    /// silently move only part of the contents.
    fn check_exact(&self, len: usize) -> Result<()> {
        if len == self.len {
            Ok(())
        } else {
            Err(Error::Bounds {
                offset: 0,
                len,
                size: self.len,
            })
        }
    }

    fn mapped_ptr(&self) -> Result<NonNull<T>> {
        self.host_ptr.ok_or(Error::State("buffer is not mapped"))
    }

    fn finish(&mut self, event: Event) -> Event {
        self.last_event = event.clone();
        event
    }

    /// Enqueues a device-to-host mapping and flips the state to mapped.
    ///
    /// The host pointer is stored immediately, but indexing is only safe
    /// once the returned handle has been waited on: earlier operations
    /// against this buffer may still be in flight unless they are in `deps`.
    ///
    /// # Errors
    /// State error if already mapped; driver error if the enqueue fails (in
    /// which case the state is unchanged).
    pub fn map(&mut self, access: MapAccess, deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        log::trace!("map buffer ({access:?})");
        let event = self.context.enqueue(
            CommandOp::Map {
                mem: Arc::clone(&self.mem),
            },
            deps,
        )?;
        self.host_ptr = NonNull::new(self.mem.as_ptr().cast());
        Ok(self.finish(event))
    }

    /// Enqueues release of the host mapping and flips the state to
    /// unmapped.
    ///
    /// The host pointer is invalidated as soon as this returns, regardless
    /// of when the device-side operation completes; callers must not keep
    /// using previously obtained references.
    ///
    /// # Errors
    /// State error if not mapped; driver error if the enqueue fails (state
    /// unchanged).
    pub fn unmap(&mut self, deps: &[&Event]) -> Result<Event> {
        self.ensure_mapped()?;
        let event = self.context.enqueue(
            CommandOp::Unmap {
                mem: Arc::clone(&self.mem),
            },
            deps,
        )?;
        self.host_ptr = None;
        Ok(self.finish(event))
    }

    /// Enqueues a host-to-device write of the whole buffer. The source is
    /// staged at enqueue time, so it may be dropped as soon as this
    /// returns.
    ///
    /// # Errors
    /// State error if mapped; bounds error if `src.len()` differs from the
    /// element count.
    pub fn write(&mut self, src: &[T], deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        self.check_exact(src.len())?;
        self.write_range(0, src, deps)
    }

    /// Ranged variant of [`Self::write`], starting at element `offset`.
    ///
    /// # Errors
    /// Bounds error when `offset + src.len()` exceeds the element count; no
    /// device-side enqueue happens in that case.
    pub fn write_range(&mut self, offset: usize, src: &[T], deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        self.check_range(offset, src.len())?;
        let event = self.context.enqueue(
            CommandOp::Write {
                mem: Arc::clone(&self.mem),
                elem_size: size_of::<T>(),
                offset,
                src: elem_bytes(src).to_vec(),
            },
            deps,
        )?;
        Ok(self.finish(event))
    }

    /// Enqueues a device-to-host read of the whole buffer into `dest`.
    ///
    /// # Errors
    /// State error if mapped; bounds error if `dest.len()` differs from the
    /// element count.
    ///
    /// # Safety
    /// The read lands asynchronously: `dest` must stay valid and unaccessed
    /// until the returned handle has been waited on.
    pub unsafe fn read(&mut self, dest: &mut [T], deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        self.check_exact(dest.len())?;
        unsafe { self.read_range(0, dest, deps) }
    }

    /// Ranged variant of [`Self::read`], starting at element `offset`.
    ///
    /// # Errors
    /// Bounds error when `offset + dest.len()` exceeds the element count; no
    /// device-side enqueue happens in that case.
    ///
    /// # Safety
    /// See [`Self::read`].
    pub unsafe fn read_range(
        &mut self,
        offset: usize,
        dest: &mut [T],
        deps: &[&Event],
    ) -> Result<Event> {
        self.ensure_unmapped()?;
        self.check_range(offset, dest.len())?;
        let event = self.context.enqueue(
            CommandOp::Read {
                mem: Arc::clone(&self.mem),
                elem_size: size_of::<T>(),
                offset,
                len: dest.len(),
                dst: HostPtr(dest.as_mut_ptr().cast()),
            },
            deps,
        )?;
        Ok(self.finish(event))
    }

    /// Host view of the mapped contents.
    ///
    /// # Errors
    /// State error if not mapped.
    pub fn as_slice(&self) -> Result<&[T]> {
        let ptr = self.mapped_ptr()?;
        Ok(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) })
    }

    /// Mutable host view of the mapped contents.
    ///
    /// # Errors
    /// State error if not mapped.
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        let ptr = self.mapped_ptr()?;
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.len) })
    }

    /// Iterates the mapped contents.
    ///
    /// # Errors
    /// State error if not mapped.
    pub fn iter(&self) -> Result<std::slice::Iter<'_, T>> {
        Ok(self.as_slice()?.iter())
    }
}

/// Indexed access while mapped.
///
/// # Panics
/// Panics if the buffer is not mapped; use [`Buffer::as_slice`] for a
/// fallible view.
impl<T: Elem> Index<usize> for Buffer<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.as_slice() {
            Ok(slice) => &slice[index],
            Err(_) => panic!("buffer is not mapped"),
        }
    }
}

impl<T: Elem> IndexMut<usize> for Buffer<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        match self.as_mut_slice() {
            Ok(slice) => &mut slice[index],
            Err(_) => panic!("buffer is not mapped"),
        }
    }
}

pub(crate) fn elem_bytes<T: Elem>(slice: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(slice.as_ptr().cast(), std::mem::size_of_val(slice)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverCode;
    use crate::driver::device::DeviceClass;

    fn ctx() -> Context {
        Context::new(DeviceClass::All, 0, 1).unwrap()
    }

    #[test]
    fn starts_unmapped_and_transitions() {
        let ctx = ctx();
        let mut buf = Buffer::<f32>::new(&ctx, 16).unwrap();
        assert!(!buf.is_mapped());

        let mapped = buf.map(MapAccess::ReadWrite, &[]).unwrap();
        mapped.wait().unwrap();
        assert!(buf.is_mapped());
        assert!(matches!(
            buf.map(MapAccess::ReadWrite, &[]),
            Err(Error::State(_))
        ));

        buf.unmap(&[]).unwrap().wait().unwrap();
        assert!(!buf.is_mapped());
        assert!(matches!(buf.unmap(&[]), Err(Error::State(_))));
    }

    #[test]
    fn host_access_requires_mapped() {
        let ctx = ctx();
        let mut buf = Buffer::<u32>::new(&ctx, 8).unwrap();
        assert!(matches!(buf.as_slice(), Err(Error::State(_))));
        assert!(matches!(buf.as_mut_slice(), Err(Error::State(_))));

        buf.map(MapAccess::ReadWrite, &[]).unwrap().wait().unwrap();
        buf.as_mut_slice().unwrap().fill(7);
        assert_eq!(buf[3], 7);
    }

    #[test]
    fn transfers_require_unmapped() {
        let ctx = ctx();
        let mut buf = Buffer::<u32>::new(&ctx, 4).unwrap();
        buf.map(MapAccess::ReadWrite, &[]).unwrap().wait().unwrap();

        let data = [1u32; 4];
        assert!(matches!(buf.write(&data, &[]), Err(Error::State(_))));
        let mut out = [0u32; 4];
        assert!(matches!(
            unsafe { buf.read(&mut out, &[]) },
            Err(Error::State(_))
        ));
    }

    #[test]
    fn write_read_roundtrip() {
        let ctx = ctx();
        let mut buf = Buffer::<i32>::new(&ctx, 64).unwrap();
        let src: Vec<i32> = (0..64).collect();
        let wrote = buf.write(&src, &[]).unwrap();

        let mut dest = vec![0i32; 64];
        let read = unsafe { buf.read(&mut dest, &[&wrote]) }.unwrap();
        read.wait().unwrap();
        assert_eq!(dest, src);
    }

    #[test]
    fn ranged_roundtrip_and_bounds() {
        let ctx = ctx();
        let mut buf = Buffer::<u16>::new(&ctx, 10).unwrap();
        let src = [5u16, 6, 7];
        let wrote = buf.write_range(4, &src, &[]).unwrap();

        let mut dest = [0u16; 3];
        unsafe { buf.read_range(4, &mut dest, &[&wrote]) }
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(dest, src);

        // Out of range: bounds error, and no enqueue — the most recent
        // event is still the settled read from above.
        let err = buf.write_range(8, &src, &[]).unwrap_err();
        assert!(matches!(err, Error::Bounds { offset: 8, len: 3, size: 10 }));
        assert_eq!(
            buf.last_event().status().unwrap(),
            crate::driver::event::CommandStatus::Complete
        );
    }

    #[test]
    fn full_transfer_length_must_match() {
        let ctx = ctx();
        let mut buf = Buffer::<u8>::new(&ctx, 8).unwrap();

        // Shorter than the buffer: a partial transfer must not slip through
        // as a full write.
        let wrote = buf.write(&[7u8; 4], &[]);
        assert!(matches!(wrote, Err(Error::Bounds { len: 4, size: 8, .. })));
        assert!(matches!(
            buf.write(&[0u8; 12], &[]),
            Err(Error::Bounds { .. })
        ));

        let mut short = [0u8; 4];
        assert!(matches!(
            unsafe { buf.read(&mut short, &[]) },
            Err(Error::Bounds { len: 4, size: 8, .. })
        ));

        // Nothing was enqueued, and the exact length still goes through.
        assert!(!buf.last_event().is_assigned());
        buf.write(&[1u8; 8], &[]).unwrap().wait().unwrap();
    }

    #[test]
    fn zero_length_allocation_rejected() {
        let ctx = ctx();
        match Buffer::<f32>::new(&ctx, 0) {
            Err(Error::Driver(code)) => assert_eq!(code, DriverCode::InvalidBufferSize),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    #[should_panic(expected = "buffer is not mapped")]
    fn indexing_unmapped_panics() {
        let ctx = ctx();
        let buf = Buffer::<f32>::new(&ctx, 4).unwrap();
        let _ = buf[0];
    }
}
