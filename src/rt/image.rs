//! 2D and 3D device images.
//!
//! Same ownership and state machine as [`crate::Buffer`], with extents fixed
//! at construction and the device-side channel layout chosen at compile time
//! by the element type (see [`crate::rt::elem`]). While mapped, host access
//! goes through the device-reported row (and slice) pitch, which the map
//! operation converts from bytes to elements; the pitch is generally wider
//! than the width.
//!
//! Transfer operations address elements in *packed* row-major order over
//! width×height(×depth); the device strips or reinserts row padding.

use crate::driver::memory::MemObject;
use crate::driver::queue::{CommandOp, HostPtr};
use crate::error::{Error, Result};
use crate::rt::MapAccess;
use crate::rt::buffer::elem_bytes;
use crate::rt::context::Context;
use crate::rt::elem::Elem;
use crate::rt::event::Event;
use std::ops::{Index, IndexMut};
use std::ptr::NonNull;
use std::sync::Arc;

pub struct Image2D<T: Elem> {
    context: Context,
    mem: Arc<MemObject>,
    width: usize,
    height: usize,
    /// Elements between row starts; valid while mapped.
    row_pitch: usize,
    host_ptr: Option<NonNull<T>>,
    last_event: Event,
}

unsafe impl<T: Elem> Send for Image2D<T> {}

impl<T: Elem> Image2D<T> {
    /// Allocates a `width`×`height` image with `T`'s channel format.
    ///
    /// # Errors
    /// Driver error if the allocation fails or an extent is zero.
    pub fn new(context: &Context, width: usize, height: usize) -> Result<Self> {
        log::trace!("image2d {width}x{height}, format {:?}", T::FORMAT);
        let mem = MemObject::image2d(width, height, size_of::<T>())?;
        Ok(Self {
            context: context.clone(),
            mem: Arc::new(mem),
            width,
            height,
            row_pitch: 0,
            host_ptr: None,
            last_event: Event::new(),
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Total element count (`width * height`), the extent ranged transfers
    /// are checked against.
    #[must_use]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements between the start of consecutive rows; meaningful only
    /// while mapped.
    #[must_use]
    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.host_ptr.is_some()
    }

    #[must_use]
    pub fn last_event(&self) -> Event {
        self.last_event.clone()
    }

    pub(crate) fn mem(&self) -> &Arc<MemObject> {
        &self.mem
    }

    fn ensure_unmapped(&self) -> Result<()> {
        if self.host_ptr.is_none() {
            Ok(())
        } else {
            Err(Error::State("image is mapped"))
        }
    }

    fn mapped_ptr(&self) -> Result<NonNull<T>> {
        self.host_ptr.ok_or(Error::State("image is not mapped"))
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.len()) {
            Err(Error::Bounds {
                offset,
                len,
                size: self.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Full transfers must cover all `width * height` elements exactly.
    fn check_exact(&self, len: usize) -> Result<()> {
        if len == self.len() {
            Ok(())
        } else {
            Err(Error::Bounds {
                offset: 0,
                len,
                size: self.len(),
            })
        }
    }

    fn finish(&mut self, event: Event) -> Event {
        self.last_event = event.clone();
        event
    }

    /// See [`crate::Buffer::map`]; additionally derives the row pitch from
    /// the device-reported byte pitch.
    pub fn map(&mut self, access: MapAccess, deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        log::trace!("map image2d ({access:?})");
        let event = self.context.enqueue(
            CommandOp::Map {
                mem: Arc::clone(&self.mem),
            },
            deps,
        )?;
        self.row_pitch = self.mem.row_pitch() / size_of::<T>();
        self.host_ptr = NonNull::new(self.mem.as_ptr().cast());
        Ok(self.finish(event))
    }

    /// See [`crate::Buffer::unmap`].
    pub fn unmap(&mut self, deps: &[&Event]) -> Result<Event> {
        self.mapped_ptr()?;
        let event = self.context.enqueue(
            CommandOp::Unmap {
                mem: Arc::clone(&self.mem),
            },
            deps,
        )?;
        self.host_ptr = None;
        Ok(self.finish(event))
    }

    /// Packed host-to-device write of all `width * height` elements.
    ///
    /// # Errors
    /// Bounds error unless `src.len()` equals the element count.
    pub fn write(&mut self, src: &[T], deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        self.check_exact(src.len())?;
        self.write_range(0, src, deps)
    }

    /// Packed write starting at packed element `offset`.
    ///
    /// # Errors
    /// Bounds error when the range exceeds `width * height`; no enqueue in
    /// that case.
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

    /// Packed device-to-host read of all elements into `dest`.
    ///
    /// # Errors
    /// Bounds error unless `dest.len()` equals the element count.
    ///
    /// # Safety
    /// As [`crate::Buffer::read`]: `dest` must stay valid and unaccessed
    /// until the returned handle has been waited on.
    pub unsafe fn read(&mut self, dest: &mut [T], deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        self.check_exact(dest.len())?;
        unsafe { self.read_range(0, dest, deps) }
    }

    /// Packed read starting at packed element `offset`.
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

    /// Element at `(x, y)` while mapped.
    ///
    /// # Errors
    /// State error if not mapped; bounds error for out-of-extent
    /// coordinates.
    pub fn at(&self, x: usize, y: usize) -> Result<&T> {
        let ptr = self.mapped_ptr()?;
        self.check_coord(x, y)?;
        Ok(unsafe { &*ptr.as_ptr().add(y * self.row_pitch + x) })
    }

    /// Mutable variant of [`Self::at`].
    pub fn at_mut(&mut self, x: usize, y: usize) -> Result<&mut T> {
        let ptr = self.mapped_ptr()?;
        self.check_coord(x, y)?;
        Ok(unsafe { &mut *ptr.as_ptr().add(y * self.row_pitch + x) })
    }

    /// Row `y` as a `width`-element slice while mapped.
    pub fn row(&self, y: usize) -> Result<&[T]> {
        let ptr = self.mapped_ptr()?;
        self.check_coord(0, y)?;
        Ok(unsafe { std::slice::from_raw_parts(ptr.as_ptr().add(y * self.row_pitch), self.width) })
    }

    /// Mutable variant of [`Self::row`].
    pub fn row_mut(&mut self, y: usize) -> Result<&mut [T]> {
        let ptr = self.mapped_ptr()?;
        self.check_coord(0, y)?;
        Ok(unsafe {
            std::slice::from_raw_parts_mut(ptr.as_ptr().add(y * self.row_pitch), self.width)
        })
    }

    fn check_coord(&self, x: usize, y: usize) -> Result<()> {
        if x >= self.width || y >= self.height {
            Err(Error::Bounds {
                offset: y * self.width + x,
                len: 1,
                size: self.len(),
            })
        } else {
            Ok(())
        }
    }
}

/// Coordinate access while mapped.
///
/// # Panics
/// Panics if the image is not mapped or the coordinate is out of extent;
/// use [`Image2D::at`] for a fallible lookup.
impl<T: Elem> Index<(usize, usize)> for Image2D<T> {
    type Output = T;

    fn index(&self, (x, y): (usize, usize)) -> &T {
        match self.at(x, y) {
            Ok(elem) => elem,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T: Elem> IndexMut<(usize, usize)> for Image2D<T> {
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        match self.at_mut(x, y) {
            Ok(elem) => elem,
            Err(err) => panic!("{err}"),
        }
    }
}

pub struct Image3D<T: Elem> {
    context: Context,
    mem: Arc<MemObject>,
    width: usize,
    height: usize,
    depth: usize,
    row_pitch: usize,
    /// Elements between slice starts; valid while mapped.
    slice_pitch: usize,
    host_ptr: Option<NonNull<T>>,
    last_event: Event,
}

unsafe impl<T: Elem> Send for Image3D<T> {}

impl<T: Elem> Image3D<T> {
    /// Allocates a `width`×`height`×`depth` image with `T`'s channel
    /// format.
    ///
    /// # Errors
    /// Driver error if the allocation fails or an extent is zero.
    pub fn new(context: &Context, width: usize, height: usize, depth: usize) -> Result<Self> {
        log::trace!("image3d {width}x{height}x{depth}, format {:?}", T::FORMAT);
        let mem = MemObject::image3d(width, height, depth, size_of::<T>())?;
        Ok(Self {
            context: context.clone(),
            mem: Arc::new(mem),
            width,
            height,
            depth,
            row_pitch: 0,
            slice_pitch: 0,
            host_ptr: None,
            last_event: Event::new(),
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Total element count (`width * height * depth`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.width * self.height * self.depth
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    #[must_use]
    pub fn slice_pitch(&self) -> usize {
        self.slice_pitch
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.host_ptr.is_some()
    }

    #[must_use]
    pub fn last_event(&self) -> Event {
        self.last_event.clone()
    }

    pub(crate) fn mem(&self) -> &Arc<MemObject> {
        &self.mem
    }

    fn ensure_unmapped(&self) -> Result<()> {
        if self.host_ptr.is_none() {
            Ok(())
        } else {
            Err(Error::State("image is mapped"))
        }
    }

    fn mapped_ptr(&self) -> Result<NonNull<T>> {
        self.host_ptr.ok_or(Error::State("image is not mapped"))
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.len()) {
            Err(Error::Bounds {
                offset,
                len,
                size: self.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Full transfers must cover all `width * height * depth` elements
    /// exactly.
    fn check_exact(&self, len: usize) -> Result<()> {
        if len == self.len() {
            Ok(())
        } else {
            Err(Error::Bounds {
                offset: 0,
                len,
                size: self.len(),
            })
        }
    }

    fn finish(&mut self, event: Event) -> Event {
        self.last_event = event.clone();
        event
    }

    /// See [`Image2D::map`]; also derives the slice pitch.
    pub fn map(&mut self, access: MapAccess, deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        log::trace!("map image3d ({access:?})");
        let event = self.context.enqueue(
            CommandOp::Map {
                mem: Arc::clone(&self.mem),
            },
            deps,
        )?;
        self.row_pitch = self.mem.row_pitch() / size_of::<T>();
        self.slice_pitch = self.mem.slice_pitch() / size_of::<T>();
        self.host_ptr = NonNull::new(self.mem.as_ptr().cast());
        Ok(self.finish(event))
    }

    /// See [`Image2D::unmap`].
    pub fn unmap(&mut self, deps: &[&Event]) -> Result<Event> {
        self.mapped_ptr()?;
        let event = self.context.enqueue(
            CommandOp::Unmap {
                mem: Arc::clone(&self.mem),
            },
            deps,
        )?;
        self.host_ptr = None;
        Ok(self.finish(event))
    }

    /// Packed host-to-device write of all elements.
    ///
    /// # Errors
    /// Bounds error unless `src.len()` equals the element count.
    pub fn write(&mut self, src: &[T], deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        self.check_exact(src.len())?;
        self.write_range(0, src, deps)
    }

    /// Packed write starting at packed element `offset`.
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

    /// Packed device-to-host read of all elements into `dest`.
    ///
    /// # Errors
    /// Bounds error unless `dest.len()` equals the element count.
    ///
    /// # Safety
    /// As [`crate::Buffer::read`].
    pub unsafe fn read(&mut self, dest: &mut [T], deps: &[&Event]) -> Result<Event> {
        self.ensure_unmapped()?;
        self.check_exact(dest.len())?;
        unsafe { self.read_range(0, dest, deps) }
    }

    /// Packed read starting at packed element `offset`.
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

    /// Element at `(x, y, z)` while mapped.
    pub fn at(&self, x: usize, y: usize, z: usize) -> Result<&T> {
        let ptr = self.mapped_ptr()?;
        self.check_coord(x, y, z)?;
        Ok(unsafe { &*ptr.as_ptr().add(z * self.slice_pitch + y * self.row_pitch + x) })
    }

    /// Mutable variant of [`Self::at`].
    pub fn at_mut(&mut self, x: usize, y: usize, z: usize) -> Result<&mut T> {
        let ptr = self.mapped_ptr()?;
        self.check_coord(x, y, z)?;
        Ok(unsafe { &mut *ptr.as_ptr().add(z * self.slice_pitch + y * self.row_pitch + x) })
    }

    fn check_coord(&self, x: usize, y: usize, z: usize) -> Result<()> {
        if x >= self.width || y >= self.height || z >= self.depth {
            Err(Error::Bounds {
                offset: (z * self.height + y) * self.width + x,
                len: 1,
                size: self.len(),
            })
        } else {
            Ok(())
        }
    }
}

/// Coordinate access while mapped; panics as [`Image2D`]'s `Index` does.
impl<T: Elem> Index<(usize, usize, usize)> for Image3D<T> {
    type Output = T;

    fn index(&self, (x, y, z): (usize, usize, usize)) -> &T {
        match self.at(x, y, z) {
            Ok(elem) => elem,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T: Elem> IndexMut<(usize, usize, usize)> for Image3D<T> {
    fn index_mut(&mut self, (x, y, z): (usize, usize, usize)) -> &mut T {
        match self.at_mut(x, y, z) {
            Ok(elem) => elem,
            Err(err) => panic!("{err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::device::DeviceClass;

    fn ctx() -> Context {
        Context::new(DeviceClass::All, 0, 1).unwrap()
    }

    #[test]
    fn map_reports_element_pitch() {
        let ctx = ctx();
        // 6 * 4 bytes = 24-byte rows, padded by the device: pitch > width.
        let mut img = Image2D::<f32>::new(&ctx, 6, 3).unwrap();
        img.map(MapAccess::ReadWrite, &[]).unwrap().wait().unwrap();
        assert!(img.row_pitch() >= img.width());
        assert_eq!(img.row_pitch() % 16, 0);
    }

    #[test]
    fn state_machine_and_coordinates() {
        let ctx = ctx();
        let mut img = Image2D::<u32>::new(&ctx, 4, 2).unwrap();
        assert!(matches!(img.at(0, 0), Err(Error::State(_))));

        img.map(MapAccess::ReadWrite, &[]).unwrap().wait().unwrap();
        assert!(matches!(
            img.map(MapAccess::ReadWrite, &[]),
            Err(Error::State(_))
        ));
        *img.at_mut(3, 1).unwrap() = 99;
        assert_eq!(img[(3, 1)], 99);
        assert!(matches!(img.at(4, 0), Err(Error::Bounds { .. })));

        img.unmap(&[]).unwrap().wait().unwrap();
        assert!(matches!(img.unmap(&[]), Err(Error::State(_))));
    }

    #[test]
    fn packed_roundtrip_matches_mapped_view() {
        let ctx = ctx();
        let mut img = Image2D::<u32>::new(&ctx, 5, 4).unwrap();
        let src: Vec<u32> = (0..20).collect();
        let wrote = img.write(&src, &[]).unwrap();

        let mapped = img.map(MapAccess::Read, &[&wrote]).unwrap();
        mapped.wait().unwrap();
        for y in 0..4 {
            for x in 0..5 {
                assert_eq!(img[(x, y)], src[y * 5 + x]);
            }
        }
        let unmapped = img.unmap(&[]).unwrap();

        let mut dest = vec![0u32; 20];
        unsafe { img.read(&mut dest, &[&unmapped]) }
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(dest, src);
    }

    #[test]
    fn full_transfer_length_must_match() {
        let ctx = ctx();

        // 4 * 3 = 12 elements; a shorter slice must not become a partial
        // transfer through the full-image variants.
        let mut img = Image2D::<u32>::new(&ctx, 4, 3).unwrap();
        assert!(matches!(
            img.write(&[0u32; 8], &[]),
            Err(Error::Bounds { len: 8, size: 12, .. })
        ));
        let mut short = [0u32; 8];
        assert!(matches!(
            unsafe { img.read(&mut short, &[]) },
            Err(Error::Bounds { len: 8, size: 12, .. })
        ));
        assert!(!img.last_event().is_assigned());

        let mut vol = Image3D::<u8>::new(&ctx, 2, 2, 3).unwrap();
        assert!(matches!(
            vol.write(&[0u8; 4], &[]),
            Err(Error::Bounds { len: 4, size: 12, .. })
        ));
        let mut flat = [0u8; 4];
        assert!(matches!(
            unsafe { vol.read(&mut flat, &[]) },
            Err(Error::Bounds { len: 4, size: 12, .. })
        ));

        // The exact count still goes through.
        vol.write(&[9u8; 12], &[]).unwrap().wait().unwrap();
    }

    #[test]
    fn ranged_bounds_checked_against_element_count() {
        let ctx = ctx();
        let mut img = Image2D::<u8>::new(&ctx, 8, 2).unwrap();
        assert!(matches!(
            img.write_range(10, &[0u8; 8], &[]),
            Err(Error::Bounds {
                offset: 10,
                len: 8,
                size: 16
            })
        ));
    }

    #[test]
    fn image3d_roundtrip_and_pitches() {
        let ctx = ctx();
        let mut img = Image3D::<u16>::new(&ctx, 3, 2, 2).unwrap();
        let src: Vec<u16> = (0..12).collect();
        let wrote = img.write(&src, &[]).unwrap();

        img.map(MapAccess::ReadWrite, &[&wrote])
            .unwrap()
            .wait()
            .unwrap();
        assert!(img.slice_pitch() >= img.row_pitch() * img.height());
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..3 {
                    assert_eq!(img[(x, y, z)], src[(z * 2 + y) * 3 + x]);
                }
            }
        }
        *img.at_mut(0, 0, 1).unwrap() = 77;
        let unmapped = img.unmap(&[]).unwrap();

        let mut dest = vec![0u16; 12];
        unsafe { img.read(&mut dest, &[&unmapped]) }
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(dest[6], 77);
    }
}
