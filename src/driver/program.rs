//! Kernel entry points and the launch executor.
//!
//! A compiled program, to the reference device, is a set of named entry
//! points: host closures over the untyped argument-slot protocol. The
//! executor walks the launch geometry work-group by work-group, allocating
//! device-local scratch per group and invoking the entry once per work-item.

use crate::driver::DriverCode;
use crate::driver::memory::MemObject;
use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// One bound argument slot, in the device's untyped binding protocol.
#[derive(Debug, Clone)]
pub enum ArgSlot {
    /// Raw byte copy of a host value.
    Value(Vec<u8>),
    /// Handle to a device memory object.
    Mem(Arc<MemObject>),
    /// Device-local scratch of the given byte size, no host payload.
    Local(usize),
}

/// Entry-point body: invoked once per work-item.
pub type KernelFn = Arc<dyn Fn(&ArgView<'_>, &WorkItem) + Send + Sync>;

/// A named entry point resolved from a compiled program.
pub struct KernelEntry {
    pub name: String,
    pub arity: usize,
    pub func: KernelFn,
}

impl std::fmt::Debug for KernelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Launch geometry: global and local extents per dimension. Unused
/// dimensions are 1.
#[derive(Debug, Clone, Copy)]
pub struct NdRange {
    pub dim: u32,
    pub global: [usize; 3],
    pub local: [usize; 3],
}

/// Per-item identity handed to an entry point, mirroring the usual device
/// intrinsics.
#[derive(Debug, Clone, Copy)]
pub struct WorkItem {
    pub dim: u32,
    global: [usize; 3],
    local: [usize; 3],
    group: [usize; 3],
    global_size: [usize; 3],
    local_size: [usize; 3],
}

impl WorkItem {
    #[must_use]
    pub fn global_id(&self, d: usize) -> usize {
        self.global[d]
    }

    #[must_use]
    pub fn local_id(&self, d: usize) -> usize {
        self.local[d]
    }

    #[must_use]
    pub fn group_id(&self, d: usize) -> usize {
        self.group[d]
    }

    #[must_use]
    pub fn global_size(&self, d: usize) -> usize {
        self.global_size[d]
    }

    #[must_use]
    pub fn local_size(&self, d: usize) -> usize {
        self.local_size[d]
    }
}

/// View over the bound slots, valid for one work-group.
pub struct ArgView<'a> {
    slots: &'a [ArgSlot],
    locals: &'a [Option<UnsafeCell<Box<[u8]>>>],
}

impl ArgView<'_> {
    /// Reads slot `i` as a by-value scalar.
    ///
    /// # Panics
    /// Traps (panics) if the slot is not a value of `T`'s size; the executor
    /// reports a trapped launch as a driver error.
    #[must_use]
    pub fn scalar<T: Copy + 'static>(&self, i: usize) -> T {
        let ArgSlot::Value(bytes) = &self.slots[i] else {
            panic!("arg {i} is not a by-value slot");
        };
        assert_eq!(bytes.len(), size_of::<T>(), "arg {i} size mismatch");
        unsafe { bytes.as_ptr().cast::<T>().read_unaligned() }
    }

    /// The memory object bound at slot `i` (for pitch and extent queries).
    ///
    /// # Panics
    /// Traps if the slot is not a memory handle.
    #[must_use]
    pub fn mem(&self, i: usize) -> &MemObject {
        let ArgSlot::Mem(mem) = &self.slots[i] else {
            panic!("arg {i} is not a memory object");
        };
        mem
    }

    /// Views slot `i` as a slice of `T` over the whole allocation.
    ///
    /// # Safety
    /// Device memory is not alias-checked: concurrent mutable views of the
    /// same allocation race exactly as they would on hardware. The caller
    /// (the kernel body) is responsible for disjoint access across
    /// work-items, and `T` must match the data actually stored.
    #[must_use]
    pub unsafe fn slice<T: Copy>(&self, i: usize) -> &[T] {
        let mem = self.mem(i);
        unsafe { std::slice::from_raw_parts(mem.as_ptr().cast(), mem.size() / size_of::<T>()) }
    }

    /// Mutable variant of [`Self::slice`].
    ///
    /// # Safety
    /// See [`Self::slice`].
    #[must_use]
    pub unsafe fn slice_mut<T: Copy>(&self, i: usize) -> &mut [T] {
        let mem = self.mem(i);
        unsafe {
            std::slice::from_raw_parts_mut(mem.as_ptr().cast(), mem.size() / size_of::<T>())
        }
    }

    /// Views the work-group's local scratch at slot `i` as a slice of `T`.
    ///
    /// # Safety
    /// Same aliasing contract as [`Self::slice_mut`], scoped to the current
    /// work-group.
    #[must_use]
    pub unsafe fn local_mut<T: Copy>(&self, i: usize) -> &mut [T] {
        let Some(cell) = &self.locals[i] else {
            panic!("arg {i} is not local scratch");
        };
        unsafe {
            let block = &mut *cell.get();
            std::slice::from_raw_parts_mut(block.as_mut_ptr().cast(), block.len() / size_of::<T>())
        }
    }
}

fn validate(range: &NdRange, entry: &KernelEntry, slots: &[ArgSlot]) -> Result<(), DriverCode> {
    if !(1..=3).contains(&range.dim) {
        return Err(DriverCode::InvalidWorkDimension);
    }
    if slots.len() != entry.arity {
        return Err(DriverCode::InvalidKernelArgs);
    }
    for d in 0..3 {
        // Unused dimensions must hold the neutral extent 1.
        let (g, l) = (range.global[d], range.local[d]);
        if g == 0 || l == 0 || g % l != 0 {
            return Err(DriverCode::InvalidWorkGroupSize);
        }
        if d >= range.dim as usize && (g != 1 || l != 1) {
            return Err(DriverCode::InvalidWorkGroupSize);
        }
    }
    Ok(())
}

/// Executes one launch synchronously (the queue worker provides the
/// asynchrony). A trapped entry point is reported as `InvalidKernelArgs`.
pub fn launch(entry: &KernelEntry, slots: &[ArgSlot], range: &NdRange) -> Result<(), DriverCode> {
    validate(range, entry, slots)?;

    let groups: Vec<usize> = (0..3).map(|d| range.global[d] / range.local[d]).collect();
    let run = || {
        for gz in 0..groups[2] {
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    // Fresh local scratch per work-group.
                    let locals: Vec<Option<UnsafeCell<Box<[u8]>>>> = slots
                        .iter()
                        .map(|slot| match slot {
                            ArgSlot::Local(bytes) => {
                                Some(UnsafeCell::new(vec![0u8; *bytes].into_boxed_slice()))
                            }
                            _ => None,
                        })
                        .collect();
                    let view = ArgView {
                        slots,
                        locals: &locals,
                    };
                    let group = [gx, gy, gz];
                    for lz in 0..range.local[2] {
                        for ly in 0..range.local[1] {
                            for lx in 0..range.local[0] {
                                let local = [lx, ly, lz];
                                let global = [
                                    gx * range.local[0] + lx,
                                    gy * range.local[1] + ly,
                                    gz * range.local[2] + lz,
                                ];
                                let item = WorkItem {
                                    dim: range.dim,
                                    global,
                                    local,
                                    group,
                                    global_size: range.global,
                                    local_size: range.local,
                                };
                                (entry.func)(&view, &item);
                            }
                        }
                    }
                }
            }
        }
    };
    panic::catch_unwind(AssertUnwindSafe(run)).map_err(|_| {
        log::warn!("kernel `{}` trapped during launch", entry.name);
        DriverCode::InvalidKernelArgs
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range1(global: usize, local: usize) -> NdRange {
        NdRange {
            dim: 1,
            global: [global, 1, 1],
            local: [local, 1, 1],
        }
    }

    fn entry(arity: usize, func: KernelFn) -> KernelEntry {
        KernelEntry {
            name: "test".into(),
            arity,
            func,
        }
    }

    #[test]
    fn rejects_bad_geometry() {
        let k = entry(0, Arc::new(|_, _| {}));
        let bad_dim = NdRange {
            dim: 4,
            global: [1; 3],
            local: [1; 3],
        };
        assert_eq!(
            launch(&k, &[], &bad_dim).unwrap_err(),
            DriverCode::InvalidWorkDimension
        );
        assert_eq!(
            launch(&k, &[], &range1(10, 4)).unwrap_err(),
            DriverCode::InvalidWorkGroupSize
        );
        assert_eq!(
            launch(&k, &[], &range1(8, 0)).unwrap_err(),
            DriverCode::InvalidWorkGroupSize
        );
    }

    #[test]
    fn rejects_arity_mismatch() {
        let k = entry(2, Arc::new(|_, _| {}));
        assert_eq!(
            launch(&k, &[], &range1(4, 2)).unwrap_err(),
            DriverCode::InvalidKernelArgs
        );
    }

    #[test]
    fn scalar_and_buffer_slots() {
        let mem = Arc::new(MemObject::buffer(16 * size_of::<u32>()).unwrap());
        let slots = [
            ArgSlot::Mem(Arc::clone(&mem)),
            ArgSlot::Value(7u32.to_ne_bytes().to_vec()),
        ];
        let k = entry(
            2,
            Arc::new(|args, item| {
                let out = unsafe { args.slice_mut::<u32>(0) };
                let bias = args.scalar::<u32>(1);
                let i = item.global_id(0);
                out[i] = i as u32 + bias;
            }),
        );
        launch(&k, &slots, &range1(16, 4)).unwrap();

        let mut out = vec![0u32; 16];
        unsafe { mem.read_bytes(0, out.as_mut_ptr().cast(), mem.size()) };
        for (i, v) in out.iter().enumerate() {
            assert_eq!(*v, i as u32 + 7);
        }
    }

    #[test]
    fn local_scratch_is_per_group() {
        // Each item bumps a per-group counter; the last item of the group
        // publishes it. Execution within a group is sequential on the
        // reference device, so the counter reaches the local size exactly.
        let mem = Arc::new(MemObject::buffer(4 * size_of::<u32>()).unwrap());
        let slots = [
            ArgSlot::Mem(Arc::clone(&mem)),
            ArgSlot::Local(size_of::<u32>()),
        ];
        let k = entry(
            2,
            Arc::new(|args, item| {
                let counter = unsafe { args.local_mut::<u32>(1) };
                counter[0] += 1;
                if item.local_id(0) == item.local_size(0) - 1 {
                    let out = unsafe { args.slice_mut::<u32>(0) };
                    out[item.group_id(0)] = counter[0];
                }
            }),
        );
        launch(&k, &slots, &range1(16, 4)).unwrap();

        let mut out = vec![0u32; 4];
        unsafe { mem.read_bytes(0, out.as_mut_ptr().cast(), mem.size()) };
        assert_eq!(out, vec![4, 4, 4, 4]);
    }

    #[test]
    fn trapped_kernel_is_a_driver_error() {
        let k = entry(
            1,
            Arc::new(|args: &ArgView<'_>, _: &WorkItem| {
                let _ = args.scalar::<u64>(0);
            }),
        );
        // A value slot narrower than the requested scalar traps.
        let slots = [ArgSlot::Value(vec![0u8; 4])];
        assert_eq!(
            launch(&k, &slots, &range1(1, 1)).unwrap_err(),
            DriverCode::InvalidKernelArgs
        );
    }
}
