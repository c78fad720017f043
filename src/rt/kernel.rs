//! Typed kernel invocation and argument marshaling.
//!
//! A [`Kernel`]'s type parameter is the ordered tuple of its argument
//! *kinds*: [`Val`] (scalar by value), [`Buf`]/[`Img2d`]/[`Img3d`] (device
//! memory handle) or [`Local`] (device-local scratch request). Each kind
//! knows its call-site form and how to lower it into the device's untyped
//! argument-slot protocol, so arity and kinds are fixed at compile time and
//! no runtime type tag exists. This closed table is the single integration
//! point a new argument kind has to extend.

use crate::driver::program::{ArgSlot, KernelEntry, NdRange};
use crate::driver::queue::CommandOp;
use crate::error::Result;
use crate::rt::buffer::Buffer;
use crate::rt::context::Context;
use crate::rt::elem::{Elem, Scalar};
use crate::rt::event::Event;
use crate::rt::image::{Image2D, Image3D};
use std::marker::PhantomData;
use std::sync::Arc;

/// Work partition of a launch: global and local extents, 1–3 dimensional.
/// Unused dimensions are 1. Pure value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Worksize {
    dim: u32,
    global: [usize; 3],
    local: [usize; 3],
}

impl Worksize {
    #[must_use]
    pub const fn d1(global: usize, local: usize) -> Self {
        Self {
            dim: 1,
            global: [global, 1, 1],
            local: [local, 1, 1],
        }
    }

    #[must_use]
    pub const fn d2(g0: usize, g1: usize, l0: usize, l1: usize) -> Self {
        Self {
            dim: 2,
            global: [g0, g1, 1],
            local: [l0, l1, 1],
        }
    }

    #[must_use]
    pub const fn d3(g0: usize, g1: usize, g2: usize, l0: usize, l1: usize, l2: usize) -> Self {
        Self {
            dim: 3,
            global: [g0, g1, g2],
            local: [l0, l1, l2],
        }
    }

    pub(crate) const fn to_range(self) -> NdRange {
        NdRange {
            dim: self.dim,
            global: self.global,
            local: self.local,
        }
    }
}

/// Call-site form of a [`Local`] argument: a scratch request of `0` elements
/// carries no host payload, only a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratch(pub usize);

mod sealed {
    pub trait Sealed {}
}

/// One argument kind in a kernel signature.
pub trait KernelArg: sealed::Sealed {
    /// What the caller passes for this kind.
    type Pass<'a>;

    /// Lowers the call-site value into the next argument slot.
    fn bind(arg: &Self::Pass<'_>, slots: &mut Vec<ArgSlot>);
}

/// Scalar passed by value.
pub struct Val<T: Scalar>(PhantomData<T>);

impl<T: Scalar> sealed::Sealed for Val<T> {}
impl<T: Scalar> KernelArg for Val<T> {
    type Pass<'a> = T;

    fn bind(arg: &T, slots: &mut Vec<ArgSlot>) {
        let bytes = unsafe {
            std::slice::from_raw_parts(std::ptr::from_ref(arg).cast::<u8>(), size_of::<T>())
        };
        slots.push(ArgSlot::Value(bytes.to_vec()));
    }
}

/// Device buffer of `T`.
pub struct Buf<T: Elem>(PhantomData<T>);

impl<T: Elem> sealed::Sealed for Buf<T> {}
impl<T: Elem> KernelArg for Buf<T> {
    type Pass<'a> = &'a Buffer<T>;

    fn bind(arg: &&Buffer<T>, slots: &mut Vec<ArgSlot>) {
        slots.push(ArgSlot::Mem(Arc::clone(arg.mem())));
    }
}

/// 2D device image of `T`.
pub struct Img2d<T: Elem>(PhantomData<T>);

impl<T: Elem> sealed::Sealed for Img2d<T> {}
impl<T: Elem> KernelArg for Img2d<T> {
    type Pass<'a> = &'a Image2D<T>;

    fn bind(arg: &&Image2D<T>, slots: &mut Vec<ArgSlot>) {
        slots.push(ArgSlot::Mem(Arc::clone(arg.mem())));
    }
}

/// 3D device image of `T`.
pub struct Img3d<T: Elem>(PhantomData<T>);

impl<T: Elem> sealed::Sealed for Img3d<T> {}
impl<T: Elem> KernelArg for Img3d<T> {
    type Pass<'a> = &'a Image3D<T>;

    fn bind(arg: &&Image3D<T>, slots: &mut Vec<ArgSlot>) {
        slots.push(ArgSlot::Mem(Arc::clone(arg.mem())));
    }
}

/// Device-local scratch sized in elements of `T`, allocated per work-group.
pub struct Local<T: Elem>(PhantomData<T>);

impl<T: Elem> sealed::Sealed for Local<T> {}
impl<T: Elem> KernelArg for Local<T> {
    type Pass<'a> = Scratch;

    fn bind(arg: &Scratch, slots: &mut Vec<ArgSlot>) {
        slots.push(ArgSlot::Local(arg.0 * size_of::<T>()));
    }
}

/// An ordered tuple of argument kinds.
pub trait KernelArgs: sealed::Sealed {
    const ARITY: usize;

    /// The caller-side tuple matching the kinds.
    type Pass<'a>;

    fn bind(args: &Self::Pass<'_>) -> Vec<ArgSlot>;
}

macro_rules! impl_kernel_args {
    ($arity:literal; $($kind:ident . $idx:tt),+) => {
        impl<$($kind: KernelArg),+> sealed::Sealed for ($($kind,)+) {}
        impl<$($kind: KernelArg),+> KernelArgs for ($($kind,)+) {
            const ARITY: usize = $arity;

            type Pass<'a> = ($($kind::Pass<'a>,)+);

            fn bind(args: &Self::Pass<'_>) -> Vec<ArgSlot> {
                let mut slots = Vec::with_capacity(Self::ARITY);
                $($kind::bind(&args.$idx, &mut slots);)+
                slots
            }
        }
    };
}

impl_kernel_args!(1; A0.0);
impl_kernel_args!(2; A0.0, A1.1);
impl_kernel_args!(3; A0.0, A1.1, A2.2);
impl_kernel_args!(4; A0.0, A1.1, A2.2, A3.3);
impl_kernel_args!(5; A0.0, A1.1, A2.2, A3.3, A4.4);
impl_kernel_args!(6; A0.0, A1.1, A2.2, A3.3, A4.4, A5.5);
impl_kernel_args!(7; A0.0, A1.1, A2.2, A3.3, A4.4, A5.5, A6.6);
impl_kernel_args!(8; A0.0, A1.1, A2.2, A3.3, A4.4, A5.5, A6.6, A7.7);

/// A compiled entry point bound to a fixed, compile-time argument
/// signature.
pub struct Kernel<A: KernelArgs> {
    context: Context,
    entry: Arc<KernelEntry>,
    _signature: PhantomData<fn(A)>,
}

impl<A: KernelArgs> Kernel<A> {
    pub(crate) fn from_entry(context: Context, entry: Arc<KernelEntry>) -> Self {
        Self {
            context,
            entry,
            _signature: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Binds the arguments in positional order and enqueues an execution
    /// over `ws` on the context's current queue, after `deps`.
    ///
    /// # Errors
    /// Driver error if binding or the enqueue fails; an incompatible
    /// worksize surfaces through the returned handle as a failed operation.
    pub fn launch(&self, ws: Worksize, args: A::Pass<'_>, deps: &[&Event]) -> Result<Event> {
        let slots = A::bind(&args);
        log::trace!("launch `{}` ({} args)", self.entry.name, slots.len());
        self.context.enqueue(
            CommandOp::Launch {
                entry: Arc::clone(&self.entry),
                slots,
                range: ws.to_range(),
            },
            deps,
        )
    }
}

impl<A: KernelArgs> Clone for Kernel<A> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            entry: Arc::clone(&self.entry),
            _signature: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worksize_constructors_fill_unused_dims() {
        let ws = Worksize::d1(1024, 256).to_range();
        assert_eq!((ws.dim, ws.global, ws.local), (1, [1024, 1, 1], [256, 1, 1]));

        let ws = Worksize::d2(64, 32, 8, 4).to_range();
        assert_eq!((ws.dim, ws.global, ws.local), (2, [64, 32, 1], [8, 4, 1]));

        let ws = Worksize::d3(8, 8, 8, 2, 2, 2).to_range();
        assert_eq!(ws.dim, 3);
    }

    #[test]
    fn binding_is_positional_and_kind_typed() {
        type Sig = (Val<f32>, Local<u32>, Val<i16>);
        assert_eq!(<Sig as KernelArgs>::ARITY, 3);

        let slots = <Sig as KernelArgs>::bind(&(2.5f32, Scratch(8), -3i16));
        assert!(matches!(&slots[0], ArgSlot::Value(b) if b.len() == 4));
        assert!(matches!(slots[1], ArgSlot::Local(32)));
        assert!(matches!(&slots[2], ArgSlot::Value(b) if b.len() == 2));
    }
}
