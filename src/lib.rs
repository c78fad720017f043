//! Host-side management layer for queue-based compute accelerators.
//!
//! The crate gives calling code typed handles over an asynchronous device
//! runtime: a shared [`Context`] owning command queues, non-cloneable
//! device memory objects ([`Buffer`], [`Image2D`], [`Image3D`]) guarded by
//! a mapped/unmapped state machine, refcounted completion handles
//! ([`Event`]) composable into dependency lists, and kernels typed by their
//! exact argument signature ([`Kernel`]). Every operation is enqueued and
//! returns an [`Event`]; nothing blocks the host except an explicit
//! [`Event::wait`].
//!
//! The [`driver`] module is the native-runtime boundary, implemented here
//! as a reference in-process device so the asynchronous contract holds
//! without hardware: queues are worker threads, programs are host-registered
//! entry points over the untyped argument-slot protocol.
//!
//! ```
//! use qcl_rs::{Buf, Context, DeviceClass, MapAccess, Program, Val, Worksize};
//!
//! # fn main() -> qcl_rs::Result<()> {
//! let ctx = Context::new(DeviceClass::All, 0, 1)?;
//! let program = Program::builder(&ctx)
//!     .kernel("saxpy", 3, |args, item| {
//!         let x = unsafe { args.slice_mut::<f32>(0) };
//!         let y = unsafe { args.slice::<f32>(1) };
//!         let a = args.scalar::<f32>(2);
//!         let i = item.global_id(0);
//!         x[i] += a * y[i];
//!     })
//!     .build()?;
//! let saxpy = program.kernel::<(Buf<f32>, Buf<f32>, Val<f32>)>("saxpy")?;
//!
//! let mut x = qcl_rs::Buffer::<f32>::new(&ctx, 1024)?;
//! let mut y = qcl_rs::Buffer::<f32>::new(&ctx, 1024)?;
//! let wx = x.write(&[45.0; 1024], &[])?;
//! let wy = y.write(&[3.0; 1024], &[])?;
//!
//! let ran = saxpy.launch(Worksize::d1(1024, 256), (&x, &y, 13.0), &[&wx, &wy])?;
//! let mapped = x.map(MapAccess::Read, &[&ran])?;
//! mapped.wait()?;
//! assert_eq!(x[0], 84.0);
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod error;
mod rt;

pub use driver::DriverCode;
pub use driver::device::{DeviceClass, DeviceInfo, Platform, platforms};
pub use driver::event::CommandStatus;
pub use driver::program::{ArgView, WorkItem};
pub use error::{Error, Result};
pub use rt::MapAccess;
pub use rt::buffer::Buffer;
pub use rt::context::Context;
pub use rt::elem::{ChannelOrder, ChannelType, Elem, ImageFormat, Scalar};
pub use rt::event::Event;
pub use rt::image::{Image2D, Image3D};
pub use rt::kernel::{
    Buf, Img2d, Img3d, Kernel, KernelArg, KernelArgs, Local, Scratch, Val, Worksize,
};
pub use rt::program::{Program, ProgramBuilder};
