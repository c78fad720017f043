//! The public runtime layer: typed, state-checked handles over the driver.

pub mod buffer;
pub mod context;
pub mod elem;
pub mod event;
pub mod image;
pub mod kernel;
pub mod program;

/// Host access mode requested when mapping a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    Read,
    Write,
    ReadWrite,
}
