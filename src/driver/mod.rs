//! The native device runtime consumed by the `rt` layer.
//!
//! This is the collaborator boundary of the crate: platform/device
//! enumeration, command queues, completion records, raw device memory and
//! program entry points live here. The implementation is a reference
//! in-process device: each command queue is a worker thread draining
//! commands in submission order, so enqueued work genuinely completes
//! asynchronously with respect to the submitting host thread.

pub mod device;
pub mod event;
pub mod memory;
pub mod program;
pub mod queue;

use std::fmt;

/// Diagnostic codes reported by the device runtime.
///
/// The `rt` layer never interprets these beyond wrapping them in
/// [`crate::Error::Driver`]; the string table exists purely for
/// human-readable diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCode {
    DeviceNotFound,
    InvalidPlatform,
    InvalidBufferSize,
    InvalidImageSize,
    MemObjectAllocationFailure,
    OutOfResources,
    InvalidCommandQueue,
    InvalidEvent,
    ExecStatusErrorForEventsInWaitList,
    InvalidKernelName,
    InvalidKernelArgs,
    InvalidWorkDimension,
    InvalidWorkGroupSize,
}

impl DriverCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::InvalidPlatform => "INVALID_PLATFORM",
            Self::InvalidBufferSize => "INVALID_BUFFER_SIZE",
            Self::InvalidImageSize => "INVALID_IMAGE_SIZE",
            Self::MemObjectAllocationFailure => "MEM_OBJECT_ALLOCATION_FAILURE",
            Self::OutOfResources => "OUT_OF_RESOURCES",
            Self::InvalidCommandQueue => "INVALID_COMMAND_QUEUE",
            Self::InvalidEvent => "INVALID_EVENT",
            Self::ExecStatusErrorForEventsInWaitList => {
                "EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
            }
            Self::InvalidKernelName => "INVALID_KERNEL_NAME",
            Self::InvalidKernelArgs => "INVALID_KERNEL_ARGS",
            Self::InvalidWorkDimension => "INVALID_WORK_DIMENSION",
            Self::InvalidWorkGroupSize => "INVALID_WORK_GROUP_SIZE",
        }
    }
}

impl fmt::Display for DriverCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for DriverCode {}
