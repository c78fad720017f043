use crate::driver::DriverCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the device runtime. Carries the native
    /// diagnostic code; never retried internally.
    #[error("driver error: {0}")]
    Driver(#[from] DriverCode),

    /// Program build failure, with the build log.
    #[error("program build failed: {log}")]
    Build { log: String },

    /// Host-side misuse of the mapped/unmapped state machine or of an
    /// unassigned completion handle.
    #[error("state error: {0}")]
    State(&'static str),

    /// Ranged read/write outside the object's extent.
    #[error("range out of bounds: offset {offset} + len {len} > size {size}")]
    Bounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}

// A convenient alias
pub type Result<T> = std::result::Result<T, Error>;
