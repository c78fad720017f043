//! Completion handles.
//!
//! An [`Event`] is the token every enqueue returns. It starts life assigned
//! to the operation it was created for and shares the driver-side record by
//! refcount: cloning retains, dropping releases, and the record is freed
//! only when the last handle lets go. A default-constructed handle is
//! *unassigned*; querying it is a state error, never a silent no-op.

use crate::driver::device::Device;
use crate::driver::event::{CommandStatus, EventCore, RawEvent};
use crate::error::{Error, Result};
use std::sync::Arc;

#[derive(Debug)]
struct Assigned {
    device: Arc<Device>,
    raw: RawEvent,
}

/// Handle to one enqueued operation's eventual completion.
#[derive(Debug, Default)]
pub struct Event {
    inner: Option<Assigned>,
}

impl Event {
    /// An unassigned handle, not yet tied to any operation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a native handle in the assigned state, taking over the one
    /// reference the caller already holds.
    pub(crate) fn from_raw(device: Arc<Device>, raw: RawEvent) -> Self {
        Self {
            inner: Some(Assigned { device, raw }),
        }
    }

    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.inner.is_some()
    }

    /// The shared completion record, for building wait-lists without
    /// copying handles.
    pub(crate) fn core(&self) -> Result<Arc<EventCore>> {
        let assigned = self
            .inner
            .as_ref()
            .ok_or(Error::State("completion handle is unassigned"))?;
        Ok(assigned.device.events().core(assigned.raw)?)
    }

    /// Blocks the calling thread until the operation completes.
    ///
    /// # Errors
    /// State error on an unassigned handle; driver error if the operation
    /// failed or waiting itself failed.
    pub fn wait(&self) -> Result<()> {
        self.core()?.wait()?;
        Ok(())
    }

    /// The operation's current execution stage, without blocking.
    ///
    /// # Errors
    /// State error on an unassigned handle.
    pub fn status(&self) -> Result<CommandStatus> {
        Ok(self.core()?.status())
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        if let Some(assigned) = &self.inner {
            // We hold a reference, so the entry is live.
            let retained = assigned.device.events().retain(assigned.raw);
            debug_assert!(retained.is_ok());
        }
        Self {
            inner: self.inner.as_ref().map(|a| Assigned {
                device: Arc::clone(&a.device),
                raw: a.raw,
            }),
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        if let Some(assigned) = self.inner.take() {
            let released = assigned.device.events().release(assigned.raw);
            debug_assert!(released.is_ok());
        }
    }
}

/// Collects the completion records of a dependency list.
///
/// # Errors
/// State error if any dependency is unassigned.
pub(crate) fn wait_list(deps: &[&Event]) -> Result<Vec<Arc<EventCore>>> {
    deps.iter().map(|event| event.core()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::device::DeviceClass;

    fn assigned_complete() -> Event {
        let device = Device::open(DeviceClass::All, 0).unwrap();
        let core = Arc::new(EventCore::new());
        core.settle(CommandStatus::Complete);
        let raw = device.events().register(core);
        Event::from_raw(device, raw)
    }

    #[test]
    fn unassigned_is_a_state_error() {
        let event = Event::new();
        assert!(!event.is_assigned());
        assert!(matches!(event.wait(), Err(Error::State(_))));
        assert!(matches!(event.status(), Err(Error::State(_))));
    }

    #[test]
    fn clones_share_the_record() {
        let event = assigned_complete();
        let a = event.clone();
        let b = event.clone();
        drop(event);
        drop(a);
        b.wait().unwrap();
        assert_eq!(b.status().unwrap(), CommandStatus::Complete);

        // Last handle gone: the record leaves the table.
        let device = Device::open(DeviceClass::All, 0).unwrap();
        let core = Arc::new(EventCore::new());
        let raw = device.events().register(core);
        drop(Event::from_raw(Arc::clone(&device), raw));
        assert!(device.events().core(raw).is_err());
    }

    #[test]
    fn unassigned_dependency_rejected() {
        let unassigned = Event::new();
        assert!(wait_list(&[&unassigned]).is_err());
    }
}
