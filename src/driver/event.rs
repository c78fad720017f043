//! Completion records and the device-side event table.
//!
//! Every enqueued command is paired with one [`EventCore`], the cell the
//! queue worker signals when the command finishes. Handles given to the host
//! are opaque [`RawEvent`] ids with an explicit refcount kept in the
//! [`EventTable`]; the record is dropped from the table once the last
//! reference is released, even if the command is still in flight (workers
//! hold their own `Arc` to the core).

use crate::driver::DriverCode;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

/// Execution stage of one enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Submitted, dependencies not yet resolved or worker not yet reached it.
    Queued,
    /// The queue worker is executing the command.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with a device diagnostic.
    Failed(DriverCode),
}

impl CommandStatus {
    const fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

/// The completion cell shared between the submitting side and the worker.
#[derive(Debug)]
pub struct EventCore {
    state: Mutex<CommandStatus>,
    cond: Condvar,
}

impl EventCore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CommandStatus::Queued),
            cond: Condvar::new(),
        }
    }

    #[must_use]
    pub fn status(&self) -> CommandStatus {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_running(&self) {
        *self.state.lock().unwrap() = CommandStatus::Running;
    }

    pub(crate) fn settle(&self, status: CommandStatus) {
        debug_assert!(status.is_settled());
        *self.state.lock().unwrap() = status;
        self.cond.notify_all();
    }

    /// Blocks until the command settles. No timeout: the design has no
    /// cancellation, a wait resolves only on completion or device failure.
    pub fn wait(&self) -> Result<(), DriverCode> {
        let mut state = self.state.lock().unwrap();
        while !state.is_settled() {
            state = self.cond.wait(state).unwrap();
        }
        match *state {
            CommandStatus::Failed(code) => Err(code),
            _ => Ok(()),
        }
    }
}

impl Default for EventCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque native event handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawEvent(u64);

#[derive(Debug)]
struct Entry {
    refs: usize,
    core: Arc<EventCore>,
}

/// Refcounted registry of live completion records, one per device.
#[derive(Debug)]
pub struct EventTable {
    entries: Mutex<HashMap<u64, Entry>>,
    next: Mutex<u64>,
}

impl EventTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next: Mutex::new(1),
        }
    }

    /// Registers a completion record and returns a handle owning one
    /// reference.
    pub fn register(&self, core: Arc<EventCore>) -> RawEvent {
        let mut next = self.next.lock().unwrap();
        let id = *next;
        *next += 1;
        self.entries
            .lock()
            .unwrap()
            .insert(id, Entry { refs: 1, core });
        RawEvent(id)
    }

    pub fn retain(&self, handle: RawEvent) -> Result<(), DriverCode> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&handle.0) {
            Some(entry) => {
                entry.refs += 1;
                Ok(())
            }
            None => Err(DriverCode::InvalidEvent),
        }
    }

    /// Drops one reference; the record leaves the table at zero.
    pub fn release(&self, handle: RawEvent) -> Result<(), DriverCode> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&handle.0) {
            Some(entry) => {
                entry.refs -= 1;
                if entry.refs == 0 {
                    entries.remove(&handle.0);
                }
                Ok(())
            }
            None => Err(DriverCode::InvalidEvent),
        }
    }

    pub fn core(&self, handle: RawEvent) -> Result<Arc<EventCore>, DriverCode> {
        self.entries
            .lock()
            .unwrap()
            .get(&handle.0)
            .map(|entry| Arc::clone(&entry.core))
            .ok_or(DriverCode::InvalidEvent)
    }

    #[cfg(test)]
    fn refs(&self, handle: RawEvent) -> Option<usize> {
        self.entries.lock().unwrap().get(&handle.0).map(|e| e.refs)
    }
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_release_lifecycle() {
        let table = EventTable::new();
        let core = Arc::new(EventCore::new());
        let handle = table.register(Arc::clone(&core));
        assert_eq!(table.refs(handle), Some(1));

        table.retain(handle).unwrap();
        assert_eq!(table.refs(handle), Some(2));

        table.release(handle).unwrap();
        assert_eq!(table.refs(handle), Some(1));

        table.release(handle).unwrap();
        assert_eq!(table.refs(handle), None);
        assert_eq!(table.core(handle).unwrap_err(), DriverCode::InvalidEvent);
    }

    #[test]
    fn wait_resolves_on_settle() {
        let core = Arc::new(EventCore::new());
        let waiter = Arc::clone(&core);
        let join = std::thread::spawn(move || waiter.wait());
        core.set_running();
        core.settle(CommandStatus::Complete);
        join.join().unwrap().unwrap();
        assert_eq!(core.status(), CommandStatus::Complete);
    }

    #[test]
    fn wait_reports_failure() {
        let core = EventCore::new();
        core.settle(CommandStatus::Failed(DriverCode::OutOfResources));
        assert_eq!(core.wait().unwrap_err(), DriverCode::OutOfResources);
    }
}
