//! Device context: one opened device plus its command queues.
//!
//! A `Context` is a handle to a shared resource record. Clones are views
//! onto the same device and queue set, not independent contexts; the
//! current-queue cursor is a field of that shared record, so switching it is
//! observed by every holder. Submission is assumed single-host-threaded;
//! the cursor is not meant to be raced against concurrent enqueues.

use crate::driver::device::{Device, DeviceClass};
use crate::driver::event::EventCore;
use crate::driver::queue::{CommandOp, CommandQueue, Enqueued};
use crate::error::{Error, Result};
use crate::rt::event::{self, Event};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct Shared {
    device: Arc<Device>,
    queues: Vec<CommandQueue>,
    current: AtomicUsize,
}

/// Shared handle to one device and a fixed set of in-order command queues.
#[derive(Debug, Clone)]
pub struct Context {
    shared: Arc<Shared>,
}

impl Context {
    /// Opens the device at `ordinal` within the given class on the first
    /// platform and brings up `queue_count` independent command queues.
    ///
    /// # Errors
    /// Driver error if no platform exists, the ordinal exceeds the available
    /// devices, or queue creation fails. State error for a zero queue count.
    pub fn new(class: DeviceClass, ordinal: usize, queue_count: usize) -> Result<Self> {
        if queue_count == 0 {
            return Err(Error::State("context requires at least one command queue"));
        }
        let device = Device::open(class, ordinal)?;
        let queues = (0..queue_count)
            .map(CommandQueue::spawn)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        log::debug!(
            "context ready: device `{}`, {queue_count} queue(s)",
            device.name()
        );
        Ok(Self {
            shared: Arc::new(Shared {
                device,
                queues,
                current: AtomicUsize::new(0),
            }),
        })
    }

    /// First device of any class, one queue.
    pub fn any() -> Result<Self> {
        Self::new(DeviceClass::All, 0, 1)
    }

    #[must_use]
    pub fn device_name(&self) -> &'static str {
        self.shared.device.name()
    }

    #[must_use]
    pub fn platform_name(&self) -> &'static str {
        self.shared.device.platform()
    }

    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Index of the queue subsequent enqueues go to, shared across clones.
    #[must_use]
    pub fn current_queue(&self) -> usize {
        self.shared.current.load(Ordering::Relaxed)
    }

    /// Redirects subsequent enqueues from every holder of this context to
    /// queue `index`.
    ///
    /// # Errors
    /// State error if `index` is not below [`Self::queue_count`].
    pub fn set_current_queue(&self, index: usize) -> Result<()> {
        if index >= self.shared.queues.len() {
            return Err(Error::State("queue index out of range"));
        }
        self.shared.current.store(index, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn device(&self) -> &Arc<Device> {
        &self.shared.device
    }

    /// The single funnel every operation goes through: resolve the
    /// dependency list, register a completion record, submit to the current
    /// queue. A rejected submission releases the record and leaves no trace.
    pub(crate) fn enqueue(&self, op: CommandOp, deps: &[&Event]) -> Result<Event> {
        let deps = event::wait_list(deps)?;
        let core = Arc::new(EventCore::new());
        let events = self.shared.device.events();
        let raw = events.register(Arc::clone(&core));
        let queue = &self.shared.queues[self.current_queue()];
        if let Err(code) = queue.submit(Enqueued {
            deps,
            op,
            done: core,
        }) {
            let _ = events.release(raw);
            return Err(code.into());
        }
        Ok(Event::from_raw(Arc::clone(&self.shared.device), raw))
    }
}
