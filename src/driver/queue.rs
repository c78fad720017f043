//! Command queues of the reference device.
//!
//! One queue is one worker thread draining commands in submission order,
//! which gives the in-order guarantee the runtime layer documents for a
//! single queue. Ordering across queues exists only through the dependency
//! lists carried by each command.

use crate::driver::DriverCode;
use crate::driver::event::{CommandStatus, EventCore};
use crate::driver::memory::MemObject;
use crate::driver::program::{self, ArgSlot, KernelEntry, NdRange};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

/// Host destination pointer crossing into the worker.
///
/// The submitting side guarantees the pointee stays valid and untouched
/// until the paired completion record settles.
#[derive(Debug, Clone, Copy)]
pub struct HostPtr(pub *mut u8);

unsafe impl Send for HostPtr {}

#[derive(Debug)]
pub enum CommandOp {
    /// Packed read of `len` elements starting at element `offset`.
    Read {
        mem: Arc<MemObject>,
        elem_size: usize,
        offset: usize,
        len: usize,
        dst: HostPtr,
    },
    /// Packed write of the staged bytes starting at element `offset`.
    Write {
        mem: Arc<MemObject>,
        elem_size: usize,
        offset: usize,
        src: Vec<u8>,
    },
    Map {
        mem: Arc<MemObject>,
    },
    Unmap {
        mem: Arc<MemObject>,
    },
    Launch {
        entry: Arc<KernelEntry>,
        slots: Vec<ArgSlot>,
        range: NdRange,
    },
}

impl CommandOp {
    const fn label(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Map { .. } => "map",
            Self::Unmap { .. } => "unmap",
            Self::Launch { .. } => "launch",
        }
    }
}

/// A submitted command: dependencies to resolve, the operation, and the
/// completion record to settle.
#[derive(Debug)]
pub struct Enqueued {
    pub deps: Vec<Arc<EventCore>>,
    pub op: CommandOp,
    pub done: Arc<EventCore>,
}

enum Message {
    Submit(Enqueued),
    Shutdown,
}

/// One in-order command queue.
#[derive(Debug)]
pub struct CommandQueue {
    index: usize,
    tx: Sender<Message>,
    worker: Option<JoinHandle<()>>,
}

impl CommandQueue {
    pub fn spawn(index: usize) -> Result<Self, DriverCode> {
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name(format!("qcl-queue-{index}"))
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Submit(cmd) => run_command(index, cmd),
                        Message::Shutdown => break,
                    }
                }
            })
            .map_err(|_| DriverCode::OutOfResources)?;
        log::debug!("queue {index}: worker up");
        Ok(Self {
            index,
            tx,
            worker: Some(worker),
        })
    }

    /// Hands a command to the worker; returns as soon as it is queued.
    pub fn submit(&self, cmd: Enqueued) -> Result<(), DriverCode> {
        log::trace!("queue {}: submit {}", self.index, cmd.op.label());
        self.tx
            .send(Message::Submit(cmd))
            .map_err(|_| DriverCode::InvalidCommandQueue)
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("queue {}: worker exited abnormally", self.index);
            }
        }
    }
}

fn run_command(index: usize, cmd: Enqueued) {
    for dep in &cmd.deps {
        if dep.wait().is_err() {
            cmd.done.settle(CommandStatus::Failed(
                DriverCode::ExecStatusErrorForEventsInWaitList,
            ));
            return;
        }
    }
    cmd.done.set_running();
    let result = match cmd.op {
        CommandOp::Read {
            mem,
            elem_size,
            offset,
            len,
            dst,
        } => {
            unsafe { mem.read_packed(elem_size, offset, len, dst.0) };
            Ok(())
        }
        CommandOp::Write {
            mem,
            elem_size,
            offset,
            src,
        } => {
            unsafe { mem.write_packed(elem_size, offset, &src) };
            Ok(())
        }
        // Host visibility of reference-device memory is immediate; mapping
        // commands only exist to slot into the dependency graph.
        CommandOp::Map { .. } | CommandOp::Unmap { .. } => Ok(()),
        CommandOp::Launch {
            entry,
            slots,
            range,
        } => program::launch(&entry, &slots, &range),
    };
    match result {
        Ok(()) => cmd.done.settle(CommandStatus::Complete),
        Err(code) => {
            log::warn!("queue {index}: command failed: {code}");
            cmd.done.settle(CommandStatus::Failed(code));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(queue: &CommandQueue, deps: Vec<Arc<EventCore>>, op: CommandOp) -> Arc<EventCore> {
        let done = Arc::new(EventCore::new());
        queue
            .submit(Enqueued {
                deps,
                op,
                done: Arc::clone(&done),
            })
            .unwrap();
        done
    }

    #[test]
    fn write_then_read_in_order() {
        let queue = CommandQueue::spawn(0).unwrap();
        let mem = Arc::new(MemObject::buffer(8).unwrap());
        let payload = vec![1u8, 2, 3, 4, 5, 6, 7, 8];

        submit(
            &queue,
            vec![],
            CommandOp::Write {
                mem: Arc::clone(&mem),
                elem_size: 1,
                offset: 0,
                src: payload.clone(),
            },
        );
        let mut out = vec![0u8; 8];
        let read_done = submit(
            &queue,
            vec![],
            CommandOp::Read {
                mem,
                elem_size: 1,
                offset: 0,
                len: 8,
                dst: HostPtr(out.as_mut_ptr()),
            },
        );
        read_done.wait().unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn failed_dependency_fails_dependents() {
        let queue = CommandQueue::spawn(0).unwrap();
        let mem = Arc::new(MemObject::buffer(8).unwrap());

        let failed = Arc::new(EventCore::new());
        failed.settle(CommandStatus::Failed(DriverCode::OutOfResources));

        let done = submit(&queue, vec![failed], CommandOp::Map { mem });
        assert_eq!(
            done.wait().unwrap_err(),
            DriverCode::ExecStatusErrorForEventsInWaitList
        );
    }
}
