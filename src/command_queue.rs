//! Per-thread command queues and their registry
//!
//! ```text
//!   thread A ──► RingCommandQueue ─┐
//!   thread B ──► RingCommandQueue ─┼─► registry slots ──► rendering thread drains
//!   thread C ──► RingCommandQueue ─┘   (set once, never cleared)
//! ```
//!
//! Each producing thread leases one queue, found through a thread-local on
//! every call after the first. Registry slots are filled with a single
//! compare-and-swap and never cleared, so the rendering thread can walk them
//! without locking and stop at the first empty slot. When a thread exits its
//! queue goes to a pool and is handed to the next new thread instead of being
//! freed.

use crate::command::Command;
use crate::error::{SynthError, SynthResult};
use arc_swap::ArcSwapOption;
use crossbeam_queue::ArrayQueue;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Bounded FIFO of commands from one producer thread
pub struct RingCommandQueue {
    queue: ArrayQueue<Command>,
}

impl RingCommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Enqueue without blocking; a full queue hands the command back
    pub fn send(&self, cmd: Command) -> Result<(), Command> {
        self.queue.push(cmd)
    }

    pub fn pop(&self) -> Option<Command> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Lease held by a thread on one registry's queue; returned to the pool on thread exit
struct QueueLease {
    registry: Weak<CommandQueues>,
    registry_id: u64,
    queue: Arc<RingCommandQueue>,
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            // Pool capacity equals the slot count, so this never overflows
            let _ = registry.pool.push(Arc::clone(&self.queue));
        }
    }
}

thread_local! {
    static LEASES: RefCell<Vec<QueueLease>> = const { RefCell::new(Vec::new()) };
}

/// Registry of every thread's command queue for one synth
pub struct CommandQueues {
    id: u64,
    slots: Box<[ArcSwapOption<RingCommandQueue>]>,
    pool: ArrayQueue<Arc<RingCommandQueue>>,
    queue_capacity: usize,
}

impl CommandQueues {
    pub fn new(max_queues: usize, queue_capacity: usize) -> Self {
        let max_queues = max_queues.max(1);
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            slots: (0..max_queues).map(|_| ArcSwapOption::empty()).collect(),
            pool: ArrayQueue::new(max_queues),
            queue_capacity,
        }
    }

    /// The calling thread's queue, leasing one on first use
    pub fn current_thread_queue(self: &Arc<Self>) -> SynthResult<Arc<RingCommandQueue>> {
        LEASES.with(|leases| {
            let mut leases = leases.borrow_mut();
            if let Some(lease) = leases.iter().find(|l| l.registry_id == self.id) {
                return Ok(Arc::clone(&lease.queue));
            }

            let queue = match self.pool.pop() {
                Some(queue) => {
                    debug!("Reusing pooled command queue");
                    queue
                }
                None => {
                    let queue = Arc::new(RingCommandQueue::new(self.queue_capacity));
                    self.register(&queue)?;
                    queue
                }
            };

            leases.retain(|l| l.registry.strong_count() > 0);
            leases.push(QueueLease {
                registry: Arc::downgrade(self),
                registry_id: self.id,
                queue: Arc::clone(&queue),
            });
            Ok(queue)
        })
    }

    fn register(&self, queue: &Arc<RingCommandQueue>) -> SynthResult<()> {
        for slot in self.slots.iter() {
            if slot.load().is_some() {
                continue;
            }
            let previous = slot.compare_and_swap(&None::<Arc<RingCommandQueue>>, Some(Arc::clone(queue)));
            if previous.is_none() {
                return Ok(());
            }
        }
        error!("Maximum thread event queues exceeded");
        Err(SynthError::QueueLimit)
    }

    /// Number of registered queues
    pub fn registered(&self) -> usize {
        self.slots.iter().take_while(|s| s.load().is_some()).count()
    }

    /// Pop every queued command in per-queue FIFO order, queues in registration order
    ///
    /// Rendering thread only.
    pub fn drain(&self, mut apply: impl FnMut(Command)) {
        for slot in self.slots.iter() {
            let Some(queue) = slot.load_full() else {
                break;
            };
            while let Some(cmd) = queue.pop() {
                apply(cmd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiEventType;

    fn note_on(key: u32) -> Command {
        Command::Midi {
            kind: MidiEventType::NoteOn,
            chan: 0,
            param1: key,
            param2: 100,
        }
    }

    fn key_of(cmd: &Command) -> u32 {
        match cmd {
            Command::Midi { param1, .. } => *param1,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_ring_queue_bound() {
        let queue = RingCommandQueue::new(8);
        for key in 0..8 {
            assert!(queue.send(note_on(key)).is_ok());
        }
        let rejected = queue.send(note_on(99)).unwrap_err();
        assert_eq!(key_of(&rejected), 99);
        assert_eq!(queue.len(), 8);
        let drained: Vec<u32> = std::iter::from_fn(|| queue.pop()).map(|c| key_of(&c)).collect();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_thread_gets_same_queue() {
        let queues = Arc::new(CommandQueues::new(4, 16));
        let a = queues.current_thread_queue().unwrap();
        let b = queues.current_thread_queue().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(queues.registered(), 1);
    }

    #[test]
    fn test_exited_thread_queue_is_reused() {
        let queues = Arc::new(CommandQueues::new(1, 16));
        let first = {
            let queues = Arc::clone(&queues);
            std::thread::spawn(move || queues.current_thread_queue().map(|q| Arc::as_ptr(&q) as usize))
                .join()
                .unwrap()
                .unwrap()
        };
        let second = {
            let queues = Arc::clone(&queues);
            std::thread::spawn(move || queues.current_thread_queue().map(|q| Arc::as_ptr(&q) as usize))
                .join()
                .unwrap()
                .unwrap()
        };
        assert_eq!(first, second);
        assert_eq!(queues.registered(), 1);
    }

    #[test]
    fn test_registry_limit() {
        let queues = Arc::new(CommandQueues::new(1, 16));
        let _mine = queues.current_thread_queue().unwrap();
        let other = {
            let queues = Arc::clone(&queues);
            std::thread::spawn(move || queues.current_thread_queue().is_err())
                .join()
                .unwrap()
        };
        assert!(other);
    }

    #[test]
    fn test_drain_in_registration_order() {
        let queues = Arc::new(CommandQueues::new(4, 16));
        let mine = queues.current_thread_queue().unwrap();
        mine.send(note_on(1)).unwrap();
        mine.send(note_on(2)).unwrap();

        let handle = {
            let queues = Arc::clone(&queues);
            std::thread::spawn(move || {
                let q = queues.current_thread_queue().unwrap();
                q.send(note_on(10)).unwrap();
            })
        };
        handle.join().unwrap();

        let mut keys = Vec::new();
        queues.drain(|cmd| keys.push(key_of(&cmd)));
        assert_eq!(keys, vec![1, 2, 10]);
    }
}
