//! Component D: the single-threaded cooperative scheduler. Each `EventLoop`
//! owns a real OS thread and a pinned set of publications/subscriptions; it
//! never awaits, never touches a socket via tokio's reactor, and never
//! suspends except through [`aeroflux_core::BackoffIdleStrategy`]. This
//! matches §4.D and §5's "never block inside an event loop" rule more
//! literally than a tokio task would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use aeroflux_core::BackoffIdleStrategy;
use tracing::{debug, trace};

/// Anything an event loop can drive to completion once per tick: a
/// publication's send-algorithm step or a subscription's fragment poll.
pub trait Ticking: Send + Sync {
    /// Runs one unit of work. Returns whether it made progress, which feeds
    /// the idle strategy.
    fn tick(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

enum Command {
    Add(ResourceId, Arc<dyn Ticking>),
    Remove(ResourceId),
    Stop,
}

/// A handle to a running event-loop thread. Dropping the handle does not
/// stop the thread -- call [`EventLoop::stop_and_join`] for an orderly
/// shutdown, matching §4.D's "terminates only when its resource set is
/// empty and a stop-command has been seen".
pub struct EventLoop {
    name: String,
    sender: Sender<Command>,
    join_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl EventLoop {
    pub fn spawn(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let (sender, receiver) = std::sync::mpsc::channel();
        let thread_name = name.clone();
        let join_handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run(thread_name, receiver))
            .expect("spawn event-loop thread");

        Arc::new(Self {
            name,
            sender,
            join_handle: std::sync::Mutex::new(Some(join_handle)),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pins a resource to this loop. The returned id is used to remove it
    /// later; it is never reused.
    pub fn add(&self, resource: Arc<dyn Ticking>) -> ResourceId {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let _ = self.sender.send(Command::Add(id, resource));
        id
    }

    pub fn remove(&self, id: ResourceId) {
        let _ = self.sender.send(Command::Remove(id));
    }

    /// Enqueues the stop command and blocks the calling thread until the
    /// loop thread exits. Callers that must not block should run this via
    /// `spawn_blocking`.
    pub fn stop_and_join(&self) {
        let _ = self.sender.send(Command::Stop);
        if let Some(handle) = self.join_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn run(name: String, receiver: Receiver<Command>) {
    let mut resources: HashMap<ResourceId, Arc<dyn Ticking>> = HashMap::new();
    let mut idle = BackoffIdleStrategy::default();
    let mut stopping = false;

    debug!(loop_name = %name, "event loop started");
    loop {
        loop {
            match receiver.try_recv() {
                Ok(Command::Add(id, resource)) => {
                    resources.insert(id, resource);
                }
                Ok(Command::Remove(id)) => {
                    resources.remove(&id);
                }
                Ok(Command::Stop) => stopping = true,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    stopping = true;
                    break;
                }
            }
        }

        if stopping && resources.is_empty() {
            break;
        }

        let mut work_done = false;
        for resource in resources.values() {
            if resource.tick() {
                work_done = true;
            }
        }
        idle.idle(work_done);
        trace!(loop_name = %name, pinned = resources.len(), work_done, "tick");
    }
    debug!(loop_name = %name, "event loop stopped");
}
