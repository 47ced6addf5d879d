//! Deferred release of GPU objects.
//!
//! CPU-side descriptions may be dropped on any thread. Their GPU counterparts are only ever
//! deleted by the render thread, which drains the queue once per frame.

use crossbeam_channel::{Receiver, Sender, TryIter, unbounded};
use parking_lot::Mutex;
use std::fmt::{Display, Formatter};
use tracing::trace;
use uuid::Uuid;

/// Identity of a CPU-side description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Release {
    Mesh(ResourceId),
    Texture(ResourceId),
    Shader(ResourceId),
}

/// Sending end of a release queue. Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct ReleaseSender(Sender<Release>);

impl ReleaseSender {
    /// Schedules the GPU objects built from a description for deletion on the next frame.
    pub fn release(&self, release: Release) {
        // the receiver only disappears together with the renderer, at which point
        // nothing is left to delete
        if self.0.send(release).is_err() {
            trace!("Dropped release of {release:?}, renderer is gone");
        }
    }
}

#[derive(Debug)]
pub struct ReleaseQueue {
    tx: Sender<Release>,
    rx: Receiver<Release>,
}

impl Default for ReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> ReleaseSender {
        ReleaseSender(self.tx.clone())
    }

    pub fn drain(&self) -> TryIter<'_, Release> {
        self.rx.try_iter()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Posts a [`Release`] to every renderer that built GPU objects from the owning description
/// once the description is dropped.
#[derive(Debug)]
pub struct ReleaseHook {
    release: Release,
    senders: Mutex<Vec<ReleaseSender>>,
}

impl ReleaseHook {
    pub fn new(release: Release) -> Self {
        Self {
            release,
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Registers a renderer's queue. Attaching the same queue twice is harmless since
    /// releasing an id that is already gone is a no-op.
    pub fn attach(&self, sender: &ReleaseSender) {
        let mut senders = self.senders.lock();
        if !senders.iter().any(|s| s.0.same_channel(&sender.0)) {
            senders.push(sender.clone());
        }
    }
}

impl Drop for ReleaseHook {
    fn drop(&mut self) {
        for sender in self.senders.get_mut().drain(..) {
            sender.release(self.release);
        }
    }
}
