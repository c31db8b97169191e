//! Request lifecycle
//!
//! Tracks in-flight loads so they can be cancelled by id, tag, model or all
//! at once. Jobs drop out of the active set on their own when they finish.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use landscapist_net::ImageModel;
use parking_lot::Mutex;
use smol::channel::{Receiver, Sender, bounded};
use smol::future::FutureExt;

/// Handle to cancellable work
#[async_trait]
pub trait Disposable: Send + Sync {
    /// True once the work finished or was cancelled
    fn is_disposed(&self) -> bool;

    /// Request cancellation without waiting for it
    fn dispose(&self);

    /// Wait until the work has stopped
    async fn wait(&self);
}

/// Disposable for results produced synchronously
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDisposable;

#[async_trait]
impl Disposable for ImmediateDisposable {
    fn is_disposed(&self) -> bool {
        true
    }

    fn dispose(&self) {}

    async fn wait(&self) {}
}

struct ActiveRequest {
    tag: Option<String>,
    model: Option<ImageModel>,
    /// Dropping this cancels the job
    _cancel: Sender<()>,
}

struct Shared {
    active: Mutex<HashMap<u64, ActiveRequest>>,
    next_id: AtomicU64,
}

impl Shared {
    fn cancel_where(&self, predicate: impl Fn(&ActiveRequest) -> bool) -> usize {
        let mut active = self.active.lock();
        let before = active.len();
        active.retain(|_, request| !predicate(request));
        before - active.len()
    }
}

/// Removes the job from the active set and signals completion on drop
struct Completion {
    shared: Arc<Shared>,
    id: u64,
    _done: Sender<()>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.shared.active.lock().remove(&self.id);
    }
}

/// [`Disposable`] for a job registered with a [`RequestManager`]
pub struct RequestDisposable {
    id: u64,
    shared: Arc<Shared>,
    done: Receiver<()>,
}

impl RequestDisposable {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Disposable for RequestDisposable {
    fn is_disposed(&self) -> bool {
        !self.shared.active.lock().contains_key(&self.id)
    }

    fn dispose(&self) {
        if self.shared.active.lock().remove(&self.id).is_some() {
            tracing::debug!("Disposed request {}", self.id);
        }
    }

    async fn wait(&self) {
        // Closed once the job's future has been dropped
        let _ = self.done.recv().await;
    }
}

/// Registry of in-flight requests
#[derive(Clone)]
pub struct RequestManager {
    shared: Arc<Shared>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                active: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Spawn `job` and track it until it finishes or is cancelled
    pub fn register<F>(&self, job: F, tag: Option<String>, model: Option<ImageModel>) -> RequestDisposable
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        self.shared.active.lock().insert(id, ActiveRequest { tag, model, _cancel: cancel_tx });

        let completion = Completion { shared: Arc::clone(&self.shared), id, _done: done_tx };
        smol::spawn(async move {
            let _completion = completion;
            let cancelled = async move {
                let _ = cancel_rx.recv().await;
                tracing::debug!("Request {} cancelled", id);
            };
            cancelled.or(job).await;
        })
        .detach();

        RequestDisposable { id, shared: Arc::clone(&self.shared), done: done_rx }
    }

    pub fn cancel(&self, id: u64) -> bool {
        self.shared.active.lock().remove(&id).is_some()
    }

    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        self.shared.cancel_where(|r| r.tag.as_deref() == Some(tag))
    }

    pub fn cancel_by_model(&self, model: &ImageModel) -> usize {
        self.shared.cancel_where(|r| r.model.as_ref() == Some(model))
    }

    pub fn cancel_all(&self) -> usize {
        let count = self.shared.cancel_where(|_| true);
        if count > 0 {
            tracing::info!("Cancelled {} requests", count);
        }
        count
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.lock().len()
    }

    pub fn is_active(&self, id: u64) -> bool {
        self.shared.active.lock().contains_key(&id)
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}
