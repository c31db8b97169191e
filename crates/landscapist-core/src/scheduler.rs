//! Decode Scheduler
//!
//! Bounds concurrent decode work to `parallelism` permits and admits pending
//! work highest priority first, FIFO within a priority. Admission is driven
//! by events (submit, permit release, cancel, boost) under a single lock;
//! nothing polls.
//!
//! Cancelling running work flips its [`DecodeToken`] and resolves the handle
//! with [`SchedulerError::Cancelled`]. The permit stays held until the work
//! and every token it handed out are dropped, so blocking decoders that are
//! still winding down keep counting against `parallelism`.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::task::{Context, Poll};
use std::time::Instant;

use parking_lot::Mutex;
use smol::Task;
use smol::channel::{Sender, bounded};
use smol::future::FutureExt;

/// Default number of concurrent decodes
pub const DEFAULT_PARALLELISM: usize = 4;

/// Decode priority, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DecodePriority {
    Background,
    Low,
    #[default]
    Normal,
    High,
    /// Always at the head of the queue
    Immediate,
}

impl fmt::Display for DecodePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Background => "background",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Immediate => "immediate",
        };
        f.write_str(name)
    }
}

impl FromStr for DecodePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "immediate" => Ok(Self::Immediate),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A pending unit of work, ordered highest priority first, then by
/// submission
#[derive(Debug, Clone)]
pub struct PrioritizedRequest {
    pub id: String,
    pub priority: DecodePriority,
    pub created_at: Instant,
    pub seq: u64,
    pub tag: Option<String>,
}

impl Ord for PrioritizedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for PrioritizedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PrioritizedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PrioritizedRequest {}

/// Scheduler error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Decode {0} was cancelled")]
    Cancelled(String),

    #[error("Decode id {0} is already scheduled")]
    DuplicateId(String),
}

struct PendingEntry {
    request: PrioritizedRequest,
    admit: Sender<()>,
    cancel: Sender<()>,
    cancelled: Arc<AtomicBool>,
}

struct RunningEntry {
    seq: u64,
    tag: Option<String>,
    cancelled: Arc<AtomicBool>,
    /// Dropping this wakes the task with a cancellation
    _cancel: Sender<()>,
}

#[derive(Default)]
struct State {
    queue: BTreeSet<PrioritizedRequest>,
    pending: HashMap<String, PendingEntry>,
    running: HashMap<String, RunningEntry>,
    /// Sequence numbers of tasks holding a permit
    permits: HashSet<u64>,
    next_seq: u64,
}

impl State {
    fn remove_pending(&mut self, id: &str) -> Option<PendingEntry> {
        let entry = self.pending.remove(id)?;
        self.queue.remove(&entry.request);
        Some(entry)
    }

    fn cancel(&mut self, id: &str) -> bool {
        if let Some(entry) = self.remove_pending(id) {
            entry.cancelled.store(true, AtomicOrdering::Release);
            tracing::debug!("Cancelled pending decode {}", id);
            return true;
        }
        if let Some(entry) = self.running.remove(id) {
            entry.cancelled.store(true, AtomicOrdering::Release);
            tracing::debug!("Cancelled running decode {}", id);
            return true;
        }
        false
    }
}

struct Shared {
    state: Mutex<State>,
    parallelism: usize,
}

impl Shared {
    /// Admit the head of the queue while permits remain
    fn dispatch(&self, state: &mut State) {
        while state.permits.len() < self.parallelism {
            let Some(next) = state.queue.pop_first() else {
                break;
            };
            let Some(entry) = state.pending.remove(&next.id) else {
                continue;
            };
            if entry.admit.try_send(()).is_err() {
                // Handle was dropped while pending
                continue;
            }

            tracing::debug!("Admitted decode {} at {} priority", next.id, next.priority);
            state.permits.insert(next.seq);
            state.running.insert(
                next.id,
                RunningEntry {
                    seq: next.seq,
                    tag: next.tag,
                    cancelled: entry.cancelled,
                    _cancel: entry.cancel,
                },
            );
        }
    }
}

/// Shared by the scheduled task and its tokens; the last owner releases
/// whatever the work still holds
struct Registration {
    shared: Arc<Shared>,
    id: String,
    seq: u64,
    cancelled: Arc<AtomicBool>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if state.pending.get(&self.id).is_some_and(|e| e.request.seq == self.seq) {
            state.remove_pending(&self.id);
        }
        if state.running.get(&self.id).is_some_and(|e| e.seq == self.seq) {
            state.running.remove(&self.id);
        }
        if state.permits.remove(&self.seq) {
            self.shared.dispatch(&mut state);
        }
    }
}

/// Handed to admitted work so blocking code can notice cancellation
///
/// Holding a token keeps the work's permit.
#[derive(Clone)]
pub struct DecodeToken {
    registration: Arc<Registration>,
}

impl DecodeToken {
    pub fn id(&self) -> &str {
        &self.registration.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.registration.cancelled.load(AtomicOrdering::Acquire)
    }
}

impl fmt::Debug for DecodeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeToken")
            .field("id", &self.registration.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handle to scheduled work; resolves to the work's output or
/// [`SchedulerError`]. Dropping the handle abandons the work.
#[must_use = "dropping a ScheduledDecode abandons the work"]
pub struct ScheduledDecode<T> {
    id: String,
    cancelled: Arc<AtomicBool>,
    task: Task<Result<T, SchedulerError>>,
}

impl<T> ScheduledDecode<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set once the scheduler cancels this work
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }

    /// Let the work run to completion without awaiting it
    pub fn detach(self) {
        self.task.detach();
    }
}

impl<T> Future for ScheduledDecode<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx)
    }
}

/// Priority decode scheduler
///
/// Cheap to clone; clones share one queue and one set of permits.
#[derive(Clone)]
pub struct DecodeScheduler {
    shared: Arc<Shared>,
}

impl DecodeScheduler {
    pub fn new(parallelism: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                parallelism: parallelism.max(1),
            }),
        }
    }

    /// Queue `work` under `id`; it runs once admitted
    pub fn schedule<T, F>(
        &self,
        id: impl Into<String>,
        priority: DecodePriority,
        tag: Option<String>,
        work: F,
    ) -> ScheduledDecode<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        self.schedule_with(id, priority, tag, move |_| work)
    }

    /// Queue work built from a [`DecodeToken`] once admitted
    ///
    /// The permit is released when the returned future and every clone of
    /// the token are dropped.
    pub fn schedule_with<T, W, F>(
        &self,
        id: impl Into<String>,
        priority: DecodePriority,
        tag: Option<String>,
        work: W,
    ) -> ScheduledDecode<T>
    where
        T: Send + 'static,
        W: FnOnce(DecodeToken) -> F + Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let id = id.into();
        let (admit_tx, admit_rx) = bounded::<()>(1);
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let seq = {
            let mut state = self.shared.state.lock();
            if state.pending.contains_key(&id) || state.running.contains_key(&id) {
                tracing::warn!("Rejected duplicate decode id {}", id);
                let err = SchedulerError::DuplicateId(id.clone());
                return ScheduledDecode { id, cancelled, task: smol::spawn(async move { Err(err) }) };
            }

            state.next_seq += 1;
            let seq = state.next_seq;
            let request = PrioritizedRequest {
                id: id.clone(),
                priority,
                created_at: Instant::now(),
                seq,
                tag,
            };
            state.queue.insert(request.clone());
            state.pending.insert(
                id.clone(),
                PendingEntry {
                    request,
                    admit: admit_tx,
                    cancel: cancel_tx,
                    cancelled: Arc::clone(&cancelled),
                },
            );
            self.shared.dispatch(&mut state);
            seq
        };

        let registration = Arc::new(Registration {
            shared: Arc::clone(&self.shared),
            id: id.clone(),
            seq,
            cancelled: Arc::clone(&cancelled),
        });
        let task = smol::spawn(async move {
            // Held for the task's whole lifetime
            let registration = registration;
            if admit_rx.recv().await.is_err() {
                return Err(SchedulerError::Cancelled(registration.id.clone()));
            }

            let work = work(DecodeToken { registration: Arc::clone(&registration) });
            let cancelled_id = registration.id.clone();
            let cancelled = async move {
                let _ = cancel_rx.recv().await;
                Err(SchedulerError::Cancelled(cancelled_id))
            };
            cancelled.or(async move { Ok(work.await) }).await
        });

        ScheduledDecode { id, cancelled, task }
    }

    /// Raise a pending request's priority; never lowers it
    pub fn boost_priority(&self, id: &str, priority: DecodePriority) -> bool {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.pending.get_mut(id) else {
            return false;
        };
        if priority <= entry.request.priority {
            return false;
        }

        let old = entry.request.clone();
        entry.request.priority = priority;
        let boosted = entry.request.clone();
        state.queue.remove(&old);
        state.queue.insert(boosted);
        tracing::debug!("Boosted decode {} from {} to {}", id, old.priority, priority);
        self.shared.dispatch(&mut state);
        true
    }

    /// Cancel a pending or running request
    pub fn cancel(&self, id: &str) -> bool {
        let mut state = self.shared.state.lock();
        state.cancel(id)
    }

    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        let mut state = self.shared.state.lock();
        let ids: Vec<String> = state
            .pending
            .values()
            .filter(|e| e.request.tag.as_deref() == Some(tag))
            .map(|e| e.request.id.clone())
            .chain(
                state
                    .running
                    .iter()
                    .filter(|(_, e)| e.tag.as_deref() == Some(tag))
                    .map(|(id, _)| id.clone()),
            )
            .collect();
        ids.iter().filter(|id| state.cancel(id.as_str())).count()
    }

    /// Drop every request not yet admitted
    pub fn clear_pending(&self) -> usize {
        let mut state = self.shared.state.lock();
        let count = state.pending.len();
        for (_, entry) in state.pending.drain() {
            entry.cancelled.store(true, AtomicOrdering::Release);
        }
        state.queue.clear();
        if count > 0 {
            tracing::debug!("Cleared {} pending decodes", count);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Requests currently holding a permit
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().permits.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.shared.state.lock().pending.contains_key(id)
    }

    pub fn parallelism(&self) -> usize {
        self.shared.parallelism
    }
}

impl Default for DecodeScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, priority: DecodePriority, seq: u64) -> PrioritizedRequest {
        PrioritizedRequest {
            id: id.to_string(),
            priority,
            created_at: Instant::now(),
            seq,
            tag: None,
        }
    }

    #[test]
    fn test_priority_order() {
        assert!(DecodePriority::Immediate > DecodePriority::High);
        assert!(DecodePriority::Low > DecodePriority::Background);
        assert_eq!(DecodePriority::default(), DecodePriority::Normal);
        assert_eq!("HIGH".parse::<DecodePriority>(), Ok(DecodePriority::High));
    }

    #[test]
    fn test_request_order_priority_then_fifo() {
        let mut set = BTreeSet::new();
        set.insert(request("late-normal", DecodePriority::Normal, 3));
        set.insert(request("high", DecodePriority::High, 2));
        set.insert(request("early-normal", DecodePriority::Normal, 1));
        set.insert(request("now", DecodePriority::Immediate, 4));

        let order: Vec<_> = set.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, ["now", "high", "early-normal", "late-normal"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let scheduler = DecodeScheduler::new(1);
        let (_tx, rx) = bounded::<()>(1);
        let first = scheduler.schedule("a", DecodePriority::Normal, None, async move {
            let _ = rx.recv().await;
        });
        let second = scheduler.schedule("a", DecodePriority::Normal, None, async {});

        assert_eq!(smol::block_on(second), Err(SchedulerError::DuplicateId("a".into())));
        assert!(scheduler.cancel("a"));
        assert_eq!(smol::block_on(first), Err(SchedulerError::Cancelled("a".into())));
    }

    #[test]
    fn test_token_observes_cancel() {
        let scheduler = DecodeScheduler::new(1);
        let (token_tx, token_rx) = std::sync::mpsc::channel::<DecodeToken>();
        let (_hold, hold_rx) = bounded::<()>(1);
        let handle = scheduler.schedule_with("a", DecodePriority::Normal, None, move |token| {
            let _ = token_tx.send(token);
            async move {
                let _ = hold_rx.recv().await;
            }
        });

        let token = token_rx.recv().unwrap();
        assert_eq!(token.id(), "a");
        assert!(!token.is_cancelled());
        assert!(!handle.is_cancelled());

        assert!(scheduler.cancel("a"));
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
        assert_eq!(smol::block_on(handle), Err(SchedulerError::Cancelled("a".into())));

        // The outstanding token still holds the permit
        assert_eq!(scheduler.active_count(), 1);
        drop(token);
        assert_eq!(scheduler.active_count(), 0);
    }
}
