// ============================================
// Delivery Scheduler
// ============================================
//
// Timer queue for notifications whose optimal delivery time is in the
// future. Entries order by due time (priority breaks ties), the worker
// drains due batches without blocking waits, and cancellation is an
// idempotent removal. Re-entry goes back through the full decision
// pipeline, not straight to dispatch.

use crate::models::Notification;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ScheduledEntry {
    notification_id: Uuid,
    due_at: DateTime<Utc>,
    priority_rank: u8,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.notification_id == other.notification_id
    }
}

impl Eq for ScheduledEntry {}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest due first; BinaryHeap is a max-heap, so reverse the
        // time comparison. Ties go to the higher priority.
        other
            .due_at
            .cmp(&self.due_at)
            .then(self.priority_rank.cmp(&other.priority_rank))
    }
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SchedulerState {
    queue: BinaryHeap<ScheduledEntry>,
    pending: HashMap<Uuid, Notification>,
}

pub struct DeliveryScheduler {
    state: Mutex<SchedulerState>,
    notify: Notify,
}

impl DeliveryScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                queue: BinaryHeap::new(),
                pending: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Queue a notification for future processing. Re-scheduling an id
    /// replaces the stored notification; the stale heap entry is skipped
    /// at drain time.
    pub fn schedule(&self, notification: Notification, due_at: DateTime<Utc>) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        let entry = ScheduledEntry {
            notification_id: notification.id,
            due_at,
            priority_rank: notification.priority.rank(),
        };
        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            due_at = %due_at,
            "Notification scheduled"
        );
        state.pending.insert(notification.id, notification);
        state.queue.push(entry);
        drop(state);
        self.notify.notify_one();
    }

    /// Idempotent removal: cancelling an unknown or already-drained id
    /// is a no-op.
    pub fn cancel(&self, notification_id: Uuid) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        if state.pending.remove(&notification_id).is_some() {
            debug!(notification_id = %notification_id, "Scheduled notification cancelled");
        }
    }

    /// Pop every entry due at or before `now`, skipping cancelled and
    /// superseded entries.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        let mut due = Vec::new();
        while let Some(entry) = state.queue.peek() {
            if entry.due_at > now {
                break;
            }
            let entry = match state.queue.pop() {
                Some(entry) => entry,
                None => break,
            };
            if let Some(notification) = state.pending.remove(&entry.notification_id) {
                due.push(notification);
            }
        }
        due
    }

    /// Time of the next live entry, if any
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().expect("scheduler lock poisoned");
        state
            .queue
            .iter()
            .filter(|e| state.pending.contains_key(&e.notification_id))
            .map(|e| e.due_at)
            .min()
    }

    pub fn pending_len(&self) -> usize {
        self.state
            .lock()
            .expect("scheduler lock poisoned")
            .pending
            .len()
    }

    pub fn erase_user(&self, user_id: Uuid) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        state.pending.retain(|_, n| n.user_id != user_id);
    }

    /// Sleep until the next entry is due or the queue changes, then
    /// return the due batch. Never busy-waits and never blocks a worker
    /// on an empty queue.
    pub async fn wait_due(&self) -> Vec<Notification> {
        loop {
            let now = Utc::now();
            let due = self.drain_due(now);
            if !due.is_empty() {
                return due;
            }
            match self.next_due() {
                Some(next) => {
                    let wait = (next - now).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

impl Default for DeliveryScheduler {
    fn default() -> Self {
        Self::new()
    }
}
