use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use super::pool::PoolInner;
use super::state::CredentialId;

/// Min-heap of cooldown deadlines driving the background recovery task.
///
/// Entries are never removed when a cooldown is extended or cleared; the
/// recovery step re-checks the live state so superseded entries are no-ops.
#[derive(Debug)]
pub(crate) struct UnavailableQueue {
    heap: Mutex<BinaryHeap<Reverse<(Instant, CredentialId)>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl UnavailableQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) async fn push(&self, until: Instant, credential_id: CredentialId) {
        self.heap.lock().await.push(Reverse((until, credential_id)));
        // The task re-computes its next deadline on every wake.
        self.notify.notify_one();
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn spawn_recover_task(self: Arc<Self>, pool: Weak<PoolInner>) {
        tokio::spawn(async move {
            loop {
                if self.closed.load(Ordering::Acquire) {
                    break;
                }
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((t, _))| *t)
                };

                match next {
                    None => {
                        self.notify.notified().await;
                        continue;
                    }
                    Some(deadline) => {
                        tokio::select! {
                            _ = sleep_until(deadline) => {}
                            // An earlier deadline may have been pushed.
                            _ = self.notify.notified() => continue,
                        }
                    }
                }

                let now = Instant::now();
                let mut due = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((t, id))) = heap.peek().copied()
                        && t <= now
                    {
                        heap.pop();
                        due.push(id);
                    }
                }

                let Some(pool) = pool.upgrade() else {
                    break;
                };
                for id in due {
                    pool.recover_if_due(id, now).await;
                }
            }
            debug!("credential recovery task stopped");
        });
    }
}
