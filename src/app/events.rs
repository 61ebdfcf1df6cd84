use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::app::models::DownloadProgress;

pub type ProgressSubscriber = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

/// Publish-subscribe channel carrying download progress to whatever shell is
/// hosting the core. The core never knows what a subscriber does with the
/// payload; the UI owns its own display lifecycle.
#[derive(Default)]
pub struct ProgressBus {
    subscribers: Mutex<Vec<(u64, ProgressSubscriber)>>,
    next_token: Mutex<u64>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns a token for `unsubscribe`.
    pub fn subscribe(&self, subscriber: ProgressSubscriber) -> u64 {
        let token = {
            let mut next = self.next_token.lock().unwrap_or_else(|err| err.into_inner());
            *next += 1;
            *next
        };
        self.subscribers
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push((token, subscriber));
        token
    }

    pub fn unsubscribe(&self, token: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .retain(|(existing, _)| *existing != token);
    }

    pub fn emit(&self, progress: &DownloadProgress) {
        let subscribers = {
            let guard = self.subscribers.lock().unwrap_or_else(|err| err.into_inner());
            guard.iter().map(|(_, sub)| Arc::clone(sub)).collect::<Vec<_>>()
        };
        if subscribers.is_empty() {
            warn!(name = %progress.name, status = ?progress.status, "progress emitted with no subscribers");
        }
        for subscriber in subscribers {
            subscriber(progress);
        }
    }
}
