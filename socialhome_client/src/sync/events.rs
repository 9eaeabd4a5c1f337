use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::Sender;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    pub life: Duration,
}

/// Notifications for whatever renders the client state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Toast(Toast),
    /// Raised once a fetch has been running longer than the configured
    /// delay, lowered when the last slow fetch completes.
    Loading(bool),
    /// The server rejected the session; all streams were reset.
    SignedOut,
}

/// Raises the loading flag if it outlives `delay`. Dropping it cancels the
/// timer and lowers the flag when no other slow fetch is pending.
pub(crate) struct LoadingIndicator {
    timer: Option<JoinHandle<()>>,
    raised: Arc<AtomicBool>,
    visible: Arc<AtomicUsize>,
    events: Sender<SyncEvent>,
}

impl LoadingIndicator {
    pub(crate) fn start(
        delay: Duration,
        visible: Arc<AtomicUsize>,
        events: Sender<SyncEvent>,
    ) -> Self {
        let raised = Arc::new(AtomicBool::new(false));
        let timer = Handle::try_current().ok().map(|handle| {
            let raised = raised.clone();
            let visible = visible.clone();
            let events = events.clone();
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                raised.store(true, Ordering::SeqCst);
                if visible.fetch_add(1, Ordering::SeqCst) == 0 {
                    let _ = events.send(SyncEvent::Loading(true));
                }
            })
        });
        Self {
            timer,
            raised,
            visible,
            events,
        }
    }
}

impl Drop for LoadingIndicator {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.raised.swap(false, Ordering::SeqCst)
            && self.visible.fetch_sub(1, Ordering::SeqCst) == 1
        {
            let _ = self.events.send(SyncEvent::Loading(false));
        }
    }
}
