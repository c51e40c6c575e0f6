//! Transfer lifecycle notifications
//!
//! Every fetch and store reports `Initiated`, then zero or more `Progress`
//! events, an `Error` if it failed, and always exactly one `Completed`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Get,
    Put,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Put => f.write_str("PUT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEventKind {
    Initiated,
    Progress,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub kind: TransferEventKind,
    pub request: RequestType,
    /// Normalized address of the resource being transferred.
    pub resource: String,
    /// Bytes moved by this progress step.
    pub length: u64,
    /// Bytes moved so far.
    pub transferred: u64,
    /// Declared size of the resource, once known.
    pub total_length: Option<u64>,
    pub error: Option<String>,
}

impl TransferEvent {
    fn new(kind: TransferEventKind, request: RequestType, resource: &str) -> Self {
        Self {
            kind,
            request,
            resource: resource.to_string(),
            length: 0,
            transferred: 0,
            total_length: None,
            error: None,
        }
    }

    /// Share of the declared length transferred so far, in percent.
    pub fn percent(&self) -> Option<u8> {
        match self.total_length {
            Some(0) => Some(100),
            Some(total) => Some((self.transferred.min(total) * 100 / total) as u8),
            None => None,
        }
    }
}

pub trait TransferListener: Send + Sync {
    fn transfer_progress(&self, event: &TransferEvent);
}

impl<F> TransferListener for F
where
    F: Fn(&TransferEvent) + Send + Sync,
{
    fn transfer_progress(&self, event: &TransferEvent) {
        self(event)
    }
}

/// Writes transfer events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl TransferListener for LoggingListener {
    fn transfer_progress(&self, event: &TransferEvent) {
        match event.kind {
            TransferEventKind::Initiated => debug!("{} {} initiated", event.request, event.resource),
            TransferEventKind::Progress => {
                if let Some(percent) = event.percent() {
                    debug!("{} {} {}%", event.request, event.resource, percent);
                }
            }
            TransferEventKind::Completed => info!(
                "{} {} completed ({} bytes)",
                event.request,
                event.resource,
                event.total_length.unwrap_or(event.transferred)
            ),
            TransferEventKind::Error => warn!(
                "{} {} failed: {}",
                event.request,
                event.resource,
                event.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Fans transfer events out to the registered listeners.
#[derive(Clone, Default)]
pub struct Notifier {
    listeners: Vec<Arc<dyn TransferListener>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn TransferListener>) {
        self.listeners.push(listener);
    }

    fn fire(&self, event: TransferEvent) {
        for listener in &self.listeners {
            listener.transfer_progress(&event);
        }
    }

    pub fn transfer_initiated(&self, resource: &str, request: RequestType) {
        self.fire(TransferEvent::new(TransferEventKind::Initiated, request, resource));
    }

    pub fn transfer_progress(
        &self,
        resource: &str,
        request: RequestType,
        length: u64,
        transferred: u64,
        total_length: u64,
    ) {
        self.fire(TransferEvent {
            length,
            transferred,
            total_length: Some(total_length),
            ..TransferEvent::new(TransferEventKind::Progress, request, resource)
        });
    }

    pub fn transfer_error(&self, resource: &str, request: RequestType, error: &dyn fmt::Display) {
        self.fire(TransferEvent {
            error: Some(error.to_string()),
            ..TransferEvent::new(TransferEventKind::Error, request, resource)
        });
    }

    pub fn transfer_completed(&self, resource: &str, request: RequestType, total_length: u64) {
        self.fire(TransferEvent {
            transferred: total_length,
            total_length: Some(total_length),
            ..TransferEvent::new(TransferEventKind::Completed, request, resource)
        });
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Keeps every event it receives, for assertions.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: std::sync::Mutex<Vec<TransferEvent>>,
}

#[cfg(test)]
impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn kinds(&self) -> Vec<TransferEventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }
}

#[cfg(test)]
impl TransferListener for RecordingListener {
    fn transfer_progress(&self, event: &TransferEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let mut event = TransferEvent::new(TransferEventKind::Progress, RequestType::Get, "s3://b/k");
        assert_eq!(event.percent(), None);

        event.total_length = Some(200);
        event.transferred = 50;
        assert_eq!(event.percent(), Some(25));

        event.total_length = Some(0);
        assert_eq!(event.percent(), Some(100));
    }

    #[test]
    fn test_notifier_fans_out() {
        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());
        let mut notifier = Notifier::new();
        notifier.add_listener(first.clone());
        notifier.add_listener(second.clone());

        notifier.transfer_initiated("s3://b/k", RequestType::Put);
        notifier.transfer_error("s3://b/k", RequestType::Put, &"boom");
        notifier.transfer_completed("s3://b/k", RequestType::Put, 0);

        let expected = vec![
            TransferEventKind::Initiated,
            TransferEventKind::Error,
            TransferEventKind::Completed,
        ];
        assert_eq!(first.kinds(), expected);
        assert_eq!(second.kinds(), expected);
        assert_eq!(first.events()[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        let mut notifier = Notifier::new();
        notifier.add_listener(Arc::new(move |_: &TransferEvent| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        notifier.transfer_progress("s3://b/k", RequestType::Get, 10, 10, 20);
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
