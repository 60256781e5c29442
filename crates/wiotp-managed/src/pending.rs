use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;

use tokio::sync::oneshot;
use tokio::time::Instant;

use tracing::{error, info, warn};

use uuid::Uuid;

use wiotp::response::{ResponseCode, is_success};
use wiotp::topic::OutboundTopic;

use crate::sync::lock;

/// The outcome of a management request.
///
/// An outcome only tells whether a response arrived. A request without a
/// response may still complete on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The platform responded with the given response code.
    Responded(ResponseCode),
    /// The request has not been sent, either because the client was not
    /// ready or because there was nothing to notify.
    NotSent,
    /// No response arrived before the request expired.
    Expired,
    /// The client was shut down before a response arrived.
    Cancelled,
}

/// A handle to the completion of a management request.
#[derive(Debug)]
pub struct Completion(CompletionInner);

#[derive(Debug)]
enum CompletionInner {
    Ready(Outcome),
    Pending(oneshot::Receiver<Outcome>),
}

impl Completion {
    pub(crate) const fn ready(outcome: Outcome) -> Self {
        Self(CompletionInner::Ready(outcome))
    }

    pub(crate) const fn not_sent() -> Self {
        Self::ready(Outcome::NotSent)
    }

    /// Checks whether the outcome is already known without waiting.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.0, CompletionInner::Ready(_))
    }

    /// Waits for the [`Outcome`] of the request.
    pub async fn wait(self) -> Outcome {
        match self.0 {
            CompletionInner::Ready(outcome) => outcome,
            // A dropped sender means the table went away with the client.
            CompletionInner::Pending(receiver) => receiver.await.unwrap_or(Outcome::Cancelled),
        }
    }

    /// Waits for the [`Outcome`] of the request at most for the given time.
    ///
    /// If [`None`], the outcome is unknown.
    pub async fn wait_timeout(self, timeout: Duration) -> Option<Outcome> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

/// A client-initiated management operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    /// Registration, tagged with its session generation.
    Manage { generation: u64 },
    /// Deregistration, tagged with its session generation.
    Unmanage { generation: u64 },
    UpdateLocation,
    AddErrorCode,
    ClearErrorCodes,
    AddLog,
    ClearLog,
    Notify,
}

impl Operation {
    pub(crate) const fn topic(self) -> OutboundTopic {
        match self {
            Self::Manage { .. } => OutboundTopic::Manage,
            Self::Unmanage { .. } => OutboundTopic::Unmanage,
            Self::UpdateLocation => OutboundTopic::UpdateLocation,
            Self::AddErrorCode => OutboundTopic::AddErrorCode,
            Self::ClearErrorCodes => OutboundTopic::ClearErrorCodes,
            Self::AddLog => OutboundTopic::AddLog,
            Self::ClearLog => OutboundTopic::ClearLog,
            Self::Notify => OutboundTopic::Notify,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Manage { .. } => "Manage",
            Self::Unmanage { .. } => "Unmanage",
            Self::UpdateLocation => "Location update",
            Self::AddErrorCode => "Add error code",
            Self::ClearErrorCodes => "Clear error codes",
            Self::AddLog => "Add log",
            Self::ClearLog => "Clear log",
            Self::Notify => "Notify",
        }
    }

    // Logs the response to the operation.
    fn log_response(self, rc: ResponseCode, payload: &str) {
        if is_success(rc) {
            info!("[{rc}] {} action completed: {payload}", self.name());
        } else {
            error!("[{rc}] {} action failed: {payload}", self.name());
        }
    }
}

/// A request waiting for its response.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) operation: Operation,
    pub(crate) topic: String,
    pub(crate) payload: String,
    created: Instant,
    sender: oneshot::Sender<Outcome>,
}

impl PendingRequest {
    pub(crate) fn complete(self, outcome: Outcome) {
        if let Outcome::Responded(rc) = outcome {
            self.operation.log_response(rc, &self.payload);
        }
        // The caller may have dropped its handle.
        let _ = self.sender.send(outcome);
    }
}

/// Requests waiting for a response, indexed by their correlation
/// identifier.
#[derive(Debug, Default)]
pub(crate) struct PendingTable(Mutex<HashMap<Uuid, PendingRequest>>);

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingRequest>> {
        lock(&self.0)
    }

    /// Registers a request and returns the handle to its completion.
    pub(crate) fn register(
        &self,
        id: Uuid,
        operation: Operation,
        topic: String,
        payload: String,
    ) -> Completion {
        let (sender, receiver) = oneshot::channel();
        let request = PendingRequest {
            operation,
            topic,
            payload,
            created: Instant::now(),
            sender,
        };

        let mut requests = self.lock();
        debug_assert!(
            !requests.contains_key(&id),
            "Request identifier {id} is already pending"
        );
        match requests.entry(id) {
            Entry::Vacant(entry) => {
                entry.insert(request);
            }
            Entry::Occupied(_) => {
                error!("Request identifier {id} is already pending, the new request is dropped");
                return Completion::not_sent();
            }
        }

        Completion(CompletionInner::Pending(receiver))
    }

    /// Removes a request without completing it.
    pub(crate) fn remove(&self, id: &Uuid) -> Option<PendingRequest> {
        self.lock().remove(id)
    }

    /// Removes a request and completes it with a response code.
    ///
    /// The operation of the request is passed to `on_response` before its
    /// completion is signaled. Returns whether a request was pending under
    /// the identifier.
    pub(crate) fn resolve(
        &self,
        id: &Uuid,
        rc: ResponseCode,
        on_response: impl FnOnce(Operation),
    ) -> bool {
        let Some(request) = self.remove(id) else {
            warn!("Received unexpected response from device management: {id}");
            return false;
        };
        on_response(request.operation);
        request.complete(Outcome::Responded(rc));
        info!(
            "Remaining unprocessed device management requests: {}",
            self.len()
        );
        true
    }

    /// Expires every request older than the given age.
    ///
    /// Returns the expired requests.
    pub(crate) fn reap(&self, max_age: Duration) -> Vec<PendingRequest> {
        let now = Instant::now();
        self.lock()
            .extract_if(|_, request| now.saturating_duration_since(request.created) >= max_age)
            .map(|(id, request)| {
                warn!(
                    "Request {id} on `{}` expired without response",
                    request.topic
                );
                request
            })
            .collect()
    }

    /// Removes all pending requests.
    pub(crate) fn drain(&self) -> Vec<PendingRequest> {
        self.lock().drain().map(|(_, request)| request).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &Uuid) -> bool {
        self.lock().contains_key(id)
    }
}
