use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use tokio_util::sync::CancellationToken;

use tracing::{debug, info};

use wiotp::response::{ResponseCode, is_success};

use crate::pending::Operation;
use crate::sync::lock;

/// The state of a management session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// The client is not registered for device management.
    Unmanaged,
    /// A registration request has been sent and awaits its response.
    Registering,
    /// The client is registered for device management.
    Managed,
    /// A deregistration request has been sent and awaits its response.
    Unregistering,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unmanaged => "unmanaged",
            Self::Registering => "registering",
            Self::Managed => "managed",
            Self::Unregistering => "unregistering",
        }
        .fmt(f)
    }
}

// Position of the session among the management requests.
#[derive(Debug)]
struct Ledger {
    // Bumped by every registration and deregistration.
    generation: u64,
    // Last state confirmed by the platform.
    settled: SessionState,
}

// Management session state machine.
//
// The state and the subscription acknowledgement are published through
// watch channels, so readiness gates are bounded waits on them.
//
// Registrations and deregistrations may overlap. Each one is tagged with a
// generation, and a failure only reverts the state set by the latest one.
#[derive(Debug)]
pub(crate) struct Session {
    state: watch::Sender<SessionState>,
    subscribed: watch::Sender<bool>,
    ledger: Mutex<Ledger>,
    renewal: Mutex<Option<CancellationToken>>,
    readiness_timeout: Duration,
}

impl Session {
    pub(crate) fn new(readiness_timeout: Duration) -> Self {
        Self {
            state: watch::Sender::new(SessionState::Unmanaged),
            subscribed: watch::Sender::new(false),
            ledger: Mutex::new(Ledger {
                generation: 0,
                settled: SessionState::Unmanaged,
            }),
            renewal: Mutex::new(None),
            readiness_timeout,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn transition(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session state: {previous} -> {state}");
        }
    }

    // Starts a registration and returns its generation.
    //
    // A renewal of an active lease keeps the session managed.
    pub(crate) fn begin_manage(&self) -> u64 {
        let mut ledger = lock(&self.ledger);
        ledger.generation += 1;
        if self.state() != SessionState::Managed {
            self.transition(SessionState::Registering);
        }
        ledger.generation
    }

    // Starts a deregistration and returns its generation.
    pub(crate) fn begin_unmanage(&self) -> u64 {
        let mut ledger = lock(&self.ledger);
        ledger.generation += 1;
        self.transition(SessionState::Unregistering);
        ledger.generation
    }

    // Applies the response to a management request.
    pub(crate) fn on_response(&self, operation: Operation, rc: ResponseCode) {
        match operation {
            Operation::Manage { generation } if is_success(rc) => {
                self.settle(generation, SessionState::Registering, SessionState::Managed);
            }
            Operation::Unmanage { generation } if is_success(rc) => {
                if self.settle(
                    generation,
                    SessionState::Unregistering,
                    SessionState::Unmanaged,
                ) {
                    self.cancel_renewal();
                }
            }
            operation => self.abort(operation),
        }
    }

    // Reverts the state set by a request that failed, expired or could not
    // be sent.
    //
    // Only the latest request reverts, and only while the session is still
    // in the transitional state it set.
    pub(crate) fn abort(&self, operation: Operation) {
        let (generation, transitional) = match operation {
            Operation::Manage { generation } => (generation, SessionState::Registering),
            Operation::Unmanage { generation } => (generation, SessionState::Unregistering),
            _ => return,
        };

        let ledger = lock(&self.ledger);
        if ledger.generation == generation && self.state() == transitional {
            self.transition(ledger.settled);
        } else {
            debug!("Outdated management request ignored");
        }
    }

    // Confirms the state reached by a successful request.
    //
    // A success of an older request still applies while the session is in
    // the transitional state the request leads out of.
    fn settle(&self, generation: u64, transitional: SessionState, state: SessionState) -> bool {
        let mut ledger = lock(&self.ledger);
        if ledger.generation != generation && self.state() != transitional {
            debug!("Outdated management response ignored");
            return false;
        }
        ledger.settled = state;
        self.transition(state);
        true
    }

    pub(crate) fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.send_replace(subscribed);
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        *self.subscribed.borrow()
    }

    // Waits until the subscriptions are acknowledged, at most for the
    // readiness timeout.
    pub(crate) async fn wait_subscribed(&self) -> bool {
        let mut subscribed = self.subscribed.subscribe();
        timeout(self.readiness_timeout, subscribed.wait_for(|ready| *ready))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    // Waits until the session is managed, at most for the readiness timeout.
    pub(crate) async fn wait_managed(&self) -> bool {
        let mut state = self.state.subscribe();
        timeout(
            self.readiness_timeout,
            state.wait_for(|state| *state == SessionState::Managed),
        )
        .await
        .is_ok_and(|result| result.is_ok())
    }

    // Schedules a lease renewal, replacing any previous one.
    pub(crate) fn schedule_renewal(&self, period: Duration, renew: impl FnOnce() + Send + 'static) {
        let token = CancellationToken::new();
        self.replace_renewal(Some(token.clone()));

        info!("Lease renewal scheduled in {} seconds", period.as_secs());
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = sleep(period) => renew(),
            }
        });
    }

    pub(crate) fn cancel_renewal(&self) {
        self.replace_renewal(None);
    }

    fn replace_renewal(&self, token: Option<CancellationToken>) {
        if let Some(previous) = std::mem::replace(&mut *lock(&self.renewal), token) {
            if !previous.is_cancelled() {
                debug!("Cancelling existing manage timer");
            }
            previous.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::pending::Operation;

    use super::{Session, SessionState};

    fn session() -> Session {
        Session::new(Duration::from_secs(10))
    }

    fn manage(session: &Session) -> Operation {
        Operation::Manage {
            generation: session.begin_manage(),
        }
    }

    fn unmanage(session: &Session) -> Operation {
        Operation::Unmanage {
            generation: session.begin_unmanage(),
        }
    }

    #[test]
    fn manage_transitions() {
        let session = session();

        let registration = manage(&session);
        assert_eq!(session.state(), SessionState::Registering);

        session.on_response(registration, 200);
        assert_eq!(session.state(), SessionState::Managed);

        // A renewal keeps the session managed.
        let renewal = manage(&session);
        assert_eq!(session.state(), SessionState::Managed);

        // A failed renewal leaves the state unchanged.
        session.on_response(renewal, 500);
        assert_eq!(session.state(), SessionState::Managed);

        let deregistration = unmanage(&session);
        assert_eq!(session.state(), SessionState::Unregistering);
        session.on_response(deregistration, 200);
        assert_eq!(session.state(), SessionState::Unmanaged);
    }

    #[test]
    fn failed_transitions() {
        let session = session();

        let registration = manage(&session);
        session.on_response(registration, 400);
        assert_eq!(session.state(), SessionState::Unmanaged);

        let registration = manage(&session);
        session.abort(registration);
        assert_eq!(session.state(), SessionState::Unmanaged);

        let registration = manage(&session);
        session.on_response(registration, 200);
        let deregistration = unmanage(&session);
        session.on_response(deregistration, 500);
        assert_eq!(session.state(), SessionState::Managed);

        // Other operations never change the session.
        session.on_response(Operation::AddLog, 200);
        assert_eq!(session.state(), SessionState::Managed);
    }

    #[test]
    fn outdated_failures() {
        let session = session();

        // An orphaned registration expires after a newer one succeeded.
        let orphan = manage(&session);
        let registration = manage(&session);
        session.on_response(registration, 200);
        session.abort(orphan);
        assert_eq!(session.state(), SessionState::Managed);

        let session = self::session();

        // The older registration succeeds, the newer one fails.
        let first = manage(&session);
        let second = manage(&session);
        session.on_response(first, 200);
        assert_eq!(session.state(), SessionState::Managed);
        session.on_response(second, 500);
        assert_eq!(session.state(), SessionState::Managed);

        let session = self::session();

        // Two registrations in flight, the older one fails first.
        let first = manage(&session);
        let second = manage(&session);
        session.on_response(first, 500);
        assert_eq!(session.state(), SessionState::Registering);
        session.on_response(second, 200);
        assert_eq!(session.state(), SessionState::Managed);
    }

    #[test]
    fn outdated_successes() {
        let session = session();

        let registration = manage(&session);
        session.on_response(registration, 200);

        // A registration answered after a newer deregistration succeeded.
        let renewal = manage(&session);
        let deregistration = unmanage(&session);
        session.on_response(deregistration, 200);
        session.on_response(renewal, 200);
        assert_eq!(session.state(), SessionState::Unmanaged);

        // The latest failure reverts to the last confirmed state.
        let registration = manage(&session);
        let retry = manage(&session);
        session.on_response(registration, 500);
        session.on_response(retry, 500);
        assert_eq!(session.state(), SessionState::Unmanaged);
    }

    #[tokio::test(start_paused = true)]
    async fn deregistration_cancels_renewal() {
        let session = session();
        let renewals = Arc::new(AtomicUsize::new(0));
        let schedule = |session: &Session| {
            let renewals = Arc::clone(&renewals);
            session.schedule_renewal(Duration::from_secs(3480), move || {
                renewals.fetch_add(1, Ordering::SeqCst);
            });
        };

        let registration = manage(&session);
        schedule(&session);
        session.on_response(registration, 200);

        // A rejected deregistration keeps the lease alive.
        let deregistration = unmanage(&session);
        session.on_response(deregistration, 500);
        tokio::time::sleep(Duration::from_secs(3481)).await;
        assert_eq!(renewals.load(Ordering::SeqCst), 1);

        schedule(&session);
        let deregistration = unmanage(&session);
        session.on_response(deregistration, 200);
        tokio::time::sleep(Duration::from_secs(3481)).await;
        assert_eq!(renewals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_gates() {
        let session = Arc::new(session());

        assert!(!session.wait_subscribed().await);
        assert!(!session.wait_managed().await);

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.wait_subscribed().await })
        };
        tokio::time::advance(Duration::from_secs(5)).await;
        session.set_subscribed(true);

        assert!(waiter.await.unwrap());
        assert!(session.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn single_renewal() {
        let session = session();
        let renewals = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let renewals = Arc::clone(&renewals);
            session.schedule_renewal(Duration::from_secs(3480), move || {
                renewals.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(3481)).await;
        assert_eq!(renewals.load(Ordering::SeqCst), 1);

        let cancelled = Arc::new(AtomicUsize::new(0));
        {
            let cancelled = Arc::clone(&cancelled);
            session.schedule_renewal(Duration::from_secs(3480), move || {
                cancelled.fetch_add(1, Ordering::SeqCst);
            });
        }
        session.cancel_renewal();

        tokio::time::sleep(Duration::from_secs(3481)).await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }
}
