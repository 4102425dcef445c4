//! Outcome delivery for in-flight calls.
//!
//! [`RequestBuilder::execute`](crate::RequestBuilder::execute) starts the
//! exchange right away and hands back a [`ResponseHandle`]. Observers can be
//! attached at any point: the outcome is buffered, so a subscriber that
//! shows up after the call settled is replayed on registration. Every
//! observer receives exactly one terminal callback (success or error)
//! followed by `complete`.

use std::fmt;
use std::future::IntoFuture;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::Method;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::{HttpClientError, ResponseEnvelope, Result};

/// Lifecycle phase of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Headers and options are being negotiated.
    Configuring,
    /// `before` hooks are running.
    BeforeDispatch,
    /// The transport owns the exchange.
    Transmitting,
    /// `after` hooks are running.
    AfterDispatch,
    /// The outcome is being delivered.
    Terminal,
    /// Every observer has been notified.
    Complete,
}

type EnvelopeCallback = Box<dyn FnOnce(&ResponseEnvelope) + Send>;
type CompleteCallback = Box<dyn FnOnce() + Send>;

/// Three-phase observer.
#[derive(Default)]
pub struct Observer {
    success: Option<EnvelopeCallback>,
    error: Option<EnvelopeCallback>,
    complete: Option<CompleteCallback>,
}

impl Observer {
    /// Create an observer with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the envelope when the call resolves.
    pub fn on_success(mut self, f: impl FnOnce(&ResponseEnvelope) + Send + 'static) -> Self {
        self.success = Some(Box::new(f));
        self
    }

    /// Called with the envelope-shaped error when the call rejects.
    pub fn on_error(mut self, f: impl FnOnce(&ResponseEnvelope) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Called last, whatever the outcome.
    pub fn on_complete(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// Deliver the outcome. A panicking callback is logged and does not
    /// keep the remaining callbacks from running.
    fn notify(self, outcome: &Result<ResponseEnvelope>, url: &str) {
        match outcome {
            Ok(envelope) => {
                if let Some(success) = self.success {
                    isolate("success", url, || success(envelope));
                }
            }
            Err(error) => {
                if let Some(on_error) = self.error {
                    let envelope = error.to_envelope();
                    isolate("error", url, || on_error(&envelope));
                }
            }
        }
        if let Some(complete) = self.complete {
            isolate("complete", url, complete);
        }
    }
}

fn isolate(callback: &'static str, url: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(callback, url = %url, "Observer callback panicked");
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

struct State {
    phase: Phase,
    outcome: Option<Result<ResponseEnvelope>>,
    observers: Vec<Observer>,
}

struct Shared {
    url: String,
    method: Method,
    debug: bool,
    state: Mutex<State>,
    done: watch::Sender<bool>,
}

/// Observer-registration handle for one call.
#[derive(Clone)]
pub struct ResponseHandle {
    shared: Arc<Shared>,
}

impl ResponseHandle {
    pub(crate) fn new(url: String, method: Method, debug: bool) -> (Self, Emitter) {
        let (done, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            url,
            method,
            debug,
            state: Mutex::new(State {
                phase: Phase::Configuring,
                outcome: None,
                observers: Vec::new(),
            }),
            done,
        });
        (
            Self {
                shared: shared.clone(),
            },
            Emitter { shared },
        )
    }

    /// Attach an observer. Replayed immediately if the call already settled.
    pub fn subscribe(&self, observer: Observer) -> &Self {
        let replay = {
            let mut state = self.shared.state.lock();
            match &state.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    state.observers.push(observer);
                    return self;
                }
            }
        };
        if let Some(outcome) = replay {
            trace!(url = %self.shared.url, "Replaying outcome to late subscriber");
            observer.notify(&outcome, &self.shared.url);
        }
        self
    }

    /// Attach a success-only callback.
    pub fn handle(&self, f: impl FnOnce(&ResponseEnvelope) + Send + 'static) -> &Self {
        self.subscribe(Observer::new().on_success(f))
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    /// Check if every observer has been notified.
    pub fn is_complete(&self) -> bool {
        self.phase() == Phase::Complete
    }

    /// Wait for the outcome.
    pub async fn outcome(&self) -> Result<ResponseEnvelope> {
        let mut done = self.shared.done.subscribe();
        if done.wait_for(|finished| *finished).await.is_err() {
            return Err(self.lost());
        }
        self.shared
            .state
            .lock()
            .outcome
            .clone()
            .unwrap_or_else(|| Err(self.lost()))
    }

    fn lost(&self) -> HttpClientError {
        HttpClientError::Internal {
            url: self.shared.url.clone(),
            method: self.shared.method.clone(),
            message: "outcome was never delivered".to_string(),
        }
    }
}

impl IntoFuture for ResponseHandle {
    type Output = Result<ResponseEnvelope>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.outcome().await }.boxed()
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("url", &self.shared.url)
            .field("method", &self.shared.method)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Producer side of a [`ResponseHandle`], owned by the pipeline task.
pub(crate) struct Emitter {
    shared: Arc<Shared>,
}

impl Emitter {
    pub(crate) fn set_phase(&self, phase: Phase) {
        self.shared.state.lock().phase = phase;
        trace!(?phase, method = %self.shared.method, url = %self.shared.url, "Phase change");
        if self.shared.debug {
            debug!(?phase, method = %self.shared.method, url = %self.shared.url, "Request lifecycle");
        }
    }

    /// Buffer the outcome, notify pending observers, then mark the call complete.
    pub(crate) fn emit(self, outcome: Result<ResponseEnvelope>) {
        let observers = {
            let mut state = self.shared.state.lock();
            state.phase = Phase::Terminal;
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.observers)
        };
        if self.shared.debug {
            let event = if outcome.is_ok() { "success" } else { "error" };
            debug!(
                event,
                observers = observers.len(),
                method = %self.shared.method,
                url = %self.shared.url,
                "Emitting outcome"
            );
        }
        for observer in observers {
            observer.notify(&outcome, &self.shared.url);
        }
        self.set_phase(Phase::Complete);
        self.shared.done.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeaderStore, ResponseBody, default_validator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope(status: u16) -> ResponseEnvelope {
        ResponseEnvelope::new(
            "http://api/users",
            Method::GET,
            status,
            HeaderStore::new(),
            ResponseBody::Empty,
            &default_validator(),
        )
    }

    fn handle() -> (ResponseHandle, Emitter) {
        ResponseHandle::new("http://api/users".to_string(), Method::GET, false)
    }

    #[test]
    fn test_success_then_complete() {
        let (handle, emitter) = handle();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (success_log, complete_log) = (log.clone(), log.clone());
        handle.subscribe(
            Observer::new()
                .on_success(move |env| success_log.lock().push(format!("success {:?}", env.status())))
                .on_error(|_| panic!("no error expected"))
                .on_complete(move || complete_log.lock().push("complete".to_string())),
        );

        assert_eq!(handle.phase(), Phase::Configuring);
        emitter.emit(Ok(envelope(200)));

        assert_eq!(*log.lock(), vec!["success Some(200)", "complete"]);
        assert!(handle.is_complete());
    }

    #[test]
    fn test_error_gets_envelope_shape() {
        let (handle, emitter) = handle();
        let name = Arc::new(Mutex::new(None));
        let seen = name.clone();
        handle.subscribe(Observer::new().on_error(move |env| {
            if let ResponseBody::Error(data) = env.body() {
                *seen.lock() = Some((data.name.clone(), env.status()));
            }
        }));

        emitter.emit(Err(HttpClientError::Aborted {
            url: "http://api/users".to_string(),
            method: Method::GET,
        }));
        assert_eq!(*name.lock(), Some(("AbortError".to_string(), None)));
    }

    #[test]
    fn test_late_subscriber_is_replayed() {
        let (handle, emitter) = handle();
        emitter.emit(Ok(envelope(201)));

        let calls = Arc::new(AtomicUsize::new(0));
        let (success, complete) = (calls.clone(), calls.clone());
        handle.subscribe(
            Observer::new()
                .on_success(move |_| {
                    success.fetch_add(1, Ordering::SeqCst);
                })
                .on_complete(move || {
                    complete.fetch_add(10, Ordering::SeqCst);
                }),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 11);

        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();
        handle.handle(move |env| {
            assert_eq!(env.status(), Some(201));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_is_awaitable() {
        let (handle, emitter) = handle();
        let waiter = tokio::spawn(handle.clone().into_future());
        emitter.set_phase(Phase::Transmitting);
        assert_eq!(handle.phase(), Phase::Transmitting);
        emitter.emit(Ok(envelope(204)));

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.status(), Some(204));
        assert_eq!(handle.await.unwrap().status(), Some(204));
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_stop_delivery() {
        let (handle, emitter) = handle();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (first_complete, second_success, second_complete) = (log.clone(), log.clone(), log.clone());
        handle.subscribe(
            Observer::new()
                .on_success(|_| panic!("observer bug"))
                .on_complete(move || first_complete.lock().push("first complete")),
        );
        handle.subscribe(
            Observer::new()
                .on_success(move |_| second_success.lock().push("second success"))
                .on_complete(move || second_complete.lock().push("second complete")),
        );

        emitter.emit(Ok(envelope(200)));

        assert_eq!(*log.lock(), vec!["first complete", "second success", "second complete"]);
        assert!(handle.is_complete());
        assert_eq!(handle.outcome().await.unwrap().status(), Some(200));

        handle.subscribe(Observer::new().on_complete(|| panic!("late observer bug")));
        assert!(handle.is_complete());
    }
}
