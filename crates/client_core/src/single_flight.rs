//! Named remote operations with a single-flight guard.
//!
//! A [`SingleFlightCaller`] holds a set of registered operations and one busy
//! flag shared by all of them. At most one network call issued through an
//! instance is outstanding at any time; an `invoke` made while a call is in
//! flight is rejected, never queued.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

use crate::{
    error::{CallFailure, InvokeError},
    transport::{HttpRequest, HttpResponse, HttpTransport},
};

pub type StartCallback = Arc<dyn Fn() + Send + Sync>;
pub type SuccessCallback = Arc<dyn Fn(HttpResponse) + Send + Sync>;
pub type FailureCallback = Arc<dyn Fn(CallFailure) + Send + Sync>;

/// Lifecycle hooks of one operation. `on_start` runs synchronously inside
/// `invoke`; exactly one of the other two runs once the call resolves.
#[derive(Clone)]
pub struct Callbacks {
    pub on_start: StartCallback,
    pub on_success: SuccessCallback,
    pub on_failure: FailureCallback,
}

impl Callbacks {
    pub fn new(
        on_start: impl Fn() + Send + Sync + 'static,
        on_success: impl Fn(HttpResponse) + Send + Sync + 'static,
        on_failure: impl Fn(CallFailure) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_start: Arc::new(on_start),
            on_success: Arc::new(on_success),
            on_failure: Arc::new(on_failure),
        }
    }

    pub fn noop() -> Self {
        Self::new(|| {}, |_| {}, |_| {})
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct RegisteredOperation {
    name: String,
    method: String,
    url: String,
    callbacks: Callbacks,
}

/// How a dispatched call ended, after its callback has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Succeeded { status: u16 },
    NonSuccessStatus { status: u16 },
    TransportFailure,
}

impl CallOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Handle to a dispatched call. Dropping it does not cancel the call.
#[derive(Debug)]
pub struct InFlight {
    operation: String,
    handle: JoinHandle<CallOutcome>,
}

impl InFlight {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Waits for the network phase and the success/failure callback.
    /// Errors only if that callback panicked.
    pub async fn finished(self) -> Result<CallOutcome, JoinError> {
        self.handle.await
    }
}

struct Inner<T> {
    transport: T,
    operations: RwLock<HashMap<String, Arc<RegisteredOperation>>>,
    busy: AtomicBool,
}

impl<T: HttpTransport> Inner<T> {
    async fn complete(&self, operation: Arc<RegisteredOperation>) -> CallOutcome {
        let request = HttpRequest::new(operation.method.clone(), operation.url.clone());
        let result = self.transport.execute(request).await;
        self.busy.store(false, Ordering::Release);

        let callbacks = &operation.callbacks;
        match result {
            Ok(response) if response.is_success() => {
                let status = response.status;
                debug!(operation = %operation.name, status, "single-flight call succeeded");
                (callbacks.on_success)(response);
                CallOutcome::Succeeded { status }
            }
            Ok(response) => {
                let status = response.status;
                debug!(operation = %operation.name, status, "single-flight call got non-success status");
                (callbacks.on_failure)(CallFailure::NonSuccessStatus(response));
                CallOutcome::NonSuccessStatus { status }
            }
            Err(err) => {
                debug!(operation = %operation.name, error = %err, "single-flight call transport failure");
                (callbacks.on_failure)(CallFailure::Transport(err));
                CallOutcome::TransportFailure
            }
        }
    }
}

/// Releases the busy flag unless the claim reached the spawned task, so a
/// panicking `on_start` does not wedge the instance.
struct BusyClaim<'a> {
    busy: &'a AtomicBool,
    handed_off: bool,
}

impl<'a> BusyClaim<'a> {
    fn new(busy: &'a AtomicBool) -> Self {
        Self {
            busy,
            handed_off: false,
        }
    }

    fn hand_off(mut self) {
        self.handed_off = true;
    }
}

impl Drop for BusyClaim<'_> {
    fn drop(&mut self) {
        if !self.handed_off {
            self.busy.store(false, Ordering::Release);
        }
    }
}

/// Dispatcher instance. Clones share operations and the busy flag.
pub struct SingleFlightCaller<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SingleFlightCaller<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: HttpTransport + 'static> SingleFlightCaller<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                operations: RwLock::new(HashMap::new()),
                busy: AtomicBool::new(false),
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Stores `name`, replacing any earlier registration. Method and url are
    /// handed to the transport untouched.
    pub fn register(
        &self,
        name: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        callbacks: Callbacks,
    ) {
        let name = name.into();
        let operation = Arc::new(RegisteredOperation {
            name: name.clone(),
            method: method.into(),
            url: url.into(),
            callbacks,
        });
        self.write_operations().insert(name, operation);
    }

    /// Starts `name` unless it is unknown or a call is already in flight.
    ///
    /// On success `on_start` has already run when this returns and the
    /// request is issued from a spawned task, so this must be called from
    /// within a tokio runtime.
    pub fn invoke(&self, name: &str) -> Result<InFlight, InvokeError> {
        let operation = self
            .read_operations()
            .get(name)
            .cloned()
            .ok_or_else(|| InvokeError::UnknownOperation(name.to_string()))?;

        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(operation = name, "single-flight call rejected while busy");
            return Err(InvokeError::Busy(name.to_string()));
        }

        let claim = BusyClaim::new(&self.inner.busy);
        (operation.callbacks.on_start)();
        debug!(
            operation = name,
            method = %operation.method,
            url = %operation.url,
            "single-flight call dispatched"
        );

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.complete(operation).await });
        claim.hand_off();
        Ok(InFlight {
            operation: name.to_string(),
            handle,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read_operations().contains_key(name)
    }

    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_operations().keys().cloned().collect();
        names.sort();
        names
    }

    fn read_operations(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RegisteredOperation>>> {
        self.inner
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_operations(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RegisteredOperation>>> {
        self.inner
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/single_flight_tests.rs"]
mod tests;
