//! In-memory transport whose replies are released by the test.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

pub(crate) type Reply = Result<HttpResponse, TransportError>;

pub(crate) struct GatedTransport {
    calls: Arc<Mutex<Vec<HttpRequest>>>,
    replies: AsyncMutex<mpsc::UnboundedReceiver<Reply>>,
}

#[derive(Clone)]
pub(crate) struct TransportHandle {
    calls: Arc<Mutex<Vec<HttpRequest>>>,
    replies: mpsc::UnboundedSender<Reply>,
}

impl GatedTransport {
    pub(crate) fn new() -> (Self, TransportHandle) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                calls: Arc::clone(&calls),
                replies: AsyncMutex::new(rx),
            },
            TransportHandle { calls, replies: tx },
        )
    }
}

#[async_trait]
impl HttpTransport for GatedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        self.calls.lock().expect("calls").push(request);
        let mut replies = self.replies.lock().await;
        replies.recv().await.unwrap_or(Err(TransportError::Connection {
            url,
            reason: "test transport closed".into(),
        }))
    }
}

impl TransportHandle {
    pub(crate) fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().expect("calls").clone()
    }

    pub(crate) fn reply(&self, reply: Reply) {
        self.replies.send(reply).expect("transport alive");
    }

    pub(crate) fn ok(&self, body: &str) {
        self.reply(Ok(HttpResponse::new(200, body)));
    }

    pub(crate) fn status(&self, status: u16, body: &str) {
        self.reply(Ok(HttpResponse::new(status, body)));
    }

    pub(crate) fn connection_refused(&self) {
        self.reply(Err(TransportError::Connection {
            url: "http://127.0.0.1:9/".into(),
            reason: "connection refused".into(),
        }));
    }

    pub(crate) async fn wait_for_calls(&self, count: usize) {
        while self.calls.lock().expect("calls").len() < count {
            tokio::task::yield_now().await;
        }
    }
}

/// Ordered log of lifecycle callback invocations.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.0.lock().expect("events").push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().expect("events").clone()
    }
}
