//! Polling reader for a server-side console log (`/readConsole`).

use std::time::Duration;

use shared::{
    domain::ConsoleId,
    protocol::{read_console_path, ConsoleFrame, ConsoleFrameError},
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::transport::{HttpRequest, HttpTransport, TransportError};

pub const CONSOLE_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const MISSING_CONSOLE_ID_MESSAGE: &str = "Error: No consoleId found in URL's query string.";
pub const MISPLACED_NULL_MESSAGE: &str =
    "Clientside error: Recieved response with null, but not at the end.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    Lines(Vec<String>),
    /// A message produced on the client side rather than read from the log.
    Notice(String),
    EndOfStream,
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("console read failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unreadable console frame: {0}")]
    Frame(#[source] ConsoleFrameError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polls: usize,
    pub lines: usize,
    pub finished: bool,
}

pub struct ConsolePoller<T> {
    transport: T,
    console_id: Option<ConsoleId>,
    interval: Duration,
}

impl<T: HttpTransport> ConsolePoller<T> {
    pub fn new(transport: T, console_id: Option<ConsoleId>) -> Self {
        Self {
            transport,
            console_id,
            interval: CONSOLE_POLL_INTERVAL,
        }
    }

    /// Takes the console id from the `id` query parameter of a page url.
    pub fn from_page_url(transport: T, page_url: &Url) -> Self {
        let console_id = page_url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| ConsoleId::new(value.into_owned()));
        Self::new(transport, console_id)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn console_id(&self) -> Option<&ConsoleId> {
        self.console_id.as_ref()
    }

    /// Polls until the log reports end of stream.
    ///
    /// A frame with a misplaced `null` is reported as a notice and polling
    /// goes on; transport failures, error statuses and bodies that are not
    /// console frames stop the loop.
    pub async fn run(
        &self,
        mut on_event: impl FnMut(ConsoleEvent),
    ) -> Result<PollSummary, ConsoleError> {
        let mut summary = PollSummary::default();
        let Some(console_id) = &self.console_id else {
            on_event(ConsoleEvent::Notice(MISSING_CONSOLE_ID_MESSAGE.to_string()));
            return Ok(summary);
        };

        loop {
            let response = self
                .transport
                .execute(HttpRequest::get(read_console_path(console_id)))
                .await?;
            summary.polls += 1;
            if !response.is_success() {
                return Err(ConsoleError::Status {
                    status: response.status,
                    body: response.body,
                });
            }

            match ConsoleFrame::decode(&response.body) {
                Ok(frame) => {
                    summary.lines += frame.lines.len();
                    let end_of_stream = frame.end_of_stream;
                    on_event(ConsoleEvent::Lines(frame.lines));
                    if end_of_stream {
                        info!(console = %console_id, lines = summary.lines, "console finished");
                        summary.finished = true;
                        on_event(ConsoleEvent::EndOfStream);
                        return Ok(summary);
                    }
                }
                Err(ConsoleFrameError::MisplacedNull { index, len }) => {
                    debug!(console = %console_id, index, len, "console frame with misplaced null");
                    on_event(ConsoleEvent::Notice(MISPLACED_NULL_MESSAGE.to_string()));
                }
                Err(err) => return Err(ConsoleError::Frame(err)),
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Accumulated console text, one line per entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleBuffer {
    text: String,
}

impl ConsoleBuffer {
    pub fn apply(&mut self, event: &ConsoleEvent) {
        match event {
            ConsoleEvent::Lines(lines) => self.append(&lines.join("\n")),
            ConsoleEvent::Notice(message) => self.append(message),
            ConsoleEvent::EndOfStream => {}
        }
    }

    pub fn append(&mut self, lines: &str) {
        if lines.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(lines);
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
