//! Client side of the voting site: a single-flight dispatcher for named
//! remote operations, the page controllers built on it, and the console
//! log poller.

pub mod console;
pub mod error;
pub mod pages;
pub mod single_flight;
pub mod transport;

pub use console::{ConsoleBuffer, ConsoleError, ConsoleEvent, ConsolePoller, PollSummary};
pub use error::{CallFailure, InvokeError};
pub use pages::{
    permalink_url, ClickResult, SaveButton, SaveButtonView, VoteButtonClass, VoteButtons,
    VoteButtonsView,
};
pub use single_flight::{CallOutcome, Callbacks, InFlight, SingleFlightCaller};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
