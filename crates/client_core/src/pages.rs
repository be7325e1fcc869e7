//! Page controllers built on [`SingleFlightCaller`]: the save button, the
//! vote buttons and the permalink of a post.
//!
//! Each controller owns its own dispatcher instance and publishes what the
//! page should display on a `watch` channel.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{PostId, VoteDirection},
    protocol::{permalink_path, vote_path, SAVE_ROUTE},
};
use tokio::sync::watch;
use url::Url;

use crate::{
    error::{CallFailure, InvokeError},
    single_flight::{Callbacks, InFlight, SingleFlightCaller},
    transport::{HttpResponse, HttpTransport},
};

pub const SAVE_OPERATION: &str = "save";
pub const SAVE_RESET_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveButtonView {
    Ready,
    Saving,
    Done,
    Failed,
}

impl SaveButtonView {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ready => "Click here to save votes.",
            Self::Saving => "Saving...",
            Self::Done => "Done!",
            Self::Failed => "Failed.",
        }
    }

    pub fn is_clickable(self) -> bool {
        self == Self::Ready
    }
}

#[derive(Debug)]
pub enum ClickResult {
    /// The button was not clickable in its current state.
    Ignored,
    Dispatched(InFlight),
    Rejected(InvokeError),
}

impl From<Result<InFlight, InvokeError>> for ClickResult {
    fn from(value: Result<InFlight, InvokeError>) -> Self {
        match value {
            Ok(in_flight) => Self::Dispatched(in_flight),
            Err(err) => Self::Rejected(err),
        }
    }
}

pub struct SaveButton<T> {
    caller: SingleFlightCaller<T>,
    view: Arc<watch::Sender<SaveButtonView>>,
}

impl<T: HttpTransport + 'static> SaveButton<T> {
    pub fn new(transport: T) -> Self {
        Self::with_reset_delay(transport, SAVE_RESET_DELAY)
    }

    pub fn with_reset_delay(transport: T, reset_delay: Duration) -> Self {
        let caller = SingleFlightCaller::new(transport);
        let (view, _) = watch::channel(SaveButtonView::Ready);
        let view = Arc::new(view);

        let on_start = {
            let view = Arc::clone(&view);
            move || {
                view.send_replace(SaveButtonView::Saving);
            }
        };
        let on_success = {
            let view = Arc::clone(&view);
            move |_: HttpResponse| settle(&view, SaveButtonView::Done, reset_delay)
        };
        let on_failure = {
            let view = Arc::clone(&view);
            move |_: CallFailure| settle(&view, SaveButtonView::Failed, reset_delay)
        };
        caller.register(
            SAVE_OPERATION,
            "GET",
            SAVE_ROUTE,
            Callbacks::new(on_start, on_success, on_failure),
        );

        Self { caller, view }
    }

    pub fn click(&self) -> ClickResult {
        if !self.view().is_clickable() {
            return ClickResult::Ignored;
        }
        self.caller.invoke(SAVE_OPERATION).into()
    }

    pub fn view(&self) -> SaveButtonView {
        *self.view.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveButtonView> {
        self.view.subscribe()
    }

    pub fn caller(&self) -> &SingleFlightCaller<T> {
        &self.caller
    }
}

fn settle(view: &Arc<watch::Sender<SaveButtonView>>, shown: SaveButtonView, reset_delay: Duration) {
    view.send_replace(shown);
    let view = Arc::clone(view);
    tokio::spawn(async move {
        tokio::time::sleep(reset_delay).await;
        view.send_replace(SaveButtonView::Ready);
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoteButtonClass {
    #[default]
    Inactive,
    Loading,
    Active,
}

impl VoteButtonClass {
    pub fn css_class(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Loading => "loading",
            Self::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteButtonsView {
    pub upvote: VoteButtonClass,
    pub downvote: VoteButtonClass,
}

impl VoteButtonsView {
    pub fn class(&self, direction: VoteDirection) -> VoteButtonClass {
        match direction {
            VoteDirection::Up => self.upvote,
            VoteDirection::Down => self.downvote,
        }
    }

    fn set(&mut self, direction: VoteDirection, class: VoteButtonClass) {
        match direction {
            VoteDirection::Up => self.upvote = class,
            VoteDirection::Down => self.downvote = class,
        }
    }
}

/// Up/down vote buttons of one post. Both directions share one dispatcher,
/// so an upvote in flight blocks a downvote and vice versa.
pub struct VoteButtons<T> {
    post_id: PostId,
    caller: SingleFlightCaller<T>,
    view: Arc<watch::Sender<VoteButtonsView>>,
}

impl<T: HttpTransport + 'static> VoteButtons<T> {
    pub fn new(transport: T, post_id: PostId) -> Self {
        let caller = SingleFlightCaller::new(transport);
        let (view, _) = watch::channel(VoteButtonsView::default());
        let view = Arc::new(view);

        for direction in [VoteDirection::Up, VoteDirection::Down] {
            caller.register(
                direction.operation_name(),
                "GET",
                vote_path(post_id, direction),
                vote_callbacks(&view, direction),
            );
        }

        Self {
            post_id,
            caller,
            view,
        }
    }

    pub fn post_id(&self) -> PostId {
        self.post_id
    }

    pub fn vote(&self, direction: VoteDirection) -> Result<InFlight, InvokeError> {
        self.caller.invoke(direction.operation_name())
    }

    pub fn upvote(&self) -> Result<InFlight, InvokeError> {
        self.vote(VoteDirection::Up)
    }

    pub fn downvote(&self) -> Result<InFlight, InvokeError> {
        self.vote(VoteDirection::Down)
    }

    /// `a` upvotes and `z` downvotes; any other key is ignored.
    pub fn handle_key(&self, key: char) -> Option<Result<InFlight, InvokeError>> {
        match key {
            'a' => Some(self.upvote()),
            'z' => Some(self.downvote()),
            _ => None,
        }
    }

    pub fn view(&self) -> VoteButtonsView {
        *self.view.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoteButtonsView> {
        self.view.subscribe()
    }

    pub fn caller(&self) -> &SingleFlightCaller<T> {
        &self.caller
    }
}

fn vote_callbacks(
    view: &Arc<watch::Sender<VoteButtonsView>>,
    direction: VoteDirection,
) -> Callbacks {
    let on_start = {
        let view = Arc::clone(view);
        move || view.send_modify(|v| v.set(direction, VoteButtonClass::Loading))
    };
    let on_success = {
        let view = Arc::clone(view);
        move |_: HttpResponse| {
            view.send_modify(|v| {
                v.set(direction, VoteButtonClass::Active);
                v.set(direction.opposite(), VoteButtonClass::Inactive);
            })
        }
    };
    let on_failure = {
        let view = Arc::clone(view);
        move |_: CallFailure| view.send_modify(|v| v.set(direction, VoteButtonClass::Inactive))
    };
    Callbacks::new(on_start, on_success, on_failure)
}

pub fn permalink_url(base_url: &Url, post_id: PostId) -> Result<Url, url::ParseError> {
    base_url.join(&permalink_path(post_id))
}

#[cfg(test)]
#[path = "tests/pages_tests.rs"]
mod tests;
