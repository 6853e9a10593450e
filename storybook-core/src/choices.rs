//! Branch choices for the current page.
//!
//! The engine shows the fixed default set immediately and swaps in the
//! server's proposals if they arrive in time. Selecting a choice starts the
//! one and only resolution allowed in flight; the controller performs the
//! network call and reports back through [`ChoiceEngine::finish_resolution`].

use crate::story::{Choice, Story};
use storybook_api::Error as ApiError;
use tracing::{debug, warn};

/// Where the engine is in its cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceState {
    Idle,
    /// Defaults are displayed while server proposals are fetched.
    Loading {
        page: usize,
        ticket: u64,
        choices: Vec<Choice>,
    },
    Displaying {
        page: usize,
        choices: Vec<Choice>,
    },
    /// A selected choice is being turned into a scene.
    Resolving {
        page: usize,
        ticket: u64,
        choice: Choice,
    },
}

/// Ask the backend for proposals for `page`; hand the result back with the same ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestionRequest {
    pub page: usize,
    pub ticket: u64,
}

/// A selected choice waiting to be turned into a scene.
///
/// The ticket is handed back to [`ChoiceEngine::finish_resolution`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub page: usize,
    pub ticket: u64,
    pub choice: Choice,
}

/// Proposes branch choices and arbitrates their resolution.
#[derive(Debug)]
pub struct ChoiceEngine {
    state: ChoiceState,
    next_ticket: u64,
}

impl Default for ChoiceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChoiceEngine {
    pub fn new() -> Self {
        Self {
            state: ChoiceState::Idle,
            next_ticket: 0,
        }
    }

    /// Whether choices belong on `page` of `story`.
    ///
    /// Never on the final planned scene; otherwise on the first page, or on any
    /// page that has no scene after it yet.
    pub fn should_show(story: &Story, page: usize) -> bool {
        let not_final = !story.is_final_planned(page);
        let no_next_scene = page + 1 >= story.page_count();
        not_final && (page == 0 || no_next_scene)
    }

    pub fn state(&self) -> &ChoiceState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, ChoiceState::Loading { .. })
    }

    pub fn is_resolving(&self) -> bool {
        matches!(self.state, ChoiceState::Resolving { .. })
    }

    /// Choices currently visible to the reader.
    pub fn displayed(&self) -> &[Choice] {
        match &self.state {
            ChoiceState::Loading { choices, .. } | ChoiceState::Displaying { choices, .. } => {
                choices
            }
            ChoiceState::Idle | ChoiceState::Resolving { .. } => &[],
        }
    }

    /// Page the displayed choices belong to.
    pub fn displayed_page(&self) -> Option<usize> {
        match &self.state {
            ChoiceState::Loading { page, .. } | ChoiceState::Displaying { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Show the default set for `page` and return a request for server proposals.
    ///
    /// Dropped (returns `None`) while proposals are loading or a choice is resolving.
    pub fn generate_choices(&mut self, page: usize) -> Option<SuggestionRequest> {
        if self.is_loading() || self.is_resolving() {
            debug!(page, "choice generation already in flight");
            return None;
        }

        let ticket = self.issue_ticket();
        self.state = ChoiceState::Loading {
            page,
            ticket,
            choices: Choice::default_set(),
        };
        Some(SuggestionRequest { page, ticket })
    }

    /// Apply server proposals. Returns false when the result is stale.
    ///
    /// A non-empty result replaces the defaults; an empty or failed one keeps them.
    pub fn apply_suggestions(
        &mut self,
        request: SuggestionRequest,
        result: Result<Vec<Choice>, ApiError>,
    ) -> bool {
        let choices = match &mut self.state {
            ChoiceState::Loading { page, ticket, choices }
                if *page == request.page && *ticket == request.ticket =>
            {
                std::mem::take(choices)
            }
            _ => {
                debug!(page = request.page, "discarding stale choice proposals");
                return false;
            }
        };

        let choices = match result {
            Ok(proposed) if !proposed.is_empty() => proposed,
            Ok(_) => {
                debug!(page = request.page, "server proposed no choices, keeping defaults");
                choices
            }
            Err(e) => {
                warn!(page = request.page, error = %e, "choice proposals failed, keeping defaults");
                choices
            }
        };

        self.state = ChoiceState::Displaying {
            page: request.page,
            choices,
        };
        true
    }

    /// Select a displayed choice. `None` while resolving or for an out-of-range index.
    pub fn select_choice(&mut self, index: usize) -> Option<Resolution> {
        if self.is_resolving() {
            debug!(index, "choice already resolving, ignoring selection");
            return None;
        }

        let page = self.displayed_page()?;
        let Some(choice) = self.displayed().get(index).cloned() else {
            debug!(index, shown = self.displayed().len(), "choice index out of range");
            return None;
        };

        let ticket = self.issue_ticket();
        self.state = ChoiceState::Resolving {
            page,
            ticket,
            choice: choice.clone(),
        };
        Some(Resolution { page, ticket, choice })
    }

    /// End the resolution holding `ticket`, whatever its outcome.
    ///
    /// Returns false, leaving the state alone, when `ticket` is not the one in
    /// flight. Its result must then be dropped.
    pub fn finish_resolution(&mut self, ticket: u64) -> bool {
        match self.state {
            ChoiceState::Resolving { ticket: current, .. } if current == ticket => {
                self.state = ChoiceState::Idle;
                true
            }
            _ => {
                debug!(ticket, "discarding stale resolution");
                false
            }
        }
    }

    /// Forget everything, including an in-flight resolution, for a newly
    /// installed story. Tickets keep counting up so old results stay stale.
    pub fn reset(&mut self) {
        self.state = ChoiceState::Idle;
    }

    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Drop displayed choices on navigation. An in-flight resolution is kept.
    pub fn clear(&mut self) {
        if !self.is_resolving() {
            self.state = ChoiceState::Idle;
        }
    }
}
