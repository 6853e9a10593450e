//! Page state machine for the book reader.
//!
//! [`BookNavigator`] owns the reading position and nothing else; the story
//! itself is passed in by the controller. Pages are addressed by index into
//! `Story::scenes`, never by scene number.

use crate::choices::ChoiceEngine;
use crate::story::{Scene, Story};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Horizontal distance a swipe or drag must exceed to turn the page.
pub const DEFAULT_SWIPE_THRESHOLD: f32 = 50.0;

// ============================================================================
// Navigation state
// ============================================================================

/// Whether a page turn is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavState {
    Idle,
    Transitioning { from: usize, to: usize },
}

/// Direction of a page turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavDirection {
    Next,
    Previous,
}

/// What the page shows in its picture frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Illustration {
    Image(String),
    Placeholder,
}

impl Illustration {
    pub fn url(&self) -> Option<&str> {
        match self {
            Illustration::Image(url) => Some(url),
            Illustration::Placeholder => None,
        }
    }
}

/// Everything needed to draw one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub index: usize,
    pub total_pages: usize,
    pub scene_number: u32,
    pub title: String,
    pub text: String,
    /// Story genre, used by front ends to pick a color theme.
    pub theme: Option<String>,
    pub illustration: Illustration,
    pub can_go_previous: bool,
    pub can_go_next: bool,
    pub show_choices: bool,
    pub show_export: bool,
}

impl PageView {
    /// "Page 2 of 5"
    pub fn label(&self) -> String {
        format!("Page {} of {}", self.index + 1, self.total_pages)
    }
}

// ============================================================================
// Navigator
// ============================================================================

/// Tracks the current page and serializes page turns.
#[derive(Debug, Clone)]
pub struct BookNavigator {
    current_page: usize,
    total_pages: usize,
    state: NavState,
    /// Pages whose image failed to load while displayed.
    broken_images: HashSet<usize>,
}

impl Default for BookNavigator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl BookNavigator {
    pub fn new(total_pages: usize) -> Self {
        Self {
            current_page: 0,
            total_pages,
            state: NavState::Idle,
            broken_images: HashSet::new(),
        }
    }

    /// Start over with a different book.
    pub fn reset(&mut self, total_pages: usize) {
        *self = Self::new(total_pages);
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self.state, NavState::Transitioning { .. })
    }

    /// Open a transition to `to`.
    ///
    /// Returns false while another transition is open, when `to` is out of
    /// range, or when `to` is already the current page.
    pub fn begin_transition(&mut self, to: usize) -> bool {
        if self.is_transitioning() {
            debug!(to, "page turn dropped, transition in progress");
            return false;
        }
        if to >= self.total_pages || to == self.current_page {
            return false;
        }
        self.state = NavState::Transitioning {
            from: self.current_page,
            to,
        };
        true
    }

    /// Close the open transition and move to its target.
    pub fn finish_transition(&mut self) -> Option<usize> {
        match self.state {
            NavState::Transitioning { to, .. } => {
                self.current_page = to;
                self.state = NavState::Idle;
                Some(to)
            }
            NavState::Idle => None,
        }
    }

    /// Turn to the next page. Returns the new index if the page changed.
    pub fn next(&mut self) -> Option<usize> {
        self.jump(self.current_page + 1)
    }

    pub fn previous(&mut self) -> Option<usize> {
        let to = self.current_page.checked_sub(1)?;
        self.jump(to)
    }

    /// Jump straight to page `index`.
    pub fn go_to(&mut self, index: usize) -> Option<usize> {
        self.jump(index)
    }

    pub fn restart(&mut self) -> Option<usize> {
        self.jump(0)
    }

    pub fn turn(&mut self, direction: NavDirection) -> Option<usize> {
        match direction {
            NavDirection::Next => self.next(),
            NavDirection::Previous => self.previous(),
        }
    }

    fn jump(&mut self, to: usize) -> Option<usize> {
        if !self.begin_transition(to) {
            return None;
        }
        self.finish_transition()
    }

    /// Project page `index` of `story`. `None` if the page does not exist.
    pub fn display_page(&self, story: &Story, index: usize) -> Option<PageView> {
        let scene = story.scene(index)?;
        let total_pages = self.total_pages.max(story.page_count());

        let illustration = match &scene.image_url {
            Some(url) if !url.is_empty() && !self.broken_images.contains(&index) => {
                Illustration::Image(url.clone())
            }
            _ => Illustration::Placeholder,
        };

        Some(PageView {
            index,
            total_pages,
            scene_number: scene.scene_number,
            title: scene.title.clone(),
            text: scene.text.clone(),
            theme: story.genre.clone(),
            illustration,
            can_go_previous: index > 0,
            can_go_next: index + 1 < total_pages,
            show_choices: ChoiceEngine::should_show(story, index),
            show_export: index + 1 == total_pages,
        })
    }

    /// Show the placeholder for `index` if it is still the current page.
    pub fn image_failed(&mut self, index: usize) -> bool {
        if index != self.current_page {
            debug!(index, current = self.current_page, "ignoring image failure for another page");
            return false;
        }
        self.broken_images.insert(index)
    }

    /// Forget a previous failure once a new image arrives for `index`.
    pub fn image_replaced(&mut self, index: usize) {
        self.broken_images.remove(&index);
    }

    /// Append `scene` to `story` and grow the page count. Returns the new index.
    pub fn add_scene_to_story(&mut self, story: &mut Story, scene: Scene) -> usize {
        let index = story.append_scene(scene);
        self.total_pages = story.page_count();
        index
    }
}

// ============================================================================
// Gestures
// ============================================================================

/// Turns touch swipes and pointer drags into page turns.
///
/// A leftward movement turns to the next page, a rightward one to the
/// previous page. Touch swipes that are mostly vertical are scrolls and
/// are ignored.
#[derive(Debug, Clone)]
pub struct SwipeTracker {
    threshold: f32,
    touch_start: Option<(f32, f32)>,
    pointer_start: Option<f32>,
}

impl Default for SwipeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SWIPE_THRESHOLD)
    }
}

impl SwipeTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            touch_start: None,
            pointer_start: None,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn touch_start(&mut self, x: f32, y: f32) {
        self.touch_start = Some((x, y));
    }

    pub fn touch_end(&mut self, x: f32, y: f32) -> Option<NavDirection> {
        let (start_x, start_y) = self.touch_start.take()?;
        let dx = x - start_x;
        if (y - start_y).abs() > dx.abs() {
            return None;
        }
        self.classify(dx)
    }

    pub fn touch_cancel(&mut self) {
        self.touch_start = None;
    }

    pub fn pointer_down(&mut self, x: f32) {
        self.pointer_start = Some(x);
    }

    pub fn pointer_up(&mut self, x: f32) -> Option<NavDirection> {
        let start = self.pointer_start.take()?;
        self.classify(x - start)
    }

    /// Pointer left the page mid-drag.
    pub fn pointer_leave(&mut self) {
        self.pointer_start = None;
    }

    fn classify(&self, dx: f32) -> Option<NavDirection> {
        if dx.abs() <= self.threshold {
            None
        } else if dx < 0.0 {
            Some(NavDirection::Next)
        } else {
            Some(NavDirection::Previous)
        }
    }
}
