//! Per-phase completion action for the tree barrier.

use std::fmt;

type Action = Box<dyn Fn() + Send + Sync>;

/// The action a barrier runs once per phase, on whichever participant completes the phase.
///
/// It runs before the new phase is published, so every other participant stays blocked until it
/// returns. A panicking action leaves the phase unpublished and wedges the barrier.
#[derive(Default)]
pub struct Completion {
    action: Option<Action>,
}

impl Completion {
    #[must_use]
    pub const fn noop() -> Self {
        Self { action: None }
    }

    #[must_use]
    pub fn new<F>(action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            action: Some(Box::new(action)),
        }
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.action.is_none()
    }

    pub fn invoke(&self) {
        if let Some(action) = &self.action {
            action();
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("noop", &self.is_noop())
            .finish()
    }
}
