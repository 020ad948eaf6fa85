//! Progress callbacks polled by planners
//!
//! Callbacks are invoked once per planning iteration in registration order;
//! the first one returning an action other than [`PlannerAction::None`]
//! decides. The registry only keeps weak references: dropping the
//! [`CallbackHandle`] returned by [`PlanCallbackRegistry::register`]
//! deregisters the callback, even from inside a running round.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::path_planning::options::PlannerAction;

/// Progress passed to each callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlannerProgress {
    pub iteration: u32,
}

type PlanCallback = dyn Fn(&PlannerProgress) -> PlannerAction;

/// Keeps a callback registered while alive
#[must_use = "dropping the handle deregisters the callback"]
pub struct CallbackHandle {
    _callback: Rc<PlanCallback>,
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle").finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct PlanCallbackRegistry {
    callbacks: RefCell<Vec<Weak<PlanCallback>>>,
}

impl PlanCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        callback: impl Fn(&PlannerProgress) -> PlannerAction + 'static,
    ) -> CallbackHandle {
        let strong: Rc<PlanCallback> = Rc::new(callback);
        self.callbacks.borrow_mut().push(Rc::downgrade(&strong));
        CallbackHandle { _callback: strong }
    }

    /// Number of callbacks whose handle is still alive
    pub fn len(&self) -> usize {
        self.callbacks
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs one round and returns the first non-`None` action
    pub fn call_callbacks(&self, progress: &PlannerProgress) -> PlannerAction {
        let snapshot: Vec<Weak<PlanCallback>> = {
            let mut callbacks = self.callbacks.borrow_mut();
            callbacks.retain(|w| w.strong_count() > 0);
            callbacks.clone()
        };
        for weak in snapshot {
            // deregistered earlier in this round
            let Some(callback) = weak.upgrade() else {
                continue;
            };
            let action = callback(progress);
            if action != PlannerAction::None {
                return action;
            }
        }
        PlannerAction::None
    }
}

impl fmt::Debug for PlanCallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCallbackRegistry")
            .field("live_callbacks", &self.len())
            .finish()
    }
}
