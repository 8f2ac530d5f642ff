use crate::BackendError;
use std::fmt;

/// Lifecycle state of a concrete backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    Loaded,
    Initialized,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Loaded => write!(f, "loaded"),
            LifecycleState::Initialized => write!(f, "initialized"),
            LifecycleState::Destroyed => write!(f, "destroyed"),
        }
    }
}

pub fn validate_transition(from: LifecycleState, to: LifecycleState) -> Result<(), BackendError> {
    let valid = matches!(
        (from, to),
        (LifecycleState::Created, LifecycleState::Loaded)
            | (LifecycleState::Loaded, LifecycleState::Initialized)
            | (
                LifecycleState::Created | LifecycleState::Loaded | LifecycleState::Initialized,
                LifecycleState::Destroyed
            )
    );

    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidTransition { from, to })
    }
}

/// Fail unless `state` is `expected`.
pub fn require_state(state: LifecycleState, expected: LifecycleState) -> Result<(), BackendError> {
    if state == expected {
        Ok(())
    } else {
        Err(BackendError::WrongState { state, expected })
    }
}
