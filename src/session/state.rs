//! Terminal session state machine.

/// Represents the lifecycle state of a terminal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// The connection is upgraded but the shell is not yet running.
    #[default]
    Connecting,
    /// The shell is running and both pumps are live.
    Active,
    /// One side ended; the bridge is tearing down.
    Closing,
    /// The pty and the connection have been released.
    Closed,
}

impl SessionState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Connecting -> Active
    /// - Connecting -> Closed (the shell failed to start)
    /// - Active -> Closing
    /// - Closing -> Closed
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Connecting, Active) | (Connecting, Closed) | (Active, Closing) | (Closing, Closed)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `Ok(())` if the transition is valid, or an error otherwise.
    pub fn transition_to(&mut self, target: SessionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::ConduitError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Check if the bridge is pumping bytes.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut state = SessionState::Connecting;
        assert!(state.transition_to(SessionState::Active).is_ok());
        assert!(state.is_active());
        assert!(state.transition_to(SessionState::Closing).is_ok());
        assert!(state.transition_to(SessionState::Closed).is_ok());
        assert!(state.is_terminal());
    }

    #[test]
    fn test_failed_start_goes_straight_to_closed() {
        let mut state = SessionState::Connecting;
        assert!(state.transition_to(SessionState::Closed).is_ok());
    }

    #[test]
    fn test_invalid_active_to_closed() {
        let mut state = SessionState::Active;
        assert!(state.transition_to(SessionState::Closed).is_err());
        assert_eq!(state, SessionState::Active);
    }

    #[test]
    fn test_invalid_from_closed() {
        let mut state = SessionState::Closed;
        assert!(state.transition_to(SessionState::Active).is_err());
        assert!(state.transition_to(SessionState::Closing).is_err());
        assert!(state.transition_to(SessionState::Connecting).is_err());
    }

    #[test]
    fn test_default() {
        assert_eq!(SessionState::default(), SessionState::Connecting);
    }
}
