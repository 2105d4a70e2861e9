//! FSM states and the atomic state cell enforcing that an externally forced
//! `SHUTDOWN` always wins over a handler-driven transition.

use std::sync::atomic::{AtomicU8, Ordering};

/// Session lifecycle states. `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Setup = 0,
    Cookie = 1,
    Handshake = 2,
    MtuDiscovery = 3,
    Established = 4,
    Shutdown = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Setup,
            1 => SessionState::Cookie,
            2 => SessionState::Handshake,
            3 => SessionState::MtuDiscovery,
            4 => SessionState::Established,
            _ => SessionState::Shutdown,
        }
    }
}

/// Atomic cell holding the current FSM state. Handler-driven transitions go
/// through [`AtomicSessionState::transition`], which is a compare-and-swap
/// from the handler's expected starting state; [`AtomicSessionState::force_shutdown`]
/// is a plain store that always wins, so a concurrent `stop()` call can
/// never be undone by an in-flight handler still deciding its own next
/// state.
pub struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub fn new(initial: SessionState) -> Self {
        AtomicSessionState(AtomicU8::new(initial as u8))
    }

    /// Current state.
    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Attempt the handler's chosen transition. Returns the state that is
    /// actually current afterward: `to` on success, or whatever state a
    /// racing `force_shutdown` installed.
    pub fn transition(&self, from: SessionState, to: SessionState) -> SessionState {
        match self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => to,
            Err(actual) => SessionState::from_u8(actual),
        }
    }

    /// Force immediate `SHUTDOWN`, unconditionally.
    pub fn force_shutdown(&self) {
        self.0.store(SessionState::Shutdown as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_succeeds_from_expected_state() {
        let state = AtomicSessionState::new(SessionState::Setup);
        let result = state.transition(SessionState::Setup, SessionState::Cookie);
        assert_eq!(result, SessionState::Cookie);
        assert_eq!(state.load(), SessionState::Cookie);
    }

    #[test]
    fn transition_fails_silently_against_stale_expectation() {
        let state = AtomicSessionState::new(SessionState::Handshake);
        let result = state.transition(SessionState::Setup, SessionState::Cookie);
        assert_eq!(result, SessionState::Handshake);
        assert_eq!(state.load(), SessionState::Handshake);
    }

    #[test]
    fn forced_shutdown_wins_over_a_racing_handler_transition() {
        let state = AtomicSessionState::new(SessionState::Handshake);
        state.force_shutdown();
        let result = state.transition(SessionState::Handshake, SessionState::MtuDiscovery);
        assert_eq!(result, SessionState::Shutdown);
        assert_eq!(state.load(), SessionState::Shutdown);
    }
}
