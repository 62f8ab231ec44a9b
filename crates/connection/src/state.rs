//! Connection lifecycle states.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a [`Connection`](crate::Connection).
///
/// Legal transitions:
///
/// ```text
/// disconnected -> connecting -> connected -> disconnecting -> disconnected
///                 connecting -> disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Connected = 1,
    Disconnecting = 2,
    Disconnected = 3,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Disconnecting,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free state cell with compare-and-swap transitions.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::SeqCst))
    }

    /// Moves `from -> to` atomically. Returns the observed state on failure.
    pub(crate) fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Disconnecting.to_string(), "disconnecting");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn transition_only_from_expected_state() {
        let state = AtomicState::new(ConnectionState::Disconnected);
        assert_eq!(
            state.transition(ConnectionState::Connected, ConnectionState::Disconnecting),
            Err(ConnectionState::Disconnected)
        );
        assert_eq!(state.load(), ConnectionState::Disconnected);

        assert!(
            state
                .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
                .is_ok()
        );
        assert_eq!(state.load(), ConnectionState::Connecting);
    }

    #[test]
    fn swap_returns_previous() {
        let state = AtomicState::new(ConnectionState::Connecting);
        assert_eq!(
            state.swap(ConnectionState::Disconnected),
            ConnectionState::Connecting
        );
        assert_eq!(state.load(), ConnectionState::Disconnected);
    }
}
