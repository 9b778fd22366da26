use std::fmt;

/// Connectivity of a [`StreamReceiver`](crate::streaming::stream_receiver::StreamReceiver).
///
/// `Disconnected → Connecting → Connected`; any failure drops back to
/// `Disconnected` and the receiver retries after its reconnect delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ConnectionState::Disconnected, "disconnected")]
    #[case(ConnectionState::Connecting, "connecting")]
    #[case(ConnectionState::Connected, "connected")]
    fn test_display(#[case] state: ConnectionState, #[case] expected: &str) {
        assert_eq!(state.to_string(), expected);
    }
}
