//! Connection state machine (spec §4.7). Addresses the "coroutine control
//! flow" redesign flag: transitions are driven by an explicit enum and a
//! pure transition function rather than split across socket-event callbacks.

use crate::error::{ApxResult, ErrorKind};

/// Which side of the handshake this connection plays. Only affects who
/// speaks first; the state machine itself is identical for both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    GreetingSent,
    HeaderAccepted,
    Acknowledged,
    Active,
    Closed,
}

/// Events that drive the state machine forward (spec §4.7's transition arrows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    PeerGreeting,
    Ack,
    LocalFilesRegistered,
    SocketClosed,
    Error,
    Timeout,
}

impl ConnectionState {
    /// Apply `event`, returning the next state or an error if the event is
    /// not valid from the current state.
    pub fn transition(self, event: ConnectionEvent) -> ApxResult<ConnectionState> {
        use ConnectionEvent::*;
        use ConnectionState::*;
        match (self, event) {
            (Init, Connect) => Ok(GreetingSent),
            (GreetingSent, PeerGreeting) => Ok(HeaderAccepted),
            (HeaderAccepted, Ack) => Ok(Acknowledged),
            (Acknowledged, LocalFilesRegistered) => Ok(Active),
            (Active, SocketClosed | Error | Timeout) => Ok(Closed),
            (Closed, SocketClosed | Error | Timeout) => Ok(Closed),
            _ => Err(ErrorKind::InvalidArgument(format!(
                "invalid connection event {:?} in state {:?}",
                event, self
            ))),
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Active)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent::*;
    use ConnectionState::*;

    #[test]
    fn happy_path_reaches_active() {
        let mut state = Init;
        for event in [Connect, PeerGreeting, Ack, LocalFilesRegistered] {
            state = state.transition(event).unwrap();
        }
        assert_eq!(state, Active);
        assert!(state.is_active());
    }

    #[test]
    fn active_closes_on_socket_error() {
        let state = Active.transition(SocketClosed).unwrap();
        assert_eq!(state, Closed);
        assert!(state.is_closed());
    }

    #[test]
    fn out_of_order_event_is_rejected() {
        assert!(Init.transition(Ack).is_err());
        assert!(GreetingSent.transition(LocalFilesRegistered).is_err());
    }

    #[test]
    fn closed_is_terminal() {
        let state = Closed.transition(SocketClosed).unwrap();
        assert_eq!(state, Closed);
    }
}
