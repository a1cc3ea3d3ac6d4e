//! Token-bound connection state
//!
//! `connected == true` only while the last accepted `!baisession` line carried the
//! token this bridge currently holds. A handshake for any other token, or a rotation of
//! the local token, drops the connection.

use bai_protocol::SessionLine;
use baibridge_core_types::SessionToken;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub session_key_bound_to: Option<SessionToken>,
}

impl ConnectionState {
    fn disconnected() -> Self {
        Self::default()
    }

    fn bound(token: &SessionToken) -> Self {
        Self {
            connected: true,
            session_key_bound_to: Some(token.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionTransition {
    Connected,
    AlreadyConnected,
    /// Handshake for a different session; connection dropped if it was up
    Rejected { seen_key: String },
    /// Local token rotated; connection dropped
    Rotated,
}

#[derive(Clone, Debug)]
pub struct ConnectionTracker {
    token: SessionToken,
    state: ConnectionState,
}

impl ConnectionTracker {
    pub fn new(token: SessionToken) -> Self {
        Self {
            token,
            state: ConnectionState::disconnected(),
        }
    }

    /// Restore a persisted state, discarding it if it was bound to another token.
    pub fn restore(token: SessionToken, persisted: ConnectionState) -> Self {
        let state = match &persisted.session_key_bound_to {
            Some(bound) if persisted.connected && bound == &token => persisted,
            Some(_) if persisted.connected => {
                warn!("persisted connection bound to a different session; resetting");
                ConnectionState::disconnected()
            }
            _ => ConnectionState::disconnected(),
        };
        Self { token, state }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
            && self.state.session_key_bound_to.as_ref() == Some(&self.token)
    }

    pub fn observe(&mut self, line: &SessionLine) -> ConnectionTransition {
        if line.session_key == self.token.as_str() {
            if self.is_connected() {
                return ConnectionTransition::AlreadyConnected;
            }
            self.state = ConnectionState::bound(&self.token);
            info!("assistant confirmed session handshake");
            return ConnectionTransition::Connected;
        }

        warn!(
            seen = %line.session_key,
            "handshake for a different session; staying disconnected"
        );
        self.state = ConnectionState::disconnected();
        ConnectionTransition::Rejected {
            seen_key: line.session_key.clone(),
        }
    }

    pub fn rotate(&mut self, token: SessionToken) -> ConnectionTransition {
        if self.is_connected() {
            info!("session token rotated; dropping connection");
        }
        self.token = token;
        self.state = ConnectionState::disconnected();
        ConnectionTransition::Rotated
    }

    pub fn disconnect(&mut self) {
        self.state = ConnectionState::disconnected();
    }
}
