//! Module bootstrap state machine.
//!
//! ```text
//! Init -> RpcServerReady -> PreRegistered -> Announced -> ConfigNegotiated -> Serving
//!                                                                         \-> NotServing
//! ```
//!
//! Transitions only move one step forward; the last step may also flip
//! between `Serving` and `NotServing` when activation or health changes.

use std::fmt;

use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapState {
    Init,
    RpcServerReady,
    PreRegistered,
    Announced,
    ConfigNegotiated,
    Serving,
    NotServing,
}

impl BootstrapState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BootstrapState::Init => "INIT",
            BootstrapState::RpcServerReady => "RPC_SERVER_READY",
            BootstrapState::PreRegistered => "PRE_REGISTERED",
            BootstrapState::Announced => "ANNOUNCED",
            BootstrapState::ConfigNegotiated => "CONFIG_NEGOTIATED",
            BootstrapState::Serving => "SERVING",
            BootstrapState::NotServing => "NOT_SERVING",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: BootstrapState) -> bool {
        use BootstrapState::{
            Announced, ConfigNegotiated, Init, NotServing, PreRegistered, RpcServerReady, Serving,
        };
        matches!(
            (self, next),
            (Init, RpcServerReady)
                | (RpcServerReady, PreRegistered)
                | (PreRegistered, Announced)
                | (Announced, ConfigNegotiated)
                | (ConfigNegotiated | NotServing, Serving)
                | (ConfigNegotiated | Serving, NotServing)
        )
    }

    /// Whether bootstrap has completed.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, BootstrapState::Serving | BootstrapState::NotServing)
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why bootstrap stopped.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("illegal bootstrap transition {from} -> {to}")]
    InvalidTransition {
        from: BootstrapState,
        to: BootstrapState,
    },
    #[error("failed to bind module listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bootstrap step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("announce to core failed: {0}")]
    Announce(#[source] TransportError),
    #[error("config negotiation failed: {0}")]
    Negotiation(#[source] TransportError),
    #[error("route registration failed: {0}")]
    Routes(#[source] TransportError),
}

impl BootstrapError {
    pub(crate) fn step(step: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| BootstrapError::Step { step, source }
    }
}

/// Current state plus the transition guard.
#[derive(Debug)]
pub struct BootstrapFsm {
    state: BootstrapState,
}

impl Default for BootstrapFsm {
    fn default() -> Self {
        Self {
            state: BootstrapState::Init,
        }
    }
}

impl BootstrapFsm {
    #[must_use]
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Moves to `next`; a same-state move is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::InvalidTransition`] for skips and reversals.
    pub fn advance(&mut self, next: BootstrapState) -> Result<(), BootstrapError> {
        if self.state == next && next.is_settled() {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(BootstrapError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_every_state() {
        let mut fsm = BootstrapFsm::default();
        for next in [
            BootstrapState::RpcServerReady,
            BootstrapState::PreRegistered,
            BootstrapState::Announced,
            BootstrapState::ConfigNegotiated,
            BootstrapState::Serving,
        ] {
            fsm.advance(next).unwrap();
        }
        assert_eq!(fsm.state(), BootstrapState::Serving);
        assert!(fsm.state().is_settled());
    }

    #[test]
    fn skipping_a_step_is_rejected() {
        let mut fsm = BootstrapFsm::default();
        let err = fsm.advance(BootstrapState::Announced).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::InvalidTransition {
                from: BootstrapState::Init,
                to: BootstrapState::Announced
            }
        ));
        assert_eq!(fsm.state(), BootstrapState::Init);
    }

    #[test]
    fn settled_states_flip_but_never_go_back() {
        let mut fsm = BootstrapFsm::default();
        fsm.advance(BootstrapState::RpcServerReady).unwrap();
        fsm.advance(BootstrapState::PreRegistered).unwrap();
        fsm.advance(BootstrapState::Announced).unwrap();
        fsm.advance(BootstrapState::ConfigNegotiated).unwrap();
        fsm.advance(BootstrapState::NotServing).unwrap();
        fsm.advance(BootstrapState::NotServing).unwrap();
        fsm.advance(BootstrapState::Serving).unwrap();
        assert!(fsm.advance(BootstrapState::Announced).is_err());
    }

    #[test]
    fn wire_names() {
        assert_eq!(BootstrapState::RpcServerReady.to_string(), "RPC_SERVER_READY");
        assert_eq!(BootstrapState::NotServing.as_str(), "NOT_SERVING");
    }
}
