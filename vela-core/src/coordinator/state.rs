//! Top-level state derivation.
//!
//! The published state is a pure function of the three observables
//! `(connectionState, isPlaying, isSpeaking)`. First match wins.

use crate::session::ConnectionState;

/// What the surrounding app should show for the assistant as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Not started, or stopped.
    Idle,
    /// Transport being established, handshaking or backing off.
    Connecting,
    /// Ready; no active turn in either direction.
    Listening,
    /// Model audio is rendering.
    Speaking,
    /// The user is speaking.
    UserSpeaking,
    Error { message: String },
}

/// Precedence: connection errors, then connection churn, then the user,
/// then the model, then plain readiness.
pub fn derive_state(
    connection: &ConnectionState,
    is_playing: bool,
    is_speaking: bool,
) -> CoordinatorState {
    match connection {
        ConnectionState::Error { message, .. } => CoordinatorState::Error {
            message: message.clone(),
        },
        ConnectionState::Connecting
        | ConnectionState::Initializing
        | ConnectionState::Reconnecting { .. } => CoordinatorState::Connecting,
        _ if is_speaking => CoordinatorState::UserSpeaking,
        _ if is_playing => CoordinatorState::Speaking,
        ConnectionState::Connected => CoordinatorState::Listening,
        _ => CoordinatorState::Idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_state() -> ConnectionState {
        ConnectionState::Error {
            message: "boom".into(),
            cause: None,
        }
    }

    #[test]
    fn error_beats_everything() {
        assert_eq!(
            derive_state(&error_state(), true, true),
            CoordinatorState::Error {
                message: "boom".into()
            }
        );
    }

    #[test]
    fn connection_churn_beats_activity_flags() {
        for connection in [
            ConnectionState::Connecting,
            ConnectionState::Initializing,
            ConnectionState::Reconnecting { attempt: 2, max: 5 },
        ] {
            assert_eq!(
                derive_state(&connection, true, true),
                CoordinatorState::Connecting
            );
        }
    }

    #[test]
    fn user_speech_beats_playback() {
        assert_eq!(
            derive_state(&ConnectionState::Connected, true, true),
            CoordinatorState::UserSpeaking
        );
    }

    #[test]
    fn playback_beats_listening() {
        assert_eq!(
            derive_state(&ConnectionState::Connected, true, false),
            CoordinatorState::Speaking
        );
        assert_eq!(
            derive_state(&ConnectionState::Streaming, true, false),
            CoordinatorState::Speaking
        );
    }

    #[test]
    fn connected_and_quiet_is_listening() {
        assert_eq!(
            derive_state(&ConnectionState::Connected, false, false),
            CoordinatorState::Listening
        );
    }

    #[test]
    fn everything_else_is_idle() {
        assert_eq!(
            derive_state(&ConnectionState::Disconnected, false, false),
            CoordinatorState::Idle
        );
    }
}
