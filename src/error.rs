#[cfg(feature = "scram")]
use hmac::digest::InvalidLength;
use std::error::Error as StdError;
use std::fmt;

/// A failure raised locally by a mechanism's challenge evaluator.
///
/// These never reach the server; the negotiator maps them onto the
/// closest [`SaslError`] condition and keeps the local reason for
/// diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MechanismError {
    /// The server-supplied challenge could not be decoded or parsed.
    BadChallenge(String),
    /// The server echoed a nonce that does not start with ours.
    WrongNonce,
    /// The server's final signature did not match the expected one.
    InvalidServerSignature,
    /// The mechanism was driven outside its legal state sequence.
    GenericError(String),
}

impl MechanismError {
    /// The protocol-level condition this failure maps to.
    pub fn condition(&self) -> SaslError {
        match self {
            MechanismError::BadChallenge(_) | MechanismError::GenericError(_) => {
                SaslError::TemporaryAuthFailure
            }
            MechanismError::WrongNonce | MechanismError::InvalidServerSignature => {
                SaslError::ServerNotTrusted
            }
        }
    }
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MechanismError::BadChallenge(msg) => write!(fmt, "bad challenge: {}", msg),
            MechanismError::WrongNonce => write!(fmt, "wrong nonce"),
            MechanismError::InvalidServerSignature => write!(fmt, "invalid server signature"),
            MechanismError::GenericError(msg) => write!(fmt, "{}", msg),
        }
    }
}

impl StdError for MechanismError {}

#[cfg(feature = "scram")]
impl From<InvalidLength> for MechanismError {
    fn from(err: InvalidLength) -> MechanismError {
        MechanismError::GenericError(format!("invalid HMAC key length: {}", err))
    }
}

/// Machine-readable SASL error conditions (RFC 6120 §6.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslError {
    /// The client aborted the exchange.
    Aborted,
    /// A payload was not encoded correctly.
    IncorrectEncoding,
    /// The authorization identity was rejected.
    InvalidAuthzid,
    /// No usable mechanism.
    InvalidMechanism,
    /// The server requires a stronger mechanism.
    MechanismTooWeak,
    /// The credentials were rejected.
    NotAuthorized,
    /// The server claimed success but failed client-side verification.
    ServerNotTrusted,
    /// A temporary server-side failure.
    TemporaryAuthFailure,
}

impl SaslError {
    /// The condition token as it appears on the wire.
    pub fn condition(&self) -> &'static str {
        match self {
            SaslError::Aborted => "aborted",
            SaslError::IncorrectEncoding => "incorrect-encoding",
            SaslError::InvalidAuthzid => "invalid-authzid",
            SaslError::InvalidMechanism => "invalid-mechanism",
            SaslError::MechanismTooWeak => "mechanism-too-weak",
            SaslError::NotAuthorized => "not-authorized",
            SaslError::ServerNotTrusted => "server-not-trusted",
            SaslError::TemporaryAuthFailure => "temporary-auth-failure",
        }
    }

    /// Parses a wire condition token.
    pub fn from_condition(name: &str) -> Option<SaslError> {
        Some(match name {
            "aborted" => SaslError::Aborted,
            "incorrect-encoding" => SaslError::IncorrectEncoding,
            "invalid-authzid" => SaslError::InvalidAuthzid,
            "invalid-mechanism" => SaslError::InvalidMechanism,
            "mechanism-too-weak" => SaslError::MechanismTooWeak,
            "not-authorized" => SaslError::NotAuthorized,
            "server-not-trusted" => SaslError::ServerNotTrusted,
            "temporary-auth-failure" => SaslError::TemporaryAuthFailure,
            _ => return None,
        })
    }
}

impl fmt::Display for SaslError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.condition())
    }
}

impl StdError for SaslError {}

/// An error terminating a negotiation attempt.
#[derive(Debug)]
pub enum AuthError {
    /// A protocol-level failure, reported by the server or raised during
    /// selection.
    Sasl(SaslError),
    /// A mechanism failed locally; carries the mapped condition together
    /// with the original reason.
    Mechanism {
        /// The protocol-level condition the failure maps to.
        condition: SaslError,
        /// The local failure, preserved for diagnostics.
        reason: MechanismError,
    },
    /// The server replied with a stanza other than `challenge`,
    /// `success` or `failure`.
    UnexpectedResponse(String),
    /// The transport failed mid-negotiation.
    Transport(Box<dyn StdError + Send + Sync>),
}

impl AuthError {
    /// The protocol-level condition this failure maps to.
    pub fn condition(&self) -> SaslError {
        match self {
            AuthError::Sasl(err) => *err,
            AuthError::Mechanism { condition, .. } => *condition,
            AuthError::UnexpectedResponse(_) => SaslError::Aborted,
            AuthError::Transport(_) => SaslError::Aborted,
        }
    }

    pub(crate) fn transport<E: StdError + Send + Sync + 'static>(err: E) -> AuthError {
        AuthError::Transport(Box::new(err))
    }
}

impl From<MechanismError> for AuthError {
    fn from(reason: MechanismError) -> AuthError {
        AuthError::Mechanism {
            condition: reason.condition(),
            reason,
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::Sasl(err) => write!(fmt, "authentication failed: {}", err),
            AuthError::Mechanism { condition, reason } => {
                write!(fmt, "authentication failed: {} ({})", condition, reason)
            }
            AuthError::UnexpectedResponse(name) => {
                write!(fmt, "unexpected server response: {}", name)
            }
            AuthError::Transport(err) => write!(fmt, "transport error: {}", err),
        }
    }
}

impl StdError for AuthError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            AuthError::Mechanism { reason, .. } => Some(reason),
            AuthError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_tokens_round_trip() {
        for error in [
            SaslError::Aborted,
            SaslError::IncorrectEncoding,
            SaslError::InvalidAuthzid,
            SaslError::InvalidMechanism,
            SaslError::MechanismTooWeak,
            SaslError::NotAuthorized,
            SaslError::ServerNotTrusted,
            SaslError::TemporaryAuthFailure,
        ] {
            assert_eq!(SaslError::from_condition(error.condition()), Some(error));
        }
        assert_eq!(SaslError::from_condition("credentials-expired"), None);
    }

    #[test]
    fn mechanism_errors_map_to_conditions() {
        assert_eq!(
            MechanismError::BadChallenge("no salt".to_string()).condition(),
            SaslError::TemporaryAuthFailure
        );
        assert_eq!(
            MechanismError::GenericError("illegal state".to_string()).condition(),
            SaslError::TemporaryAuthFailure
        );
        assert_eq!(
            MechanismError::WrongNonce.condition(),
            SaslError::ServerNotTrusted
        );
        assert_eq!(
            MechanismError::InvalidServerSignature.condition(),
            SaslError::ServerNotTrusted
        );
    }
}
