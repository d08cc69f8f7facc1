//! Provides the SASL client mechanisms and the trait they implement.

use crate::common::Credentials;
use crate::error::MechanismError;

#[cfg(feature = "anonymous")]
mod anonymous;
mod plain;
#[cfg(feature = "scram")]
mod scram;

#[cfg(feature = "anonymous")]
pub use self::anonymous::Anonymous;
pub use self::plain::Plain;
#[cfg(feature = "scram")]
pub use self::scram::{Scram, ScramSha1, ScramSha256};

/// Progress of a mechanism through one authentication attempt.
///
/// Transitions are strictly forward; a reset returns to `New` and
/// discards all per-attempt state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MechanismStatus {
    /// No attempt in progress, or an attempt before the final proof.
    New,
    /// The final proof was sent; server-side verification is pending.
    CompletedExpected,
    /// Mutual verification finished.
    Completed,
}

impl Default for MechanismStatus {
    fn default() -> MechanismStatus {
        MechanismStatus::New
    }
}

/// A trait which defines SASL client mechanisms.
///
/// One instance serves many negotiation attempts in sequence, never
/// concurrently; all per-attempt state lives behind `reset`.
pub trait Mechanism {
    /// The name of the mechanism, as advertised on the wire.
    fn name(&self) -> &str;

    /// Where the current attempt stands.
    fn status(&self) -> MechanismStatus;

    /// Processes a server challenge (`None` when opening the exchange,
    /// or when the server's `success` carried no data) and produces the
    /// next client message, if any.
    fn evaluate_challenge(
        &mut self,
        input: Option<&[u8]>,
        credentials: &Credentials,
    ) -> Result<Option<Vec<u8>>, MechanismError>;

    /// Whether the mechanism can run with the given credentials.
    fn is_allowed_to_use(&self, credentials: &Credentials) -> bool;

    /// Drops any per-attempt state, e.g. on stream reset.
    fn reset(&mut self);
}
