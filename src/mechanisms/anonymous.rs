//! Provides the SASL "ANONYMOUS" mechanism.

use crate::common::{Credentials, Identity, Secret};
use crate::error::MechanismError;
use crate::mechanisms::{Mechanism, MechanismStatus};

/// A struct for the SASL ANONYMOUS mechanism: a single exchange with no
/// payload in either direction.
#[derive(Default)]
pub struct Anonymous {
    status: MechanismStatus,
}

impl Anonymous {
    /// Constructs a new struct for authenticating using the SASL
    /// ANONYMOUS mechanism.
    pub fn new() -> Anonymous {
        Anonymous::default()
    }
}

impl Mechanism for Anonymous {
    fn name(&self) -> &str {
        "ANONYMOUS"
    }

    fn status(&self) -> MechanismStatus {
        self.status
    }

    fn evaluate_challenge(
        &mut self,
        input: Option<&[u8]>,
        _credentials: &Credentials,
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        match self.status {
            MechanismStatus::New => {
                self.status = MechanismStatus::Completed;
                Ok(None)
            }
            MechanismStatus::Completed if input.is_none() => Ok(None),
            _ => Err(MechanismError::GenericError(
                "authentication already completed".to_owned(),
            )),
        }
    }

    fn is_allowed_to_use(&self, credentials: &Credentials) -> bool {
        credentials.identity == Identity::None && credentials.secret == Secret::None
    }

    fn reset(&mut self) {
        self.status = MechanismStatus::New;
    }
}
