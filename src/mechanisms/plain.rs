//! Provides the SASL "PLAIN" mechanism.

use crate::common::{Credentials, Secret};
use crate::error::MechanismError;
use crate::mechanisms::{Mechanism, MechanismStatus};

/// A struct for the SASL PLAIN mechanism: a single
/// `authzid NUL authcid NUL password` message.
#[derive(Default)]
pub struct Plain {
    status: MechanismStatus,
}

impl Plain {
    /// Constructs a new struct for authenticating using the SASL PLAIN
    /// mechanism.
    pub fn new() -> Plain {
        Plain::default()
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn status(&self) -> MechanismStatus {
        self.status
    }

    fn evaluate_challenge(
        &mut self,
        input: Option<&[u8]>,
        credentials: &Credentials,
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        match self.status {
            MechanismStatus::New => {
                let password = match &credentials.secret {
                    Secret::Password(password) => password,
                    // Not password credentials; the mechanism is unusable
                    // and the attempt stays fresh.
                    Secret::None => return Ok(None),
                };
                let authcid = credentials.authcid().ok_or_else(|| {
                    MechanismError::GenericError("PLAIN requires a username".to_owned())
                })?;

                let mut auth = Vec::new();
                if let Some(authzid) = &credentials.authzid {
                    auth.extend(authzid.bytes());
                }
                auth.push(0);
                auth.extend(authcid.bytes());
                auth.push(0);
                auth.extend(password.bytes());

                self.status = MechanismStatus::Completed;
                Ok(Some(auth))
            }
            MechanismStatus::Completed if input.is_none() => Ok(None),
            _ => Err(MechanismError::GenericError(
                "authentication already completed".to_owned(),
            )),
        }
    }

    fn is_allowed_to_use(&self, credentials: &Credentials) -> bool {
        matches!(credentials.secret, Secret::Password(_))
    }

    fn reset(&mut self) {
        self.status = MechanismStatus::New;
    }
}
