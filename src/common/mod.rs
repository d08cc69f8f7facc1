//! Credential types shared by every mechanism.

use std::fmt;
use std::sync::Arc;

use crate::cache::SaltedPasswordCache;

#[cfg(feature = "scram")]
pub mod scram;

/// The identity a client authenticates as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// No authenticating identity (ANONYMOUS).
    None,
    /// Authenticate as the given username.
    Username(String),
}

impl From<String> for Identity {
    fn from(s: String) -> Identity {
        Identity::Username(s)
    }
}

impl<'a> From<&'a str> for Identity {
    fn from(s: &'a str) -> Identity {
        Identity::Username(s.to_owned())
    }
}

/// Represents a SASL secret, like a password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secret {
    /// No extra data needed.
    None,
    /// Password required.
    Password(String),
}

/// A struct containing SASL credentials.
///
/// Read-only to the engine; one value may serve any number of attempts.
#[derive(Clone, Default)]
pub struct Credentials {
    /// The requested identity.
    pub identity: Identity,
    /// Explicit authentication name, used as authcid instead of the
    /// identity's username when present.
    pub authentication_name: Option<String>,
    /// Optional authorization identity, distinct from the
    /// authentication identity.
    pub authzid: Option<String>,
    /// The secret used to authenticate.
    pub secret: Secret,
    /// Optional cache for SCRAM's salted-password derivation.
    pub cache: Option<Arc<dyn SaltedPasswordCache>>,
}

impl Default for Identity {
    fn default() -> Identity {
        Identity::None
    }
}

impl Default for Secret {
    fn default() -> Secret {
        Secret::None
    }
}

impl Credentials {
    /// Creates a new Credentials with the specified username.
    pub fn with_username<N: Into<String>>(mut self, username: N) -> Credentials {
        self.identity = Identity::Username(username.into());
        self
    }

    /// Creates a new Credentials with the specified password.
    pub fn with_password<P: Into<String>>(mut self, password: P) -> Credentials {
        self.secret = Secret::Password(password.into());
        self
    }

    /// Creates a new Credentials with an explicit authentication name.
    pub fn with_authentication_name<N: Into<String>>(mut self, name: N) -> Credentials {
        self.authentication_name = Some(name.into());
        self
    }

    /// Creates a new Credentials with the specified authorization
    /// identity.
    pub fn with_authzid<A: Into<String>>(mut self, authzid: A) -> Credentials {
        self.authzid = Some(authzid.into());
        self
    }

    /// Creates a new Credentials with the specified salted-password
    /// cache.
    pub fn with_cache(mut self, cache: Arc<dyn SaltedPasswordCache>) -> Credentials {
        self.cache = Some(cache);
        self
    }

    /// The username used as the authentication identity, if any.
    pub fn username(&self) -> Option<&str> {
        match &self.identity {
            Identity::Username(username) => Some(username),
            Identity::None => None,
        }
    }

    /// The password, if these are password credentials.
    pub fn password(&self) -> Option<&str> {
        match &self.secret {
            Secret::Password(password) => Some(password),
            Secret::None => None,
        }
    }

    /// The name sent as authcid: the explicit authentication name when
    /// set, otherwise the username.
    pub fn authcid(&self) -> Option<&str> {
        self.authentication_name.as_deref().or_else(|| self.username())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("authentication_name", &self.authentication_name)
            .field("authzid", &self.authzid)
            .field("secret", &self.secret)
            .field("cache", &self.cache.as_ref().map(|_| "…"))
            .finish()
    }
}

#[doc(hidden)]
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_works() {
        assert_eq!(
            xor(
                &[135, 94, 53, 134, 73, 233, 140, 221, 150, 12, 96, 111, 54, 66, 11, 76],
                &[163, 9, 122, 180, 107, 44, 22, 252, 248, 134, 112, 82, 84, 122, 56, 209]
            ),
            &[36, 87, 79, 50, 34, 197, 154, 33, 110, 138, 16, 61, 98, 56, 51, 157]
        );
    }

    #[test]
    fn authcid_prefers_authentication_name() {
        let creds = Credentials::default().with_username("romeo");
        assert_eq!(creds.authcid(), Some("romeo"));

        let creds = creds.with_authentication_name("montague");
        assert_eq!(creds.authcid(), Some("montague"));
        assert_eq!(creds.username(), Some("romeo"));
    }
}
