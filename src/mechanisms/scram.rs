//! Provides the SASL "SCRAM-*" mechanisms.

use std::marker::PhantomData;
use std::str;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};

use crate::common::scram::{
    generate_nonce, hi, salted_password_id, ScramProvider, ServerFinalMessage, ServerFirstMessage,
    Sha1, Sha256,
};
use crate::common::{xor, Credentials, Secret};
use crate::error::MechanismError;
use crate::mechanisms::{Mechanism, MechanismStatus};

/// The SASL SCRAM-SHA-1 mechanism.
pub type ScramSha1 = Scram<Sha1>;
/// The SASL SCRAM-SHA-256 mechanism.
pub type ScramSha256 = Scram<Sha256>;

/// Channel binding is out of scope; the GS2 header is always "no
/// binding, no authzid".
const GS2_HEADER: &str = "n,,";

const CLIENT_KEY: &[u8] = b"Client Key";
const SERVER_KEY: &[u8] = b"Server Key";

/// Per-attempt state of the SCRAM exchange.
///
/// Owned by the mechanism for exactly one attempt; every failure and
/// every completed run returns the state to `Fresh`, so a stale
/// transcript can never leak into the next attempt.
enum ScramState {
    Fresh,
    SentClientFirst {
        client_nonce: String,
        client_first_bare: String,
    },
    SentClientFinal {
        auth_message: String,
        salted_password: Vec<u8>,
        cache_id: Option<String>,
    },
    Completed,
}

/// A struct for the SASL SCRAM-* mechanisms.
pub struct Scram<S: ScramProvider> {
    name: String,
    state: ScramState,
    status: MechanismStatus,
    nonce_override: Option<String>,
    _marker: PhantomData<S>,
}

impl<S: ScramProvider> Scram<S> {
    /// Constructs a new struct for authenticating using the SASL SCRAM-*
    /// mechanism of the chosen provider.
    pub fn new() -> Scram<S> {
        Scram {
            name: format!("SCRAM-{}", S::name()),
            state: ScramState::Fresh,
            status: MechanismStatus::New,
            nonce_override: None,
            _marker: PhantomData,
        }
    }

    // Used for testing against fixed vectors.
    #[doc(hidden)]
    pub fn new_with_nonce(nonce: String) -> Scram<S> {
        Scram {
            nonce_override: Some(nonce),
            ..Scram::new()
        }
    }

    fn salted_password(
        &self,
        credentials: &Credentials,
        cache_id: Option<&str>,
        salt: &[u8],
        iterations: u32,
    ) -> Result<Vec<u8>, MechanismError> {
        if let (Some(cache), Some(id), Some(identity)) =
            (&credentials.cache, cache_id, credentials.username())
        {
            if let Some(salted) = cache.get(identity, id) {
                return Ok(salted);
            }
        }
        let password = credentials.password().ok_or_else(|| {
            MechanismError::GenericError("SCRAM requires a password".to_owned())
        })?;
        Ok(hi::<S>(password.as_bytes(), salt, iterations)?)
    }

    fn verify_server_final(
        input: Option<&[u8]>,
        auth_message: &str,
        salted_password: &[u8],
    ) -> Result<(), MechanismError> {
        let input = input.ok_or_else(|| {
            MechanismError::BadChallenge("received empty server-final-message".to_owned())
        })?;
        let message = str::from_utf8(input).map_err(|_| {
            MechanismError::BadChallenge("server-final-message is not valid UTF-8".to_owned())
        })?;

        match ServerFinalMessage::parse(message)? {
            ServerFinalMessage::Error(condition) => Err(MechanismError::BadChallenge(format!(
                "server rejected authentication: {}",
                condition
            ))),
            ServerFinalMessage::Verifier(signature) => {
                let server_key = S::hmac(salted_password, SERVER_KEY)?;
                let server_signature = S::hmac(&server_key, auth_message.as_bytes())?;
                if signature != server_signature {
                    return Err(MechanismError::InvalidServerSignature);
                }
                Ok(())
            }
        }
    }

    fn clear_cache(credentials: &Credentials) {
        if let (Some(cache), Some(identity)) = (&credentials.cache, credentials.username()) {
            cache.clear(identity);
        }
    }

    fn step(
        &mut self,
        state: ScramState,
        input: Option<&[u8]>,
        credentials: &Credentials,
    ) -> Result<(ScramState, MechanismStatus, Option<Vec<u8>>), MechanismError> {
        match state {
            ScramState::Fresh => {
                if input.is_some() {
                    return Err(MechanismError::GenericError(
                        "initial SCRAM message takes no input".to_owned(),
                    ));
                }
                let username = credentials.username().ok_or_else(|| {
                    MechanismError::GenericError("SCRAM requires a username".to_owned())
                })?;
                let client_nonce = self
                    .nonce_override
                    .clone()
                    .unwrap_or_else(generate_nonce);

                let client_first_bare = format!("n={},r={}", username, client_nonce);
                let message = format!("{}{}", GS2_HEADER, client_first_bare);

                Ok((
                    ScramState::SentClientFirst {
                        client_nonce,
                        client_first_bare,
                    },
                    MechanismStatus::New,
                    Some(message.into_bytes()),
                ))
            }
            ScramState::SentClientFirst {
                client_nonce,
                client_first_bare,
            } => {
                let input = input.ok_or_else(|| {
                    MechanismError::BadChallenge("received empty challenge".to_owned())
                })?;
                let server_first = str::from_utf8(input).map_err(|_| {
                    MechanismError::BadChallenge(
                        "server-first-message is not valid UTF-8".to_owned(),
                    )
                })?;
                let parsed = ServerFirstMessage::parse(server_first)?;
                if !parsed.nonce.starts_with(&client_nonce) {
                    return Err(MechanismError::WrongNonce);
                }
                if parsed.iterations == 0 {
                    return Err(MechanismError::BadChallenge(
                        "iteration count must be positive".to_owned(),
                    ));
                }

                let channel_binding = Base64.encode(GS2_HEADER);
                let client_final_bare = format!("c={},r={}", channel_binding, parsed.nonce);
                let auth_message = format!(
                    "{},{},{}",
                    client_first_bare, server_first, client_final_bare
                );

                let cache_id = credentials
                    .cache
                    .as_ref()
                    .map(|_| salted_password_id(&self.name, &parsed.salt, parsed.iterations));
                let salted_password = self.salted_password(
                    credentials,
                    cache_id.as_deref(),
                    &parsed.salt,
                    parsed.iterations,
                )?;

                let client_key = S::hmac(&salted_password, CLIENT_KEY)?;
                let stored_key = S::digest(&client_key);
                let client_signature = S::hmac(&stored_key, auth_message.as_bytes())?;
                let client_proof = xor(&client_key, &client_signature);

                let client_final =
                    format!("{},p={}", client_final_bare, Base64.encode(client_proof));

                Ok((
                    ScramState::SentClientFinal {
                        auth_message,
                        salted_password,
                        cache_id,
                    },
                    MechanismStatus::CompletedExpected,
                    Some(client_final.into_bytes()),
                ))
            }
            ScramState::SentClientFinal {
                auth_message,
                salted_password,
                cache_id,
            } => {
                match Self::verify_server_final(input, &auth_message, &salted_password) {
                    Ok(()) => {
                        if let (Some(cache), Some(id), Some(identity)) =
                            (&credentials.cache, &cache_id, credentials.username())
                        {
                            cache.store(identity, id, &salted_password);
                        }
                        Ok((ScramState::Completed, MechanismStatus::Completed, None))
                    }
                    Err(err) => {
                        // A derivation that failed verification must not
                        // be retried silently.
                        Self::clear_cache(credentials);
                        Err(err)
                    }
                }
            }
            ScramState::Completed => {
                if input.is_some() {
                    return Err(MechanismError::GenericError(
                        "client in illegal state: already authenticated".to_owned(),
                    ));
                }
                Ok((ScramState::Completed, MechanismStatus::Completed, None))
            }
        }
    }
}

impl<S: ScramProvider> Default for Scram<S> {
    fn default() -> Scram<S> {
        Scram::new()
    }
}

impl<S: ScramProvider> Mechanism for Scram<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> MechanismStatus {
        self.status
    }

    fn evaluate_challenge(
        &mut self,
        input: Option<&[u8]>,
        credentials: &Credentials,
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        let state = std::mem::replace(&mut self.state, ScramState::Fresh);
        match self.step(state, input, credentials) {
            Ok((state, status, response)) => {
                self.state = state;
                self.status = status;
                Ok(response)
            }
            Err(err) => {
                // The attempt is over; its transcript and keys are gone.
                self.status = MechanismStatus::New;
                Err(err)
            }
        }
    }

    fn is_allowed_to_use(&self, credentials: &Credentials) -> bool {
        matches!(credentials.secret, Secret::Password(_)) && credentials.username().is_some()
    }

    fn reset(&mut self) {
        self.state = ScramState::Fresh;
        self.status = MechanismStatus::New;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemorySaltedPasswordCache, SaltedPasswordCache};
    use std::sync::Arc;

    // Source: https://wiki.xmpp.org/web/SASLandSCRAM-SHA-1
    const SHA1_CLIENT_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const SHA1_CLIENT_FIRST: &[u8] = b"n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL";
    const SHA1_SERVER_FIRST: &[u8] =
        b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
    const SHA1_CLIENT_FINAL: &[u8] =
        b"c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts=";
    const SHA1_SERVER_FINAL: &[u8] = b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=";

    fn credentials() -> Credentials {
        Credentials::default()
            .with_username("user")
            .with_password("pencil")
    }

    fn run_until_proof(creds: &Credentials) -> Scram<Sha1> {
        let mut mechanism = Scram::<Sha1>::new_with_nonce(SHA1_CLIENT_NONCE.to_owned());
        let first = mechanism.evaluate_challenge(None, creds).unwrap().unwrap();
        assert_eq!(first, SHA1_CLIENT_FIRST);
        let proof = mechanism
            .evaluate_challenge(Some(SHA1_SERVER_FIRST), creds)
            .unwrap()
            .unwrap();
        assert_eq!(proof, SHA1_CLIENT_FINAL);
        assert_eq!(mechanism.status(), MechanismStatus::CompletedExpected);
        mechanism
    }

    #[test]
    fn scram_sha1_works() {
        let creds = credentials();
        let mut mechanism = run_until_proof(&creds);
        assert_eq!(
            mechanism
                .evaluate_challenge(Some(SHA1_SERVER_FINAL), &creds)
                .unwrap(),
            None
        );
        assert_eq!(mechanism.status(), MechanismStatus::Completed);

        // Trailing success evaluation is legal only without input.
        assert_eq!(mechanism.evaluate_challenge(None, &creds).unwrap(), None);
        assert!(matches!(
            mechanism.evaluate_challenge(Some(b"x"), &creds),
            Err(MechanismError::GenericError(_))
        ));
    }

    #[test]
    fn scram_sha256_works() {
        // Source: RFC 7677
        let creds = credentials();
        let mut mechanism =
            Scram::<Sha256>::new_with_nonce("rOprNGfwEbeRWgbNEkqO".to_owned());
        let first = mechanism.evaluate_challenge(None, &creds).unwrap().unwrap();
        assert_eq!(first, b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
        let proof = mechanism
            .evaluate_challenge(
                Some(b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096"),
                &creds,
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            proof,
            &b"c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="[..]
        );
        assert_eq!(
            mechanism
                .evaluate_challenge(
                    Some(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4="),
                    &creds
                )
                .unwrap(),
            None
        );
        assert_eq!(mechanism.status(), MechanismStatus::Completed);
    }

    #[test]
    fn rejects_wrong_nonce() {
        let creds = credentials();
        let mut mechanism = Scram::<Sha1>::new_with_nonce(SHA1_CLIENT_NONCE.to_owned());
        mechanism.evaluate_challenge(None, &creds).unwrap();
        assert_eq!(
            mechanism.evaluate_challenge(
                Some(b"r=differentnonce,s=QSXCR+Q6sek8bf92,i=4096"),
                &creds
            ),
            Err(MechanismError::WrongNonce)
        );
        assert_eq!(mechanism.status(), MechanismStatus::New);
    }

    #[test]
    fn rejects_invalid_server_signature() {
        let creds = credentials();
        let mut mechanism = run_until_proof(&creds);
        assert_eq!(
            mechanism.evaluate_challenge(Some(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAA="), &creds),
            Err(MechanismError::InvalidServerSignature)
        );
        assert_ne!(mechanism.status(), MechanismStatus::Completed);
    }

    #[test]
    fn reports_server_error_field() {
        let creds = credentials();
        let mut mechanism = run_until_proof(&creds);
        assert!(matches!(
            mechanism.evaluate_challenge(Some(b"e=invalid-proof"), &creds),
            Err(MechanismError::BadChallenge(_))
        ));
    }

    #[test]
    fn malformed_challenge_does_not_advance_the_exchange() {
        let creds = credentials();
        let mut mechanism = Scram::<Sha1>::new_with_nonce(SHA1_CLIENT_NONCE.to_owned());
        mechanism.evaluate_challenge(None, &creds).unwrap();
        assert!(matches!(
            mechanism.evaluate_challenge(Some(b"not a scram message"), &creds),
            Err(MechanismError::BadChallenge(_))
        ));
        assert_eq!(mechanism.status(), MechanismStatus::New);

        // The attempt is dead: the old server-first-message no longer
        // applies, it would have to start over.
        assert!(mechanism
            .evaluate_challenge(Some(SHA1_SERVER_FIRST), &creds)
            .is_err());
    }

    #[test]
    fn cache_does_not_change_wire_bytes() {
        let cache: Arc<dyn SaltedPasswordCache> = Arc::new(InMemorySaltedPasswordCache::new());
        let cached_creds = credentials().with_cache(Arc::clone(&cache));

        // First run, derives and (on success) persists.
        let mut mechanism = run_until_proof(&cached_creds);
        mechanism
            .evaluate_challenge(Some(SHA1_SERVER_FINAL), &cached_creds)
            .unwrap();
        let id = salted_password_id(
            "SCRAM-SHA-1",
            &Base64.decode("QSXCR+Q6sek8bf92").unwrap(),
            4096,
        );
        assert!(cache.get("user", &id).is_some());

        // Second run hits the cache and must produce identical output.
        mechanism.reset();
        let mut cached = Scram::<Sha1>::new_with_nonce(SHA1_CLIENT_NONCE.to_owned());
        cached.evaluate_challenge(None, &cached_creds).unwrap();
        let proof = cached
            .evaluate_challenge(Some(SHA1_SERVER_FIRST), &cached_creds)
            .unwrap()
            .unwrap();
        assert_eq!(proof, SHA1_CLIENT_FINAL);
    }

    #[test]
    fn cache_is_not_persisted_before_success() {
        let cache: Arc<dyn SaltedPasswordCache> = Arc::new(InMemorySaltedPasswordCache::new());
        let creds = credentials().with_cache(Arc::clone(&cache));
        let _mechanism = run_until_proof(&creds);

        let id = salted_password_id(
            "SCRAM-SHA-1",
            &Base64.decode("QSXCR+Q6sek8bf92").unwrap(),
            4096,
        );
        assert_eq!(cache.get("user", &id), None);
    }

    #[test]
    fn failed_verification_clears_the_cache() {
        let cache: Arc<dyn SaltedPasswordCache> = Arc::new(InMemorySaltedPasswordCache::new());
        let id = salted_password_id(
            "SCRAM-SHA-1",
            &Base64.decode("QSXCR+Q6sek8bf92").unwrap(),
            4096,
        );
        // Seed with a wrong derivation, as if the password had changed.
        cache.store("user", &id, b"stale and wrong");

        let creds = credentials().with_cache(Arc::clone(&cache));
        let mut mechanism = Scram::<Sha1>::new_with_nonce(SHA1_CLIENT_NONCE.to_owned());
        mechanism.evaluate_challenge(None, &creds).unwrap();
        mechanism
            .evaluate_challenge(Some(SHA1_SERVER_FIRST), &creds)
            .unwrap();
        // The proof built from the stale key would be rejected; the
        // server's signature cannot verify either way.
        assert_eq!(
            mechanism.evaluate_challenge(Some(SHA1_SERVER_FINAL), &creds),
            Err(MechanismError::InvalidServerSignature)
        );
        assert_eq!(cache.get("user", &id), None);
    }

    #[test]
    fn requires_password_credentials() {
        let mechanism = Scram::<Sha1>::new();
        assert!(!mechanism.is_allowed_to_use(&Credentials::default()));
        assert!(!mechanism.is_allowed_to_use(&Credentials::default().with_password("pencil")));
        assert!(mechanism.is_allowed_to_use(&credentials()));
        assert_eq!(mechanism.name(), "SCRAM-SHA-1");
    }
}
