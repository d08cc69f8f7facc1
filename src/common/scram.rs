//! SCRAM building blocks: hash providers, key derivation and the
//! server-message grammar.

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha1::{Digest, Sha1 as Sha1Hash};
use sha2::Sha256 as Sha256Hash;

use crate::error::MechanismError;

/// Length of the generated client nonce, in characters.
const NONCE_LENGTH: usize = 20;

/// Generates a client nonce: printable, comma-free, drawn from
/// `[A-Za-z0-9]`.
pub fn generate_nonce() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LENGTH)
        .map(char::from)
        .collect()
}

/// A trait which defines the cryptographic primitives SCRAM needs.
///
/// Implementations are stateless; a mechanism is generic over its
/// provider so that the digest/HMAC step can be swapped without touching
/// the exchange logic.
pub trait ScramProvider {
    /// The name of the hash function, as used in the mechanism name.
    fn name() -> &'static str;

    /// Hashes the data using the hash function.
    fn digest(data: &[u8]) -> Vec<u8>;

    /// Computes an HMAC over `data`, keyed with `key`.
    fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, InvalidLength>;
}

/// A `ScramProvider` for SCRAM-SHA-1.
pub struct Sha1;

impl ScramProvider for Sha1 {
    fn name() -> &'static str {
        "SHA-1"
    }

    fn digest(data: &[u8]) -> Vec<u8> {
        Sha1Hash::digest(data).to_vec()
    }

    fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, InvalidLength> {
        let mut mac = Hmac::<Sha1Hash>::new_from_slice(key)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// A `ScramProvider` for SCRAM-SHA-256.
pub struct Sha256;

impl ScramProvider for Sha256 {
    fn name() -> &'static str {
        "SHA-256"
    }

    fn digest(data: &[u8]) -> Vec<u8> {
        Sha256Hash::digest(data).to_vec()
    }

    fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, InvalidLength> {
        let mut mac = Hmac::<Sha256Hash>::new_from_slice(key)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// The `Hi` salted-password derivation (RFC 5802 §2.2):
/// `U1 = HMAC(password, salt || INT(1))`, `Uk = HMAC(password, Uk-1)`,
/// result is the byte-wise XOR of all rounds.
pub fn hi<S: ScramProvider>(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, InvalidLength> {
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&[0, 0, 0, 1]);

    let mut u = S::hmac(password, &block)?;
    let mut result = u.clone();
    for _ in 1..iterations {
        u = S::hmac(password, &u)?;
        for (acc, byte) in result.iter_mut().zip(&u) {
            *acc ^= byte;
        }
    }
    Ok(result)
}

/// Cache id for a derived salted password: hex SHA-1 over the mechanism
/// name, the decimal iteration count and the salt.
pub fn salted_password_id(mechanism_name: &str, salt: &[u8], iterations: u32) -> String {
    let mut hasher = Sha1Hash::new();
    hasher.update(mechanism_name.as_bytes());
    hasher.update(iterations.to_string().as_bytes());
    hasher.update(salt);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

// Character classes from the authoritative server-message grammar.

fn is_nonce_char(byte: u8) -> bool {
    (0x21..=0x7e).contains(&byte) && byte != b','
}

fn is_base64_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'/' || byte == b'+' || byte == b'='
}

fn bad(msg: &str) -> MechanismError {
    MechanismError::BadChallenge(msg.to_owned())
}

/// A parsed SCRAM `server-first-message`.
///
/// Accepts `[m=ext,]r=nonce,s=salt,i=iterations[,ext…]` with the fields
/// in exactly that order; anything else is a bad challenge.
#[derive(Debug, PartialEq, Eq)]
pub struct ServerFirstMessage {
    /// The combined client+server nonce.
    pub nonce: String,
    /// The decoded salt.
    pub salt: Vec<u8>,
    /// The iteration count for the salted-password derivation.
    pub iterations: u32,
}

impl ServerFirstMessage {
    /// Parses a `server-first-message`.
    pub fn parse(message: &str) -> Result<ServerFirstMessage, MechanismError> {
        let mut fields = message.split(',');

        let mut field = fields.next().ok_or_else(|| bad("empty challenge"))?;
        if let Some(ext) = field.strip_prefix("m=") {
            if ext.is_empty() || ext.contains('=') || ext.contains('\0') {
                return Err(bad("invalid mandatory extension"));
            }
            field = fields.next().ok_or_else(|| bad("missing nonce"))?;
        }

        let nonce = field.strip_prefix("r=").ok_or_else(|| bad("missing nonce"))?;
        if nonce.is_empty() || !nonce.bytes().all(is_nonce_char) {
            return Err(bad("invalid nonce"));
        }

        let salt_b64 = fields
            .next()
            .and_then(|f| f.strip_prefix("s="))
            .ok_or_else(|| bad("missing salt"))?;
        if salt_b64.is_empty() || !salt_b64.bytes().all(is_base64_char) {
            return Err(bad("invalid salt"));
        }
        let salt = Base64
            .decode(salt_b64)
            .map_err(|_| bad("invalid encoding of salt"))?;

        let iterations = fields
            .next()
            .and_then(|f| f.strip_prefix("i="))
            .ok_or_else(|| bad("missing iteration count"))?;
        if iterations.is_empty() || !iterations.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("invalid iteration count"));
        }
        let iterations: u32 = iterations
            .parse()
            .map_err(|_| bad("invalid iteration count"))?;

        // Remaining comma-separated fields are extensions; tolerated.
        Ok(ServerFirstMessage {
            nonce: nonce.to_owned(),
            salt,
            iterations,
        })
    }
}

/// A parsed SCRAM `server-final-message`: either a server error or the
/// server signature to verify.
#[derive(Debug, PartialEq, Eq)]
pub enum ServerFinalMessage {
    /// `e=`: the server rejected the exchange.
    Error(String),
    /// `v=`: the decoded server signature.
    Verifier(Vec<u8>),
}

impl ServerFinalMessage {
    /// Parses a `server-final-message`.
    pub fn parse(message: &str) -> Result<ServerFinalMessage, MechanismError> {
        let mut fields = message.split(',');
        let field = fields.next().ok_or_else(|| bad("empty challenge"))?;

        if let Some(error) = field.strip_prefix("e=") {
            // The error branch admits no trailing fields.
            if error.is_empty() || fields.next().is_some() {
                return Err(bad("invalid server error"));
            }
            return Ok(ServerFinalMessage::Error(error.to_owned()));
        }

        let verifier = field
            .strip_prefix("v=")
            .ok_or_else(|| bad("missing server signature"))?;
        if verifier.is_empty() || !verifier.bytes().all(is_base64_char) {
            return Err(bad("invalid server signature"));
        }
        let verifier = Base64
            .decode(verifier)
            .map_err(|_| bad("invalid encoding of server signature"))?;

        // Remaining comma-separated fields are extensions; tolerated.
        Ok(ServerFinalMessage::Verifier(verifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbkdf2::pbkdf2;

    #[test]
    fn nonce_is_alphanumeric() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 20);
        assert!(nonce.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn hi_is_deterministic() {
        let a = hi::<Sha1>(b"pencil", b"QSXCR+Q6sek8bf92", 4096).unwrap();
        let b = hi::<Sha1>(b"pencil", b"QSXCR+Q6sek8bf92", 4096).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hi_matches_reference_pbkdf2() {
        let salt = Base64.decode("QSXCR+Q6sek8bf92").unwrap();

        let mut expected = [0u8; 20];
        pbkdf2::<Hmac<Sha1Hash>>(b"pencil", &salt, 4096, &mut expected).unwrap();
        assert_eq!(hi::<Sha1>(b"pencil", &salt, 4096).unwrap(), expected);

        let mut expected = [0u8; 32];
        pbkdf2::<Hmac<Sha256Hash>>(b"pencil", &salt, 4096, &mut expected).unwrap();
        assert_eq!(hi::<Sha256>(b"pencil", &salt, 4096).unwrap(), expected);
    }

    #[test]
    fn hi_single_iteration_is_first_hmac_block() {
        let mut block = b"salt".to_vec();
        block.extend_from_slice(&[0, 0, 0, 1]);
        let expected = Sha1::hmac(b"password", &block).unwrap();
        assert_eq!(hi::<Sha1>(b"password", b"salt", 1).unwrap(), expected);
    }

    #[test]
    fn salted_password_id_depends_on_all_inputs() {
        let id = salted_password_id("SCRAM-SHA-1", b"salt", 4096);
        assert_eq!(id.len(), 40);
        assert_ne!(id, salted_password_id("SCRAM-SHA-256", b"salt", 4096));
        assert_ne!(id, salted_password_id("SCRAM-SHA-1", b"other", 4096));
        assert_ne!(id, salted_password_id("SCRAM-SHA-1", b"salt", 4097));
    }

    #[test]
    fn parses_server_first_message() {
        let parsed = ServerFirstMessage::parse(
            "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096",
        )
        .unwrap();
        assert_eq!(parsed.nonce, "fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j");
        assert_eq!(parsed.salt, Base64.decode("QSXCR+Q6sek8bf92").unwrap());
        assert_eq!(parsed.iterations, 4096);
    }

    #[test]
    fn parses_server_first_message_with_extensions() {
        let parsed =
            ServerFirstMessage::parse("m=ext,r=abc,s=c2FsdA==,i=10,x=future").unwrap();
        assert_eq!(parsed.nonce, "abc");
        assert_eq!(parsed.salt, b"salt");
        assert_eq!(parsed.iterations, 10);
    }

    #[test]
    fn rejects_malformed_server_first_messages() {
        for message in [
            "",
            "r=abc",
            "r=abc,s=c2FsdA==",
            "s=c2FsdA==,r=abc,i=10",
            "r=abc,s=c2FsdA==,i=",
            "r=abc,s=c2FsdA==,i=10x",
            "r=abc,s=!!,i=10",
            "r=,s=c2FsdA==,i=10",
            "m=,r=abc,s=c2FsdA==,i=10",
            "r=a b,s=c2FsdA==,i=10",
            "r=abc,s=c2FsdA==,i=99999999999999999999",
        ] {
            assert!(
                matches!(
                    ServerFirstMessage::parse(message),
                    Err(MechanismError::BadChallenge(_))
                ),
                "accepted {:?}",
                message
            );
        }
    }

    #[test]
    fn parses_server_final_message() {
        assert_eq!(
            ServerFinalMessage::parse("v=cmlnaHQ=").unwrap(),
            ServerFinalMessage::Verifier(b"right".to_vec())
        );
        assert_eq!(
            ServerFinalMessage::parse("v=cmlnaHQ=,x=future").unwrap(),
            ServerFinalMessage::Verifier(b"right".to_vec())
        );
        assert_eq!(
            ServerFinalMessage::parse("e=invalid-proof").unwrap(),
            ServerFinalMessage::Error("invalid-proof".to_owned())
        );
    }

    #[test]
    fn rejects_malformed_server_final_messages() {
        for message in ["", "p=abc", "v=", "v=!!", "e=", "e=invalid-proof,x=1"] {
            assert!(
                matches!(
                    ServerFinalMessage::parse(message),
                    Err(MechanismError::BadChallenge(_))
                ),
                "accepted {:?}",
                message
            );
        }
    }
}
