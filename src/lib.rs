#![deny(missing_docs)]

//! This crate provides the SASL authentication engine of an XMPP client:
//! a set of client mechanisms (PLAIN, ANONYMOUS, SCRAM-SHA-1 and
//! SCRAM-SHA-256) and a negotiator driving the `auth`/`challenge`/
//! `response` exchange of RFC 6120 §6 over a caller-supplied transport.
//!
//! # Examples
//!
//! ```rust
//! use xmpp_sasl::mechanisms::{Mechanism, Plain};
//! use xmpp_sasl::Credentials;
//!
//! let creds = Credentials::default()
//!     .with_username("user")
//!     .with_password("pencil");
//!
//! let mut mechanism = Plain::new();
//! let initial = mechanism.evaluate_challenge(None, &creds).unwrap();
//!
//! assert_eq!(initial.as_deref(), Some(&b"\0user\0pencil"[..]));
//! ```
//!
//! The full handshake is run by [`SaslNegotiator::login`]; see the tests
//! in `tests/login.rs` for a complete exchange against a scripted
//! server, and the tests of `mechanisms/scram.rs` for the SCRAM state
//! machine on its own.

pub mod cache;
pub mod common;
mod error;
pub mod mechanisms;
mod negotiator;

pub use crate::common::{Credentials, Identity, Secret};
pub use crate::error::{AuthError, MechanismError, SaslError};
pub use crate::mechanisms::{Mechanism, MechanismStatus};
pub use crate::negotiator::{
    advertised_mechanisms, AuthorizationStatus, NegotiationAttempt, SaslNegotiator, SaslTransport,
    NS_SASL,
};
