//! SASL negotiation: mechanism registration and selection, and the
//! `auth`/`challenge`/`response` exchange of RFC 6120 §6.

use std::collections::HashMap;
use std::future::Future;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use log::{debug, warn};
use minidom::Element;

use crate::common::Credentials;
use crate::error::{AuthError, MechanismError, SaslError};
#[cfg(feature = "scram")]
use crate::mechanisms::{ScramSha1, ScramSha256};
use crate::mechanisms::{Mechanism, MechanismStatus, Plain};

/// XML namespace used for SASL negotiation and authentication.
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// Where an authentication attempt stands, as seen by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// No attempt has concluded.
    NotAuthorized,
    /// An exchange is under way.
    InProgress,
    /// The final proof was sent; the server's verdict is pending.
    ExpectedAuthorization,
    /// Authentication completed with mutual verification.
    Authorized,
    /// The attempt failed with the given condition.
    Error(SaslError),
}

/// One authentication attempt: the chosen mechanism, the advertised
/// list it was chosen from and the resulting status.
#[derive(Clone, Debug)]
pub struct NegotiationAttempt {
    /// Name of the mechanism driving the attempt.
    pub mechanism: String,
    /// Snapshot of the server-advertised mechanism names.
    pub advertised: Vec<String>,
    /// Outcome of the attempt.
    pub status: AuthorizationStatus,
}

/// Sends request stanzas and returns the next matching response.
///
/// Implemented by the connection layer; the negotiator issues one
/// round-trip per request and suspends until the reply (or a transport
/// failure, which abandons the attempt) arrives. Timeout policy belongs
/// to the implementation.
pub trait SaslTransport {
    /// The transport's own error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends `stanza` and resolves with the next SASL stanza the server
    /// returns.
    fn round_trip(
        &mut self,
        stanza: Element,
    ) -> impl Future<Output = Result<Element, Self::Error>> + Send;
}

/// Drives SASL authentication for one stream.
///
/// Holds the registered mechanisms in preference order and runs one
/// negotiation attempt at a time; a stream reset ([`reset`]) returns
/// every mechanism to a fresh state.
///
/// [`reset`]: SaslNegotiator::reset
pub struct SaslNegotiator {
    mechanisms: HashMap<String, Box<dyn Mechanism + Send>>,
    order: Vec<String>,
    attempt: Option<NegotiationAttempt>,
}

impl Default for SaslNegotiator {
    fn default() -> SaslNegotiator {
        let mut negotiator = SaslNegotiator::new();
        #[cfg(feature = "scram")]
        {
            negotiator.register(Box::new(ScramSha256::new()), false);
            negotiator.register(Box::new(ScramSha1::new()), false);
        }
        negotiator.register(Box::new(Plain::new()), false);
        #[cfg(feature = "anonymous")]
        negotiator.register(Box::new(crate::mechanisms::Anonymous::new()), false);
        negotiator
    }
}

impl SaslNegotiator {
    /// Creates a negotiator with no mechanisms registered.
    pub fn new() -> SaslNegotiator {
        SaslNegotiator {
            mechanisms: HashMap::new(),
            order: Vec::new(),
            attempt: None,
        }
    }

    /// Registers a mechanism, appending it to the preference order, or
    /// prepending it when `prefer_first` is set.
    ///
    /// Re-registering a known name replaces the mechanism but keeps its
    /// position; [`set_preference_order`] is the reordering operation.
    ///
    /// [`set_preference_order`]: SaslNegotiator::set_preference_order
    pub fn register(&mut self, mechanism: Box<dyn Mechanism + Send>, prefer_first: bool) {
        let name = mechanism.name().to_owned();
        if self.mechanisms.insert(name.clone(), mechanism).is_none() {
            if prefer_first {
                self.order.insert(0, name);
            } else {
                self.order.push(name);
            }
        }
    }

    /// Replaces the preference order.
    ///
    /// Names not currently registered are dropped silently; registered
    /// mechanisms absent from `names` are deregistered entirely, so this
    /// doubles as a pruning operation.
    pub fn set_preference_order(&mut self, names: &[&str]) {
        self.order = names
            .iter()
            .filter(|name| self.mechanisms.contains_key(**name))
            .map(|name| (*name).to_owned())
            .collect();
        let order = &self.order;
        self.mechanisms
            .retain(|name, _| order.iter().any(|kept| kept == name));
    }

    /// The registered mechanism names, in preference order.
    pub fn preference_order(&self) -> &[String] {
        &self.order
    }

    /// Name of the first mechanism, in preference order, that the server
    /// advertises and the credentials allow.
    pub fn select_mechanism(
        &self,
        advertised: &[String],
        credentials: &Credentials,
    ) -> Option<&str> {
        self.order
            .iter()
            .find(|name| {
                advertised.iter().any(|offered| offered == *name)
                    && self
                        .mechanisms
                        .get(*name)
                        .map_or(false, |mechanism| mechanism.is_allowed_to_use(credentials))
            })
            .map(String::as_str)
    }

    /// The current (or most recent) attempt, if any.
    pub fn attempt(&self) -> Option<&NegotiationAttempt> {
        self.attempt.as_ref()
    }

    /// Current authorization status, combining the attempt outcome with
    /// the chosen mechanism's progress.
    pub fn authorization_status(&self) -> AuthorizationStatus {
        match self.attempt.as_ref() {
            None => AuthorizationStatus::NotAuthorized,
            Some(attempt) => match &attempt.status {
                AuthorizationStatus::InProgress if self.in_progress() => {
                    AuthorizationStatus::ExpectedAuthorization
                }
                status => status.clone(),
            },
        }
    }

    /// True while the final proof was sent but mutual verification has
    /// not finished.
    pub fn in_progress(&self) -> bool {
        self.attempt
            .as_ref()
            .and_then(|attempt| self.mechanisms.get(&attempt.mechanism))
            .map_or(false, |mechanism| {
                mechanism.status() == MechanismStatus::CompletedExpected
            })
    }

    /// Returns every mechanism to a fresh state and forgets the current
    /// attempt, e.g. on stream reset or reconnect.
    pub fn reset(&mut self) {
        for mechanism in self.mechanisms.values_mut() {
            mechanism.reset();
        }
        self.attempt = None;
    }

    /// Runs the SASL handshake over `transport`.
    ///
    /// Selects a mechanism from `advertised`, sends the `auth` request
    /// and feeds every server reply back into the mechanism until the
    /// server reports `success` or `failure`. A `success` is only
    /// accepted once the mechanism's own verification has completed;
    /// a server claiming success without passing it is reported as
    /// `server-not-trusted`.
    pub async fn login<T: SaslTransport>(
        &mut self,
        transport: &mut T,
        credentials: &Credentials,
        advertised: &[String],
    ) -> Result<(), AuthError> {
        self.attempt = None;
        let name = match self.select_mechanism(advertised, credentials) {
            Some(name) => name.to_owned(),
            None => {
                warn!("no usable SASL mechanism among {:?}", advertised);
                return Err(AuthError::Sasl(SaslError::InvalidMechanism));
            }
        };

        debug!("starting SASL authentication with {}", name);
        self.attempt = Some(NegotiationAttempt {
            mechanism: name.clone(),
            advertised: advertised.to_vec(),
            status: AuthorizationStatus::InProgress,
        });

        let result = self.exchange(&name, transport, credentials).await;
        let status = match &result {
            Ok(()) => AuthorizationStatus::Authorized,
            Err(err) => {
                warn!("SASL authentication failed: {}", err);
                AuthorizationStatus::Error(err.condition())
            }
        };
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.status = status;
        }
        result
    }

    async fn exchange<T: SaslTransport>(
        &mut self,
        name: &str,
        transport: &mut T,
        credentials: &Credentials,
    ) -> Result<(), AuthError> {
        let mechanism = self
            .mechanisms
            .get_mut(name)
            .ok_or(AuthError::Sasl(SaslError::InvalidMechanism))?;

        let initial = mechanism.evaluate_challenge(None, credentials)?;
        let mut request = Element::builder("auth", NS_SASL).attr("mechanism", name);
        if let Some(payload) = initial {
            request = request.append(Base64.encode(payload));
        }
        let mut reply = transport
            .round_trip(request.build())
            .await
            .map_err(AuthError::transport)?;

        loop {
            if reply.is("challenge", NS_SASL) {
                let payload = decode_payload(&reply)?;
                let response = mechanism.evaluate_challenge(Some(&payload), credentials)?;
                let mut element = Element::builder("response", NS_SASL);
                if let Some(data) = response {
                    element = element.append(Base64.encode(data));
                }
                reply = transport
                    .round_trip(element.build())
                    .await
                    .map_err(AuthError::transport)?;
            } else if reply.is("success", NS_SASL) {
                let text = reply.text();
                let data = if text.trim().is_empty() {
                    None
                } else {
                    Some(decode_payload(&reply)?)
                };
                mechanism.evaluate_challenge(data.as_deref(), credentials)?;
                if mechanism.status() == MechanismStatus::Completed {
                    debug!("authenticated");
                    return Ok(());
                }
                // The server claims success but our own verification
                // did not accept its responses.
                warn!("authenticated by server but responses not accepted by client");
                return Err(AuthError::Sasl(SaslError::ServerNotTrusted));
            } else if reply.is("failure", NS_SASL) {
                return Err(AuthError::Sasl(parse_failure(&reply)));
            } else {
                return Err(AuthError::UnexpectedResponse(reply.name().to_owned()));
            }
        }
    }
}

fn decode_payload(element: &Element) -> Result<Vec<u8>, AuthError> {
    let text = element.text();
    Base64
        .decode(text.trim())
        .map_err(|_| {
            AuthError::from(MechanismError::BadChallenge(
                "payload is not valid base64".to_owned(),
            ))
        })
}

fn parse_failure(failure: &Element) -> SaslError {
    let condition = failure
        .children()
        .find(|child| child.name() != "text")
        .map(|child| child.name().to_owned());
    if let Some(text) = failure.get_child("text", NS_SASL) {
        debug!("server failure text: {}", text.text());
    }
    condition
        .as_deref()
        .and_then(SaslError::from_condition)
        .unwrap_or(SaslError::NotAuthorized)
}

/// Extracts the advertised mechanism names from a stream-features
/// element (one `mechanism` child per name under `mechanisms`).
pub fn advertised_mechanisms(features: &Element) -> Vec<String> {
    let mut names = Vec::new();
    for mechanisms in features
        .children()
        .filter(|child| child.is("mechanisms", NS_SASL))
    {
        for mechanism in mechanisms
            .children()
            .filter(|child| child.is("mechanism", NS_SASL))
        {
            names.push(mechanism.text());
        }
    }
    names
}
