//! Helpers for minting tokens and scripting key sources in tests
//!
//! Two RSA-2048 key pairs ship with the crate: the signing key, whose public
//! half is published in the test key set, and a rogue key that is published
//! nowhere. Tokens minted here are real RS256 (or PS256) signatures.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use barista_clock::UnixTime;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::{rand::SystemRandom, signature::RsaKeyPair};
use serde::Serialize;

use crate::{
    error::KeyFetchError,
    jwa::Algorithm,
    jwks::{KeyId, KeySet, SigningKey},
    jwt::{Jwt, TokenHeader},
    resolver::{Fetched, KeySource},
};

/// Identifier of the published test key
pub const SIGNING_KID: &str = "barista-test-key";

/// Identifier of the key that is never published
pub const ROGUE_KID: &str = "barista-rogue-key";

/// Issuer used by test tokens
pub const ISSUER: &str = "https://barista.test/";

/// Audience used by test tokens
pub const AUDIENCE: &str = "drinks";

/// Subject used by test tokens
pub const SUBJECT: &str = "auth0|barista-tester";

const SIGNING_KEY_DER: &[u8] = include_bytes!("../data/rsa/signing-key.pk8.der");
const ROGUE_KEY_DER: &[u8] = include_bytes!("../data/rsa/rogue-key.pk8.der");
const SIGNING_JWK: &str = include_str!("../data/rsa/signing-jwk.json");
const ROGUE_JWK: &str = include_str!("../data/rsa/rogue-jwk.json");

/// The public half of the signing key
pub fn signing_jwk() -> SigningKey {
    serde_json::from_str(SIGNING_JWK).expect("signing JWK fixture is valid")
}

/// The public half of the rogue key
pub fn rogue_jwk() -> SigningKey {
    serde_json::from_str(ROGUE_JWK).expect("rogue JWK fixture is valid")
}

/// A key set holding only the signing key
pub fn key_set() -> KeySet {
    [signing_jwk()].into_iter().collect()
}

/// A claims payload that passes validation at `now` against the test
/// issuer and audience, granting `permissions`
pub fn claims_json(now: UnixTime, permissions: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "sub": SUBJECT,
        "iss": ISSUER,
        "aud": AUDIENCE,
        "iat": now.0,
        "exp": now.saturating_add(3600).0,
        "permissions": permissions,
    })
}

/// Signs test tokens with one of the fixture private keys
#[derive(Debug)]
pub struct TestSigner {
    kid: KeyId,
    key_pair: RsaKeyPair,
    rng: SystemRandom,
}

impl TestSigner {
    fn from_der(kid: &'static str, der: &[u8]) -> Self {
        Self {
            kid: KeyId::from_static(kid),
            key_pair: RsaKeyPair::from_pkcs8(der).expect("private key fixture is valid"),
            rng: SystemRandom::new(),
        }
    }

    /// The signer whose public key is in [`key_set`]
    #[must_use]
    pub fn signing() -> Self {
        Self::from_der(SIGNING_KID, SIGNING_KEY_DER)
    }

    /// A signer for a key that is not published anywhere
    ///
    /// Its tokens name [`SIGNING_KID`] so that they resolve to the published
    /// key and fail signature verification.
    #[must_use]
    pub fn rogue() -> Self {
        Self {
            kid: KeyId::from_static(SIGNING_KID),
            ..Self::from_der(ROGUE_KID, ROGUE_KEY_DER)
        }
    }

    /// Signs `message` with RS256
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.sign_as(Algorithm::RS256, message)
    }

    /// Signs `message` with the given algorithm
    #[must_use]
    pub fn sign_as(&self, alg: Algorithm, message: &[u8]) -> Vec<u8> {
        let padding: &'static dyn ring::signature::RsaEncoding = match alg {
            Algorithm::RS256 => &ring::signature::RSA_PKCS1_SHA256,
            Algorithm::RS384 => &ring::signature::RSA_PKCS1_SHA384,
            Algorithm::RS512 => &ring::signature::RSA_PKCS1_SHA512,
            Algorithm::PS256 => &ring::signature::RSA_PSS_SHA256,
            Algorithm::PS384 => &ring::signature::RSA_PSS_SHA384,
            Algorithm::PS512 => &ring::signature::RSA_PSS_SHA512,
        };

        let mut signature = vec![0; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(padding, &self.rng, message, &mut signature)
            .expect("signing succeeds");
        signature
    }

    /// Mints an RS256 token carrying `claims`
    pub fn token(&self, claims: &impl Serialize) -> Jwt {
        let header = TokenHeader::new("RS256", Some(self.kid.clone()));
        self.token_with_header(&header, claims)
    }

    /// Mints a token with an arbitrary header
    ///
    /// The signature is made with the algorithm named in the header when it
    /// is an RSA algorithm, and with RS256 otherwise.
    pub fn token_with_header(&self, header: &TokenHeader, claims: &impl Serialize) -> Jwt {
        let payload = serde_json::to_vec(claims).expect("claims serialize");
        self.token_with_raw_payload(header, &payload)
    }

    /// Mints a token over raw payload bytes
    pub fn token_with_raw_payload(&self, header: &TokenHeader, payload: &[u8]) -> Jwt {
        let alg = header.alg().parse::<Algorithm>().unwrap_or_default();
        let header = serde_json::to_vec(header).expect("header serializes");

        let message = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.sign_as(alg, message.as_bytes());

        Jwt::new(format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Mints an RS256 token and formats it as an `Authorization` value
    #[must_use]
    pub fn bearer(&self, claims: &impl Serialize) -> String {
        format!("Bearer {}", self.token(claims).as_str())
    }
}

/// A shared count of fetches made through a [`ScriptedKeySource`]
#[derive(Clone, Debug, Default)]
pub struct FetchCount(Arc<AtomicUsize>);

impl FetchCount {
    /// The number of fetches so far
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A key source that plays back a fixed script of responses
///
/// Once the script runs out, every fetch fails with a 503 status.
#[derive(Debug, Default)]
pub struct ScriptedKeySource {
    script: VecDeque<Result<Fetched, KeyFetchError>>,
    delay: Option<Duration>,
    fetches: FetchCount,
}

impl ScriptedKeySource {
    /// Constructs an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits `delay` before answering each fetch
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answers the next fetch with `keys`
    #[must_use]
    pub fn then_keys(mut self, keys: KeySet) -> Self {
        self.script.push_back(Ok(Fetched::Updated(keys)));
        self
    }

    /// Answers the next fetch with "not modified"
    #[must_use]
    pub fn then_not_modified(mut self) -> Self {
        self.script.push_back(Ok(Fetched::NotModified));
        self
    }

    /// Fails the next fetch with `err`
    #[must_use]
    pub fn then_error(mut self, err: KeyFetchError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    /// A handle that observes how many fetches were made
    #[must_use]
    pub fn fetch_count(&self) -> FetchCount {
        self.fetches.clone()
    }
}

#[async_trait]
impl KeySource for ScriptedKeySource {
    async fn fetch(&mut self) -> Result<Fetched, KeyFetchError> {
        self.fetches.0.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .pop_front()
            .unwrap_or(Err(KeyFetchError::Status { status: 503 }))
    }
}
