//! Signature and claims validation

use barista_clock::{Clock, System, UnixTime};

use crate::{
    claims::{Audience, AudienceRef, Claims, Issuer, IssuerRef},
    error::AuthError,
    jwa::Algorithm,
    jwks::SigningKey,
    jwt::{Decomposed, JwtRef},
    resolver::KeyResolver,
};

/// The policy a token must satisfy to be accepted
///
/// A token is accepted only if it is signed with the mandated algorithm by a
/// key the resolver knows, is not yet expired, was issued by the configured
/// issuer, and names the configured audience.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct TokenValidator {
    algorithm: Algorithm,
    issuer: Issuer,
    audience: Audience,
}

impl TokenValidator {
    /// Constructs a validator
    pub fn new(algorithm: Algorithm, issuer: impl Into<Issuer>, audience: impl Into<Audience>) -> Self {
        Self {
            algorithm,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// The mandated algorithm
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The expected issuer
    #[must_use]
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// The expected audience
    #[must_use]
    pub fn audience(&self) -> &AudienceRef {
        &self.audience
    }

    /// Validates `token` against the system clock
    ///
    /// # Errors
    ///
    /// Returns the first check the token fails, in pipeline order.
    pub async fn validate(&self, token: &JwtRef, keys: &KeyResolver) -> Result<Claims, AuthError> {
        self.validate_with_clock(token, keys, &System).await
    }

    /// Validates `token`, judging expiry by `clock`
    ///
    /// # Errors
    ///
    /// Returns the first check the token fails, in pipeline order:
    /// structure, algorithm, key, signature, claims shape, expiry, issuer,
    /// audience.
    pub async fn validate_with_clock(
        &self,
        token: &JwtRef,
        keys: &KeyResolver,
        clock: &(dyn Clock + Send + Sync),
    ) -> Result<Claims, AuthError> {
        let decomposed = token.decompose()?;
        let header = decomposed.untrusted_header();

        if header.alg() != self.algorithm.as_str() {
            return Err(AuthError::UnsupportedAlgorithm {
                alg: header.alg().to_owned(),
            });
        }

        let kid = header.kid().ok_or(AuthError::InvalidKey {
            reason: "token header does not name a key",
        })?;

        let key = keys.resolve(kid).await?;

        self.verify_with_key(&decomposed, &key, clock.now())
    }

    /// Runs the checks that follow key resolution
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`], [`AuthError::InvalidSignature`],
    /// [`AuthError::MalformedClaims`], [`AuthError::TokenExpired`],
    /// [`AuthError::InvalidIssuer`] or [`AuthError::InvalidAudience`].
    pub fn verify_with_key(
        &self,
        decomposed: &Decomposed<'_>,
        key: &SigningKey,
        now: UnixTime,
    ) -> Result<Claims, AuthError> {
        key.check_usable(self.algorithm)?;
        if !decomposed.has_canonical_signature() {
            return Err(AuthError::InvalidSignature);
        }
        key.verify(
            self.algorithm,
            decomposed.message().as_bytes(),
            decomposed.signature(),
        )?;

        let claims: Claims = serde_json::from_slice(decomposed.untrusted_payload())
            .map_err(AuthError::malformed_claims)?;

        self.check_claims(&claims, now)?;

        Ok(claims)
    }

    fn check_claims(&self, claims: &Claims, now: UnixTime) -> Result<(), AuthError> {
        if now >= claims.exp() {
            return Err(AuthError::TokenExpired);
        }

        if claims.iss() != &*self.issuer {
            return Err(AuthError::InvalidIssuer);
        }

        if !claims.aud().contains(&self.audience) {
            return Err(AuthError::InvalidAudience);
        }

        Ok(())
    }
}
