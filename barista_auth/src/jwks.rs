//! Public signing keys published by the token issuer
//!
//! Providers publish more than we can use: encryption keys, symmetric keys,
//! keys for algorithms we never mandate. A [`KeySet`] keeps only the RSA
//! signing keys and skips the rest with a warning, so one odd entry does not
//! take down authentication for everyone.

use std::{fmt, str::FromStr};

use aliri_braid::braid;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{error::AuthError, jwa::Algorithm};

const MIN_MODULUS_BITS: usize = 2048;
const MAX_MODULUS_BITS: usize = 8192;

/// An identifier for a signing key
#[braid(serde, ref_doc = "A borrowed reference to a signing key identifier ([`KeyId`])")]
pub struct KeyId;

/// An RSA public key used to verify token signatures
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SigningKeyDto", into = "SigningKeyDto")]
#[must_use]
pub struct SigningKey {
    kid: KeyId,
    alg: Option<Algorithm>,
    declares_use: bool,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl SigningKey {
    /// Constructs a signing key from its big-endian RSA components
    ///
    /// # Errors
    ///
    /// Fails if the modulus is not between 2048 and 8192 bits or if the
    /// exponent is empty.
    pub fn from_components(
        kid: KeyId,
        alg: Option<Algorithm>,
        modulus: Vec<u8>,
        exponent: Vec<u8>,
    ) -> Result<Self, KeyRejected> {
        let modulus = strip_leading_zeros(modulus);
        let exponent = strip_leading_zeros(exponent);

        let bits = bit_len(&modulus);
        if !(MIN_MODULUS_BITS..=MAX_MODULUS_BITS).contains(&bits) {
            return Err(KeyRejected("modulus must be between 2048 and 8192 bits"));
        }

        if exponent.is_empty() {
            return Err(KeyRejected("exponent must not be zero"));
        }

        Ok(Self {
            kid,
            alg,
            declares_use: false,
            modulus,
            exponent,
        })
    }

    /// The key identifier
    #[must_use]
    pub fn kid(&self) -> &KeyIdRef {
        &self.kid
    }

    /// The algorithm this key is restricted to, if the provider named one
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.alg
    }

    /// The size of the modulus in bits
    #[must_use]
    pub fn modulus_bits(&self) -> usize {
        bit_len(&self.modulus)
    }

    /// Checks that this key may verify tokens signed with `alg`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if the key is restricted to a
    /// different algorithm.
    pub fn check_usable(&self, alg: Algorithm) -> Result<(), AuthError> {
        match self.alg {
            Some(key_alg) if key_alg != alg => Err(AuthError::InvalidKey {
                reason: "key is restricted to a different algorithm",
            }),
            _ => Ok(()),
        }
    }

    /// Verifies `signature` over `message`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidSignature`] if the signature does not
    /// match.
    pub fn verify(&self, alg: Algorithm, message: &[u8], signature: &[u8]) -> Result<(), AuthError> {
        let pk = ring::signature::RsaPublicKeyComponents {
            n: self.modulus.as_slice(),
            e: self.exponent.as_slice(),
        };

        pk.verify(alg.verification_params(), message, signature)
            .map_err(|_| AuthError::InvalidSignature)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("bits", &self.modulus_bits())
            .finish()
    }
}

/// A key entry was not an RSA signing key we can use
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("key rejected: {0}")]
pub struct KeyRejected(&'static str);

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SigningKeyDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<KeyId>,
    kty: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<String>,
    n: String,
    e: String,
}

impl TryFrom<SigningKeyDto> for SigningKey {
    type Error = KeyRejected;

    fn try_from(dto: SigningKeyDto) -> Result<Self, Self::Error> {
        let kid = dto.kid.ok_or(KeyRejected("key has no identifier"))?;

        if dto.kty != "RSA" {
            return Err(KeyRejected("key type is not RSA"));
        }

        let declares_use = match dto.usage.as_deref() {
            Some("sig") => true,
            Some(_) => return Err(KeyRejected("key is not for signing")),
            None => false,
        };

        let alg = dto
            .alg
            .as_deref()
            .map(Algorithm::from_str)
            .transpose()
            .map_err(|_| KeyRejected("key algorithm is not accepted"))?;

        let modulus = URL_SAFE_NO_PAD
            .decode(&dto.n)
            .map_err(|_| KeyRejected("modulus is not base64url"))?;
        let exponent = URL_SAFE_NO_PAD
            .decode(&dto.e)
            .map_err(|_| KeyRejected("exponent is not base64url"))?;

        let mut key = Self::from_components(kid, alg, modulus, exponent)?;
        key.declares_use = declares_use;
        Ok(key)
    }
}

impl From<SigningKey> for SigningKeyDto {
    fn from(key: SigningKey) -> Self {
        Self {
            kid: Some(key.kid),
            kty: "RSA".into(),
            usage: key.declares_use.then(|| "sig".into()),
            alg: key.alg.map(|a| a.as_str().into()),
            n: URL_SAFE_NO_PAD.encode(&key.modulus),
            e: URL_SAFE_NO_PAD.encode(&key.exponent),
        }
    }
}

fn strip_leading_zeros(mut bytes: Vec<u8>) -> Vec<u8> {
    let zeros = bytes.iter().take_while(|&&b| b == 0).count();
    bytes.drain(..zeros);
    bytes
}

fn bit_len(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(&first) => bytes.len() * 8 - first.leading_zeros() as usize,
        None => 0,
    }
}

/// An ordered set of signing keys
///
/// Lookup returns the first key with a matching identifier, so a provider
/// that publishes the same identifier twice gets the earlier entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct KeySet {
    #[serde(deserialize_with = "deserialize_keys")]
    keys: Vec<SigningKey>,
}

impl KeySet {
    /// Constructs an empty key set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key to the end of the set
    pub fn add_key(&mut self, key: SigningKey) {
        self.keys.push(key);
    }

    /// A view of the keys in this set
    #[must_use]
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Gets the first key with the given identifier
    #[must_use]
    pub fn get(&self, kid: &KeyIdRef) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid() == kid)
    }

    /// The number of keys in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<SigningKey> for KeySet {
    fn from_iter<I: IntoIterator<Item = SigningKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<SigningKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct MaybeKeysVisitor;

    impl<'de> serde::de::Visitor<'de> for MaybeKeysVisitor {
        type Value = Vec<SigningKey>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of JWK objects")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            let mut index = 0_usize;

            while let Some(value) = seq.next_element()? {
                match value {
                    MaybeKey::Key(key) => values.push(key),
                    MaybeKey::Unusable(key) => {
                        tracing::warn!(
                            jwks.idx = index,
                            jwk.kid = ?key.kid,
                            jwk.kty = ?key.kty,
                            "jwk.use" = ?key.usage,
                            jwk.alg = ?key.alg,
                            "ignoring unusable JWK"
                        );
                    }
                    MaybeKey::Other(_) => {
                        tracing::warn!(jwks.idx = index, "ignoring JWK that is not an object");
                    }
                }
                index += 1;
            }

            Ok(values)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeKey {
        Key(SigningKey),
        Unusable(KeyLike),
        Other(serde::de::IgnoredAny),
    }

    #[derive(Deserialize)]
    struct KeyLike {
        #[serde(default)]
        kid: Option<serde_json::Value>,
        #[serde(default)]
        kty: Option<serde_json::Value>,
        #[serde(rename = "use", default)]
        usage: Option<serde_json::Value>,
        #[serde(default)]
        alg: Option<serde_json::Value>,
    }

    deserializer.deserialize_seq(MaybeKeysVisitor)
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use tracing_test::traced_test;

    use super::*;
    use crate::testing;

    const JWKS: &str = include_str!("../data/rsa/jwks.json");

    #[test]
    #[traced_test]
    fn keeps_only_usable_signing_keys() -> Result<()> {
        let set: KeySet = serde_json::from_str(JWKS)?;

        assert_eq!(set.len(), 1);
        assert_eq!(set.keys()[0].kid().as_str(), testing::SIGNING_KID);
        assert_eq!(set.keys()[0].modulus_bits(), 2048);
        assert!(logs_contain("ignoring unusable JWK"));
        Ok(())
    }

    #[test]
    #[traced_test]
    fn entries_that_are_not_objects_are_skipped() -> Result<()> {
        let set: KeySet = serde_json::from_str(r#"{"keys": [1, "two", null, {}]}"#)?;
        assert!(set.is_empty());
        Ok(())
    }

    #[test]
    fn document_without_key_list_is_an_error() {
        assert!(serde_json::from_str::<KeySet>(r#"{"items": []}"#).is_err());
        assert!(serde_json::from_str::<KeySet>(r#"{"keys": {}}"#).is_err());
        assert!(serde_json::from_str::<KeySet>("not json").is_err());
    }

    #[test]
    fn lookup_returns_the_first_match() -> Result<()> {
        let key = testing::signing_jwk();
        let mut second: SigningKeyDto = key.clone().into();
        second.alg = Some("PS256".into());
        let second = SigningKey::try_from(second)?;

        let set: KeySet = [key, second].into_iter().collect();

        let found = set.get(KeyIdRef::from_str(testing::SIGNING_KID));
        assert_eq!(found.and_then(SigningKey::algorithm), Some(Algorithm::RS256));
        assert!(set.get(KeyIdRef::from_str("missing")).is_none());
        Ok(())
    }

    #[test]
    fn serialized_key_parses_back_into_the_same_key() -> Result<()> {
        let key = testing::signing_jwk();
        let value = serde_json::to_value(&key)?;

        assert_eq!(value["kty"], "RSA");
        assert_eq!(value["use"], "sig");
        assert_eq!(value["alg"], "RS256");
        assert_eq!(serde_json::from_value::<SigningKey>(value)?, key);
        Ok(())
    }

    #[test]
    fn short_modulus_is_rejected() {
        let err = SigningKey::from_components(
            KeyId::from_static("short"),
            None,
            [0_u8, 0].into_iter().chain([0xff; 128]).collect(),
            vec![1, 0, 1],
        )
        .unwrap_err();

        assert_eq!(err, KeyRejected("modulus must be between 2048 and 8192 bits"));
    }

    #[test]
    fn key_restricted_to_another_algorithm_is_unusable() {
        let key = testing::signing_jwk();

        assert!(key.check_usable(Algorithm::RS256).is_ok());
        assert!(matches!(
            key.check_usable(Algorithm::PS256),
            Err(AuthError::InvalidKey { .. })
        ));
    }

    #[test]
    fn verifies_a_signature_from_the_matching_private_key() -> Result<()> {
        let key = testing::signing_jwk();
        let signature = testing::TestSigner::signing().sign(b"header.payload");

        key.verify(Algorithm::RS256, b"header.payload", &signature)?;
        assert!(matches!(
            key.verify(Algorithm::RS256, b"header.payload!", &signature),
            Err(AuthError::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn rogue_signature_does_not_verify() -> Result<()> {
        let key = testing::signing_jwk();
        let signature = testing::TestSigner::rogue().sign(b"header.payload");

        assert!(matches!(
            key.verify(Algorithm::RS256, b"header.payload", &signature),
            Err(AuthError::InvalidSignature)
        ));
        Ok(())
    }
}
