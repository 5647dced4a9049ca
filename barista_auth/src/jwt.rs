//! Bearer credentials and their compact JWS structure
//!
//! A token arrives as `header.payload.signature`, each segment base64url
//! encoded without padding. The header names the algorithm and the key used
//! to sign; nothing in the header or payload can be trusted until the
//! signature has been checked against a key we already trust.

use std::fmt;

use aliri_braid::braid;
use base64::{
    alphabet,
    engine::{
        general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD},
        DecodePaddingMode,
    },
    Engine as _,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AuthError,
    jwks::{KeyId, KeyIdRef},
};

const BEARER: &str = "bearer";

/// Unpadded base64url that tolerates nonzero bits in the final character
const SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

/// A compact, signed JSON Web Token
///
/// This type provides custom implementations of [`Display`][JwtRef#impl-Display] and
/// [`Debug`][JwtRef#impl-Debug] so that a token does not end up in logs by accident.
#[braid(
    serde,
    debug = "owned",
    display = "owned",
    ord = "omit",
    ref_doc = "\
    A borrowed reference to a JSON Web Token ([`Jwt`])\n\
    \n\
    Formatting hides the value unless the alternate flag is given; even then \
    only the header and payload are shown in `Debug` output.
    "
)]
#[must_use]
pub struct Jwt;

/// Pulls the bearer token out of an `Authorization` header value
///
/// The value must be exactly two parts separated by one space: the scheme
/// name `bearer` (in any ASCII case) followed by the token. The token is
/// returned verbatim.
///
/// # Errors
///
/// * [`AuthError::MissingHeader`] if there is no header
/// * [`AuthError::MalformedHeader`] if the value does not split into two parts
/// * [`AuthError::InvalidHeaderScheme`] if the scheme is not `bearer`
/// * [`AuthError::EmptyToken`] if the token part is empty
pub fn extract_bearer(header: Option<&str>) -> Result<&JwtRef, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?;

    let mut parts = header.split(' ');
    let (scheme, token) = match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) => (scheme, token),
        _ => return Err(AuthError::MalformedHeader),
    };

    if !scheme.eq_ignore_ascii_case(BEARER) {
        return Err(AuthError::InvalidHeaderScheme);
    }

    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }

    Ok(JwtRef::from_str(token))
}

/// The protected header of a token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct TokenHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<KeyId>,
}

impl TokenHeader {
    /// Constructs a header naming an algorithm and, optionally, a key
    pub fn new(alg: impl Into<String>, kid: Option<KeyId>) -> Self {
        Self {
            alg: alg.into(),
            kid,
        }
    }

    /// The algorithm the token claims to be signed with
    #[must_use]
    pub fn alg(&self) -> &str {
        &self.alg
    }

    /// The identifier of the key the token claims to be signed with
    #[must_use]
    pub fn kid(&self) -> Option<&KeyIdRef> {
        self.kid.as_deref()
    }
}

/// A token split into its decoded parts, not yet verified
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Decomposed<'a> {
    header: TokenHeader,
    message: &'a str,
    payload: Vec<u8>,
    signature: Vec<u8>,
    canonical_signature: bool,
}

impl<'a> Decomposed<'a> {
    /// The untrusted header
    pub fn untrusted_header(&self) -> &TokenHeader {
        &self.header
    }

    /// The signed portion of the token, `header.payload`, as sent
    #[must_use]
    pub fn message(&self) -> &'a str {
        self.message
    }

    /// The untrusted, decoded payload bytes
    #[must_use]
    pub fn untrusted_payload(&self) -> &[u8] {
        &self.payload
    }

    /// The decoded signature bytes
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Whether the signature segment is the exact encoding of its bytes
    ///
    /// A segment with stray bits in its final character decodes to the same
    /// bytes as the canonical one, but it is not the signature that was issued.
    #[must_use]
    pub fn has_canonical_signature(&self) -> bool {
        self.canonical_signature
    }
}

impl JwtRef {
    /// Splits the token into header, payload and signature and decodes each
    ///
    /// Only the header is parsed as JSON here. The payload is decoded from
    /// base64 but its claims are left for after signature verification.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the token is not exactly three
    /// segments, if a segment is not base64url, or if the header is not a JSON
    /// object with an `alg` member.
    pub fn decompose(&self) -> Result<Decomposed<'_>, AuthError> {
        let raw = self.as_str();

        let mut segments = raw.split('.');
        let (h_str, p_str, s_str) = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(AuthError::MalformedToken(None)),
        };

        let message = &raw[..h_str.len() + 1 + p_str.len()];

        let h_raw = SEGMENT.decode(h_str).map_err(AuthError::malformed_token)?;
        let payload = SEGMENT.decode(p_str).map_err(AuthError::malformed_token)?;
        let signature = SEGMENT.decode(s_str).map_err(AuthError::malformed_token)?;
        let canonical_signature = URL_SAFE_NO_PAD.encode(&signature) == s_str;

        let header: TokenHeader =
            serde_json::from_slice(&h_raw).map_err(AuthError::malformed_token)?;

        Ok(Decomposed {
            header,
            message,
            payload,
            signature,
            canonical_signature,
        })
    }
}

/// By default a placeholder is printed. With the alternate flag (`{:#?}`)
/// the header and payload are shown and the signature is elided.
impl fmt::Debug for JwtRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            match self.0.rfind('.') {
                Some(last_period) => write!(f, "\"{}…\"", &self.0[..=last_period]),
                None => f.write_str("\"…\""),
            }
        } else {
            f.write_str(concat!("***", "JWT", "***"))
        }
    }
}

/// By default a placeholder is printed. With the alternate flag (`{:#}`)
/// the full token is written.
impl fmt::Display for JwtRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            f.write_str(&self.0)
        } else {
            f.write_str(concat!("***", "JWT", "***"))
        }
    }
}
