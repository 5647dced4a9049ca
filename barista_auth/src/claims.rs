//! The validated payload of a token

use aliri_braid::braid;
use barista_clock::UnixTime;
use serde::{Deserialize, Serialize};

use crate::permission::Permissions;

/// An audience
#[braid(serde, ref_doc = "A borrowed reference to an [`Audience`]")]
pub struct Audience;

/// An issuer of tokens
#[braid(serde, ref_doc = "A borrowed reference to an [`Issuer`]")]
pub struct Issuer;

/// The subject of a token, usually a user identifier
#[braid(serde, ref_doc = "A borrowed reference to a [`Subject`]")]
pub struct Subject;

/// One or more audiences
///
/// The `aud` claim may be a single string or an array of strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany<Audience>", into = "OneOrMany<Audience>")]
#[must_use]
pub struct Audiences(Vec<Audience>);

impl Audiences {
    /// An audience set with a single audience
    #[inline]
    pub fn single(aud: impl Into<Audience>) -> Self {
        Self(vec![aud.into()])
    }

    /// Whether `aud` is one of the audiences
    #[must_use]
    pub fn contains(&self, aud: &AudienceRef) -> bool {
        self.0.iter().any(|a| a.as_str() == aud.as_str())
    }

    /// Iterates through references to the audiences in the set
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &AudienceRef> {
        self.0.iter().map(AsRef::as_ref)
    }
}

impl From<OneOrMany<Audience>> for Audiences {
    fn from(vals: OneOrMany<Audience>) -> Self {
        match vals {
            OneOrMany::One(x) => Self(vec![x]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

impl From<Audiences> for OneOrMany<Audience> {
    fn from(mut vec: Audiences) -> Self {
        if vec.0.len() == 1 {
            Self::One(vec.0.remove(0))
        } else {
            Self::Many(vec.0)
        }
    }
}

impl From<Vec<Audience>> for Audiences {
    fn from(vec: Vec<Audience>) -> Self {
        Self(vec)
    }
}

impl From<Audience> for Audiences {
    fn from(aud: Audience) -> Self {
        Self::single(aud)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Claims carried by a verified token
///
/// `sub`, `iss`, `aud` and `exp` must be present with the right types or the
/// payload is rejected as malformed. `permissions` is optional on the wire;
/// its absence is reported separately from a missing grant when a permission
/// is checked. Other fields are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Claims {
    sub: Subject,
    iss: Issuer,
    aud: Audiences,
    exp: UnixTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<UnixTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    permissions: Option<Permissions>,
}

impl Claims {
    /// Constructs a claims set with the required fields
    pub fn new(
        sub: impl Into<Subject>,
        iss: impl Into<Issuer>,
        aud: impl Into<Audiences>,
        exp: UnixTime,
    ) -> Self {
        Self {
            sub: sub.into(),
            iss: iss.into(),
            aud: aud.into(),
            exp,
            iat: None,
            permissions: None,
        }
    }

    /// Sets the time the token was issued
    pub fn with_issued_at(mut self, iat: UnixTime) -> Self {
        self.iat = Some(iat);
        self
    }

    /// Sets the granted permissions
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// The subject
    #[must_use]
    pub fn sub(&self) -> &SubjectRef {
        &self.sub
    }

    /// The issuer
    #[must_use]
    pub fn iss(&self) -> &IssuerRef {
        &self.iss
    }

    /// The audiences
    pub fn aud(&self) -> &Audiences {
        &self.aud
    }

    /// The expiry
    #[must_use]
    pub fn exp(&self) -> UnixTime {
        self.exp
    }

    /// The time the token was issued, if stated
    #[must_use]
    pub fn iat(&self) -> Option<UnixTime> {
        self.iat
    }

    /// The granted permissions, or `None` if the claim was absent
    #[must_use]
    pub fn permissions(&self) -> Option<&Permissions> {
        self.permissions.as_ref()
    }
}
