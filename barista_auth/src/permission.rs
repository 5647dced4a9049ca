//! Permissions granted by a token and required by an operation

use std::collections::{btree_set, BTreeSet};

use aliri_braid::braid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{claims::Claims, error::AuthError};

/// An invalid permission
#[derive(Debug, Error)]
pub enum InvalidPermission {
    /// The permission was the empty string
    #[error("permission cannot be empty")]
    EmptyString,
    /// The permission contained whitespace or a control character
    #[error("invalid permission byte at position {position}: 0x{value:02x}")]
    InvalidByte {
        /// The index in the permission where the invalid byte was found
        position: usize,
        /// The invalid byte value
        value: u8,
    },
}

impl From<std::convert::Infallible> for InvalidPermission {
    #[inline(always)]
    fn from(x: std::convert::Infallible) -> Self {
        match x {}
    }
}

/// A single capability, such as `post:drinks`
///
/// A permission is non-empty and contains no ASCII whitespace or control
/// characters. Comparison is exact and case-sensitive.
#[braid(
    serde,
    validator,
    ref_doc = "A borrowed reference to a [`Permission`]"
)]
pub struct Permission;

impl aliri_braid::Validator for Permission {
    type Error = InvalidPermission;

    fn validate(s: &str) -> Result<(), Self::Error> {
        if s.is_empty() {
            Err(InvalidPermission::EmptyString)
        } else if let Some((position, &value)) = s
            .as_bytes()
            .iter()
            .enumerate()
            .find(|(_, &b)| b <= 0x20 || b == 0x7F)
        {
            Err(InvalidPermission::InvalidByte { position, value })
        } else {
            Ok(())
        }
    }
}

/// The set of permissions granted by a token's `permissions` claim
///
/// On the wire this is a JSON array of strings. Entries that could never
/// satisfy a requirement (empty strings, strings with whitespace) are
/// dropped while parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
#[must_use]
pub struct Permissions(BTreeSet<Permission>);

impl Permissions {
    /// Produces an empty set of permissions
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a permission, returning the extended set
    pub fn and(mut self, permission: Permission) -> Self {
        self.0.insert(permission);
        self
    }

    /// Whether the set grants `permission`
    #[must_use]
    pub fn contains(&self, permission: &PermissionRef) -> bool {
        self.0.contains(permission)
    }

    /// Iterates over the granted permissions in order
    pub fn iter(&self) -> impl Iterator<Item = &PermissionRef> {
        self.0.iter().map(AsRef::as_ref)
    }

    /// The number of granted permissions
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no permissions are granted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for Permissions {
    fn from(raw: Vec<String>) -> Self {
        raw.into_iter()
            .filter_map(|p| Permission::new(p).ok())
            .collect()
    }
}

impl From<Permissions> for Vec<String> {
    fn from(permissions: Permissions) -> Self {
        permissions.0.into_iter().map(Permission::take).collect()
    }
}

impl FromIterator<Permission> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Permissions {
    type Item = Permission;
    type IntoIter = btree_set::IntoIter<Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Checks that validated claims grant `required`
///
/// # Errors
///
/// * [`AuthError::MissingPermissionsClaim`] if the claims carry no
///   `permissions` field at all
/// * [`AuthError::PermissionDenied`] if the field does not include `required`
pub fn require_permission(claims: &Claims, required: &PermissionRef) -> Result<(), AuthError> {
    let granted = claims
        .permissions()
        .ok_or(AuthError::MissingPermissionsClaim)?;

    if granted.contains(required) {
        Ok(())
    } else {
        Err(AuthError::PermissionDenied {
            required: required.as_str().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use barista_clock::UnixTime;
    use color_eyre::Result;

    use super::*;
    use crate::claims::{Audience, Issuer, Subject};

    fn claims() -> Claims {
        Claims::new(
            Subject::from_static("auth0|barista"),
            Issuer::from_static("https://barista.test/"),
            Audience::from_static("drinks"),
            UnixTime(2_000_000_000),
        )
    }

    #[test]
    fn permission_must_be_a_single_token() {
        assert!(Permission::new(String::new()).is_err());
        assert!(Permission::new("post drinks".to_owned()).is_err());
        assert!(Permission::new("post:drinks\n".to_owned()).is_err());
        assert!(Permission::new("post:drinks".to_owned()).is_ok());
    }

    #[test]
    fn missing_claim_is_distinct_from_missing_grant() {
        let required = PermissionRef::from_static("post:drinks");

        assert!(matches!(
            require_permission(&claims(), required),
            Err(AuthError::MissingPermissionsClaim)
        ));

        let empty = claims().with_permissions(Permissions::empty());
        assert!(matches!(
            require_permission(&empty, required),
            Err(AuthError::PermissionDenied { required }) if required == "post:drinks"
        ));
    }

    #[test]
    fn adding_the_permission_grants_access() {
        let required = PermissionRef::from_static("post:drinks");
        let granted = claims().with_permissions(
            Permissions::empty()
                .and(Permission::from_static("get:drinks-detail"))
                .and(Permission::from_static("post:drinks")),
        );

        assert!(require_permission(&granted, required).is_ok());
    }

    #[test]
    fn comparison_is_case_sensitive() {
        let granted =
            claims().with_permissions(Permissions::empty().and(Permission::from_static("POST:drinks")));

        assert!(require_permission(&granted, PermissionRef::from_static("post:drinks")).is_err());
    }

    #[test]
    fn unusable_entries_are_dropped_when_parsing() -> Result<()> {
        let permissions: Permissions =
            serde_json::from_str(r#"["get:drinks-detail", "", "post drinks"]"#)?;

        assert_eq!(permissions.len(), 1);
        assert!(permissions.contains(PermissionRef::from_static("get:drinks-detail")));
        Ok(())
    }

    #[test]
    fn serializes_as_a_sorted_list() -> Result<()> {
        let permissions = Permissions::empty()
            .and(Permission::from_static("post:drinks"))
            .and(Permission::from_static("delete:drinks"));

        assert_eq!(
            serde_json::to_value(permissions)?,
            serde_json::json!(["delete:drinks", "post:drinks"])
        );
        Ok(())
    }

    #[test]
    fn invalid_permission_reports_the_offending_byte() {
        assert!(matches!(
            Permission::new("get:drinks\tdetail".to_owned()),
            Err(InvalidPermission::InvalidByte { position: 10, value: 0x09 })
        ));
    }

    #[test]
    fn a_space_separated_string_is_not_a_permissions_list() {
        assert!(serde_json::from_str::<Permissions>(r#""get:drinks post:drinks""#).is_err());
    }
}
