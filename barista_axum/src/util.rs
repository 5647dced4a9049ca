//! `WWW-Authenticate` challenges for refused requests

use std::fmt::{self, Write as _};

use barista_auth::PermissionRef;
use http::HeaderValue;

/// Renders text as the body of an HTTP quoted-string
///
/// `"` and `\` are backslash-escaped. Printable ASCII passes through and
/// anything else is written as a Rust escape so the header stays visible
/// ASCII.
struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '"' | '\\' => {
                    f.write_char('\\')?;
                    f.write_char(c)?;
                }
                ' '..='~' => f.write_char(c)?,
                _ => write!(f, "{}", c.escape_default())?,
            }
        }
        Ok(())
    }
}

/// The challenge sent with a `401 Unauthorized` response
///
/// ```http
/// www-authenticate: Bearer error="invalid_token" error_description="{description}"
/// ```
///
/// The description is escaped so that it is always a valid header value, and
/// omitted if empty.
pub fn invalid_token(description: &str) -> HeaderValue {
    const BARE: &str = r#"Bearer error="invalid_token""#;

    if description.is_empty() {
        return HeaderValue::from_static(BARE);
    }

    HeaderValue::try_from(format!(
        r#"{BARE} error_description="{}""#,
        Quoted(description)
    ))
    .unwrap_or_else(|_| HeaderValue::from_static(BARE))
}

/// The challenge sent with a `403 Forbidden` response
///
/// ```http
/// www-authenticate: Bearer error="insufficient_scope" error_description="{description}" scope="{permission}"
/// ```
///
/// `error_description` is omitted if empty and `scope` if no permission is
/// known.
pub fn insufficient_scope(description: &str, permission: Option<&PermissionRef>) -> HeaderValue {
    const BARE: &str = r#"Bearer error="insufficient_scope""#;

    let mut value = String::from(BARE);

    if !description.is_empty() {
        value.push_str(&format!(
            r#" error_description="{}""#,
            Quoted(description)
        ));
    }

    if let Some(permission) = permission {
        value.push_str(&format!(
            r#" scope="{}""#,
            Quoted(permission.as_str())
        ));
    }

    HeaderValue::try_from(value).unwrap_or_else(|_| HeaderValue::from_static(BARE))
}
