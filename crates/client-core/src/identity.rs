//! Local endpoint identity on the rendezvous substrate
//!
//! The substrate accepts identifiers made of lower-case ASCII letters, digits
//! and dashes that start and end with an alphanumeric character. An
//! authenticated e-mail address is folded into that alphabet so the same user
//! always registers under the same id; anonymous endpoints get a short random
//! base36 token instead.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

const RANDOM_ID_LEN: usize = 8;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Identifier this endpoint registers under and is dialed by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalIdentity(String);

impl LocalIdentity {
    /// Derive the identity for an optional authenticated e-mail address
    ///
    /// # Examples
    ///
    /// ```rust
    /// use emdr_client_core::identity::LocalIdentity;
    ///
    /// let id = LocalIdentity::derive(Some("Dr.Smith@Clinic.example"));
    /// assert_eq!(id.as_str(), "dr-smith-clinic-example");
    ///
    /// let anonymous = LocalIdentity::derive(None);
    /// assert_eq!(anonymous.as_str().len(), 8);
    /// ```
    pub fn derive(email: Option<&str>) -> Self {
        match email.map(sanitize).filter(|s| !s.is_empty()) {
            Some(id) => Self(id),
            None => Self::random(),
        }
    }

    /// Generate a fresh random identity
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..RANDOM_ID_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        Self(id)
    }

    /// Validate an identity typed in by the user for dialing
    pub fn parse(raw: &str) -> ClientResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ClientError::invalid_state("remote identity is empty"));
        }
        if !is_valid(trimmed) {
            return Err(ClientError::invalid_state(format!(
                "'{}' is not a valid remote identity",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LocalIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn sanitize(email: &str) -> String {
    let mut out = String::with_capacity(email.len());
    for c in email.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn is_valid(id: &str) -> bool {
    let bytes = id.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_alphanumeric();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_per_email() {
        let a = LocalIdentity::derive(Some("client@example.com"));
        let b = LocalIdentity::derive(Some("  CLIENT@example.com "));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "client-example-com");
    }

    #[test]
    fn runs_of_symbols_collapse_to_one_dash() {
        let id = LocalIdentity::derive(Some("a..b++c@@d"));
        assert_eq!(id.as_str(), "a-b-c-d");
    }

    #[test]
    fn unusable_email_falls_back_to_random() {
        let id = LocalIdentity::derive(Some("@@@"));
        assert_eq!(id.as_str().len(), RANDOM_ID_LEN);
        assert!(id.as_str().bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn random_identities_differ() {
        assert_ne!(LocalIdentity::random(), LocalIdentity::random());
    }

    #[test]
    fn parse_rejects_bad_remote_ids() {
        assert!(LocalIdentity::parse("").is_err());
        assert!(LocalIdentity::parse("-bob").is_err());
        assert!(LocalIdentity::parse("bob smith").is_err());
        assert_eq!(LocalIdentity::parse(" bob ").unwrap().as_str(), "bob");
    }
}
