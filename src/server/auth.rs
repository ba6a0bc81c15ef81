//! HTTP basic authentication against a single credential.

use base64ct::{Base64, Encoding};
use http::header::HeaderValue;

use crate::config::Credential;

pub struct BasicAuth {
    /// Expected `user:password` bytes
    expected: Vec<u8>,
    user: String,
    challenge: HeaderValue,
}

impl BasicAuth {
    pub fn new(credential: &Credential, realm: &str) -> Self {
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic realm=\"webfs\""));
        Self {
            expected: format!("{}:{}", credential.user, credential.password).into_bytes(),
            user: credential.user.clone(),
            challenge,
        }
    }

    /// Check an `Authorization` header. Returns the user name on success.
    pub fn check(&self, header: Option<&HeaderValue>) -> Option<&str> {
        let value = header?.to_str().ok()?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = Base64::decode_vec(token.trim()).ok()?;
        constant_time_eq(&decoded, &self.expected).then_some(self.user.as_str())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// `WWW-Authenticate` value for 401 responses.
    pub fn challenge(&self) -> &HeaderValue {
        &self.challenge
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
