use ring::hmac;
use std::fmt;

/// API key and secret used to authenticate private endpoints.
///
/// Requests are signed with HMAC-SHA256 over the encoded query string;
/// the signature is sent as lowercase hex.
#[derive(Clone)]
pub struct Credential {
    api_key: String,
    secret_key: Box<[u8]>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into().into_bytes().into_boxed_slice(),
        }
    }

    /// Build a credential only when both parts are non-empty.
    pub fn from_parts(api_key: &str, secret_key: &str) -> Option<Self> {
        if api_key.is_empty() || secret_key.is_empty() {
            None
        } else {
            Some(Self::new(api_key, secret_key))
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign a message and return the lowercase hex digest.
    pub fn sign(&self, message: &str) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.secret_key);
        let tag = hmac::sign(&key, message.as_bytes());
        hex::encode(tag.as_ref())
    }
}
