use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Separator between the identity fields before signing.
pub const IDENTITY_DELIMITER: &str = ",";

/// The ordered tuple both handshakes authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity<'a> {
    pub client_id: &'a str,
    pub meeting_uuid: &'a str,
    pub stream_id: &'a str,
}

impl Identity<'_> {
    fn message(&self) -> String {
        [self.client_id, self.meeting_uuid, self.stream_id].join(IDENTITY_DELIMITER)
    }
}

/// HMAC-SHA256 of the identity tuple, hex-encoded.
pub fn sign(identity: &Identity<'_>, secret: &str) -> Result<String, SignatureError> {
    hmac_hex(secret, identity.message().as_bytes())
}

/// Answer for the webhook endpoint validation challenge.
pub fn sign_webhook_token(plain_token: &str, secret_token: &str) -> Result<String, SignatureError> {
    hmac_hex(secret_token, plain_token.as_bytes())
}

fn hmac_hex(secret: &str, message: &[u8]) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signs stream identities with the configured client credentials.
#[derive(Clone)]
pub struct SignatureProvider {
    client_id: String,
    secret: Option<String>,
}

impl SignatureProvider {
    pub fn new(client_id: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            secret,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn has_secret(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn sign_stream(&self, meeting_uuid: &str, stream_id: &str) -> Result<String, SignatureError> {
        let secret = self
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(SignatureError::MissingSecret)?;
        sign(
            &Identity {
                client_id: &self.client_id,
                meeting_uuid,
                stream_id,
            },
            secret,
        )
    }
}

impl std::fmt::Debug for SignatureProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureProvider")
            .field("client_id", &self.client_id)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
