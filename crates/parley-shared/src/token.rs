//! Bearer access tokens.
//!
//! A token is the base64url encoding of a JSON document carrying the subject,
//! the expiry and an Ed25519 signature by the issuing auth service over
//! `subject || expiry (rfc3339)`. Verifiers only ever hold the public key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub sub: UserId,
    pub exp: DateTime<Utc>,
    #[serde(with = "hex_bytes")]
    pub sig: Vec<u8>,
}

impl AccessToken {
    /// Sign a token for `user`. Used by the auth service and by tests.
    pub fn issue(user: UserId, valid_until: DateTime<Utc>, issuer: &SigningKey) -> Self {
        let signature = issuer.sign(&signing_payload(&user, &valid_until));
        Self {
            sub: user,
            exp: valid_until,
            sig: signature.to_bytes().to_vec(),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(credential: &str) -> Result<Self, AuthError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(credential.trim())
            .map_err(|e| AuthError::InvalidCredential(format!("bad encoding: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::InvalidCredential(format!("bad token body: {e}")))
    }

    /// Check the signature first, then the expiry, so a forged token never
    /// reports `Expired`.
    pub fn verify(&self, issuer_pubkey: &[u8; 32], now: DateTime<Utc>) -> Result<UserId, AuthError> {
        let verifying_key = VerifyingKey::from_bytes(issuer_pubkey)
            .map_err(|_| AuthError::InvalidCredential("issuer key unusable".into()))?;
        let signature = Signature::from_slice(&self.sig)
            .map_err(|_| AuthError::InvalidCredential("malformed signature".into()))?;

        verifying_key
            .verify(&signing_payload(&self.sub, &self.exp), &signature)
            .map_err(|_| AuthError::InvalidCredential("signature mismatch".into()))?;

        if now > self.exp {
            return Err(AuthError::Expired);
        }

        Ok(self.sub)
    }
}

fn signing_payload(user: &UserId, valid_until: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + 32);
    payload.extend_from_slice(user.0.as_bytes());
    payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());
    payload
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::OsRng;

    #[test]
    fn test_token_valid() {
        let issuer = SigningKey::generate(&mut OsRng);
        let pubkey = issuer.verifying_key().to_bytes();
        let user = UserId::new();

        let credential = AccessToken::issue(user, Utc::now() + Duration::hours(1), &issuer).encode();
        let token = AccessToken::decode(&credential).unwrap();

        assert_eq!(token.verify(&pubkey, Utc::now()), Ok(user));
    }

    #[test]
    fn test_token_expired() {
        let issuer = SigningKey::generate(&mut OsRng);
        let pubkey = issuer.verifying_key().to_bytes();

        let token = AccessToken::issue(UserId::new(), Utc::now() - Duration::minutes(1), &issuer);

        assert_eq!(token.verify(&pubkey, Utc::now()), Err(AuthError::Expired));
    }

    #[test]
    fn test_token_wrong_issuer() {
        let issuer = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);

        let token = AccessToken::issue(UserId::new(), Utc::now() + Duration::hours(1), &issuer);
        let result = token.verify(&other.verifying_key().to_bytes(), Utc::now());

        assert!(matches!(result, Err(AuthError::InvalidCredential(_))));
    }

    #[test]
    fn test_tampered_subject_rejected() {
        let issuer = SigningKey::generate(&mut OsRng);
        let pubkey = issuer.verifying_key().to_bytes();

        let mut token = AccessToken::issue(UserId::new(), Utc::now() + Duration::hours(1), &issuer);
        token.sub = UserId::new();

        assert!(matches!(
            token.verify(&pubkey, Utc::now()),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            AccessToken::decode("%%%"),
            Err(AuthError::InvalidCredential(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            AccessToken::decode(&not_json),
            Err(AuthError::InvalidCredential(_))
        ));
    }
}
