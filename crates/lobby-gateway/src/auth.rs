use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use lobby_types::ChatError;
use lobby_types::api::Claims;
use lobby_types::models::Identity;

/// Verify a bearer credential and return the principal it names.
///
/// Signature and expiry are checked once, at connection or request time.
/// A credential revoked later does not affect an admitted connection.
pub fn verify_token(secret: &str, token: &str) -> Result<Identity, ChatError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ChatError::AuthenticationFailed)?;

    if token_data.claims.sub.is_empty() {
        return Err(ChatError::AuthenticationFailed);
    }

    Ok(token_data.claims.into())
}

/// Issue a credential for `identity`, valid for `ttl`.
///
/// Production tokens come from the external auth service; this mirrors its
/// claim layout for local tooling and tests.
pub fn create_token(secret: &str, identity: &Identity, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: identity.user_id.clone(),
        name: identity.user_name.clone(),
        badge: identity.badge.clone(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            user_id: "A".into(),
            user_name: "Alice".into(),
            badge: Some("host".into()),
        }
    }

    #[test]
    fn valid_token_yields_identity() {
        let token = create_token("secret", &alice(), chrono::Duration::hours(1)).unwrap();
        assert_eq!(verify_token("secret", &token).unwrap(), alice());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token("secret", &alice(), chrono::Duration::hours(1)).unwrap();
        assert_eq!(
            verify_token("other", &token).unwrap_err(),
            ChatError::AuthenticationFailed
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        // Well past the default 60s leeway.
        let token = create_token("secret", &alice(), chrono::Duration::hours(-1)).unwrap();
        assert!(verify_token("secret", &token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify_token("secret", "not-a-jwt").is_err());
    }
}
