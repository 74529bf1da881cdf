use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Reads the `exp` claim of a JWT and returns it in epoch milliseconds.
///
/// The client never holds the signing key, so the signature is not checked;
/// the value is only used to schedule a refresh, never to trust the token.
pub fn expiry_from_jwt(token: &str) -> Option<i64> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    match decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => Some(data.claims.exp.saturating_mul(1000)),
        Err(e) => {
            debug!("Access token is not a readable JWT: {}", e);
            None
        }
    }
}
