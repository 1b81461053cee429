/// Bearer-token authentication: compares the `Authorization` header against
/// the session token minted at login, in constant time, so a timing
/// side-channel can't shorten a guess-the-token attack.
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};

use crate::api::AppState;
use crate::error::EngineError;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Extractor that yields successfully only for a request bearing a valid
/// session token. Handlers take `_auth: AuthBearer` as an argument to gate
/// themselves; the extractor runs before the handler body.
pub struct AuthBearer;

impl FromRequestParts<Arc<AppState>> for AuthBearer {
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let expected = state.session_token.read().await.clone();
        let Some(expected) = expected else {
            return Err(EngineError::NotAuthenticated);
        };

        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let token = match header {
            Some(v) if v.starts_with("Bearer ") => &v[7..],
            _ => return Err(EngineError::NotAuthenticated),
        };

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            return Err(EngineError::NotAuthenticated);
        }

        Ok(AuthBearer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_mismatched_length() {
        assert!(!constant_time_eq(b"short", b"much longer token"));
    }

    #[test]
    fn constant_time_eq_accepts_identical() {
        assert!(constant_time_eq(b"same-token", b"same-token"));
    }

    #[test]
    fn constant_time_eq_rejects_single_byte_difference() {
        assert!(!constant_time_eq(b"token-a", b"token-b"));
    }
}
