//! Bearer token authentication.
//!
//! Tokens come from `Authorization: Bearer <token>` or, for clients that cannot
//! set headers on a WebSocket handshake, from a `?token=` query parameter.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Request, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use domain::models::{Identity, Role};
use shared::jwt::{parse_uuid_claim, Claims, JwtConfig, JwtError};

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extracts the raw token, preferring the Authorization header.
pub fn token_from_request(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

/// Builds an identity from verified claims. Unknown roles and malformed ids
/// invalidate the token.
pub fn identity_from_claims(claims: Claims) -> Result<Identity, JwtError> {
    let id = Uuid::parse_str(&claims.sub).map_err(|_| JwtError::InvalidToken)?;
    let role = Role::parse(&claims.role).ok_or(JwtError::InvalidToken)?;

    let mut identity = Identity::new(id, role);
    identity.tenant_id = parse_uuid_claim(claims.tenant_id.as_deref())?;
    identity.tracked_person_id = parse_uuid_claim(claims.tracked_person_id.as_deref())?;
    identity.display_name = claims.name;
    Ok(identity)
}

pub fn authenticate(jwt: &JwtConfig, token: &str) -> Result<Identity, ApiError> {
    let claims = jwt.validate(token).map_err(|e| {
        tracing::debug!(error = %e, "Token validation failed");
        ApiError::from(e)
    })?;
    identity_from_claims(claims).map_err(ApiError::from)
}

/// Middleware that requires a valid identity token.
///
/// The verified [`Identity`] is stored in request extensions for handlers and
/// for the rate limiter.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = token_from_request(req.headers(), req.uri()) else {
        return ApiError::Unauthorized("Missing or invalid Authorization header".into())
            .into_response();
    };

    match authenticate(&state.jwt, &token) {
        Ok(identity) => {
            tracing::Span::current().record("identity_id", tracing::field::display(identity.id));
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use shared::jwt::IdentityClaims;

    fn jwt() -> JwtConfig {
        JwtConfig::hs256("test-secret-that-is-long-enough", 900, 0)
    }

    fn claims(role: &str) -> IdentityClaims {
        IdentityClaims {
            identity_id: Uuid::new_v4(),
            role: role.to_string(),
            tenant_id: Some(Uuid::new_v4()),
            tracked_person_id: Some(Uuid::new_v4()),
            name: Some("Rosa Diaz".to_string()),
        }
    }

    #[test]
    fn test_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        let uri: Uri = "/api/v1/realtime?token=other".parse().unwrap();

        assert_eq!(
            token_from_request(&headers, &uri).as_deref(),
            Some("abc.def.ghi")
        );
    }

    #[test]
    fn test_token_from_query() {
        let uri: Uri = "/api/v1/realtime?token=abc.def.ghi".parse().unwrap();
        assert_eq!(
            token_from_request(&HeaderMap::new(), &uri).as_deref(),
            Some("abc.def.ghi")
        );
    }

    #[test]
    fn test_missing_token() {
        let uri: Uri = "/api/v1/realtime".parse().unwrap();
        assert!(token_from_request(&HeaderMap::new(), &uri).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(token_from_request(&headers, &uri).is_none());
    }

    #[test]
    fn test_authenticate_builds_identity() {
        let jwt = jwt();
        let claims = claims("agent");
        let token = jwt.issue(&claims).unwrap();

        let identity = authenticate(&jwt, &token).unwrap();
        assert_eq!(identity.id, claims.identity_id);
        assert_eq!(identity.role, Role::Agent);
        assert_eq!(identity.tenant_id, claims.tenant_id);
        assert_eq!(identity.tracked_person_id, claims.tracked_person_id);
        assert_eq!(identity.display_name.as_deref(), Some("Rosa Diaz"));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let jwt = jwt();
        let token = jwt.issue(&claims("superuser")).unwrap();
        assert!(matches!(
            authenticate(&jwt, &token),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let jwt = jwt();
        let token = jwt.issue_with_expiry(&claims("admin"), -120).unwrap();
        assert!(matches!(
            authenticate(&jwt, &token),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let other = JwtConfig::hs256("a-completely-different-secret", 900, 0);
        let token = other.issue(&claims("admin")).unwrap();
        assert!(authenticate(&jwt(), &token).is_err());
    }
}
