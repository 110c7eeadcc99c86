use crate::core::{AppError, AppState, ChatError};
use crate::entities::Identity;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Uri};
use axum::{body::Body, extract::Request, http, http::Response, middleware::Next};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

// Payload of the JWT issued by the identity provider
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize, // Expiry time of the token
    pub iat: usize, // Issued at time of the token
    pub uid: Identity,
    #[serde(default)]
    pub email_verified: bool,
}

/// Identity of the caller, inserted in the request extensions by [`authentication_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Identity);

/// Turns a caller credential into a stable identity. Stateless.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, ChatError>;
}

/// HS256 JWT verifier; tokens must carry a verified email.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    #[instrument(skip_all)]
    fn verify(&self, credential: &str) -> Result<Identity, ChatError> {
        let data = decode::<Claims>(credential, &self.decoding_key, &self.validation).map_err(|e| {
            warn!("Failed to decode JWT token: {:?}", e);
            ChatError::AuthenticationFailed
        })?;

        if !data.claims.email_verified {
            warn!(uid = %data.claims.uid, "Token refused: email not verified");
            return Err(ChatError::AuthenticationFailed);
        }
        if data.claims.uid.is_empty() {
            warn!("Token refused: empty uid");
            return Err(ChatError::AuthenticationFailed);
        }

        debug!(uid = %data.claims.uid, "JWT token verified");
        Ok(data.claims.uid)
    }
}

/// Issues a token for `uid`, valid for `ttl`. Used by operators and tests; the
/// production identity provider issues its own tokens signed with the same secret.
#[instrument(skip(secret))]
pub fn encode_jwt(uid: &str, email_verified: bool, ttl: Duration, secret: &str) -> Result<String, ChatError> {
    let now = Utc::now();
    let claims = Claims {
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
        uid: uid.to_string(),
        email_verified,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Failed to encode JWT token: {:?}", e);
        ChatError::AuthenticationFailed
    })
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Reads the caller credential from `Authorization: Bearer <token>` or, for
/// WebSocket upgrades issued by browsers, from the `?token=` query parameter.
pub fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let mut parts = value.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => {
                    Some(token.to_string())
                }
                _ => None,
            }
        });

    from_header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|token| !token.is_empty())
    })
}

#[instrument(skip(state, req, next))]
pub async fn authentication_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response<Body>, AppError> {
    debug!("Running authentication middleware");
    let credential = extract_credential(req.headers(), req.uri()).ok_or_else(|| {
        warn!("Missing credential");
        AppError::unauthorized("Please add the JWT token to the header")
    })?;

    let identity = state.verifier.verify(&credential)?;
    info!(uid = %identity, "User authenticated");

    req.extensions_mut().insert(AuthenticatedUser(identity));
    Ok(next.run(req).await)
}
