//! Upgrade admission: who is connecting, and to which thread.
//!
//! The credential is checked first, then the `threadId` query parameter.
//! Either failure is answered over plain HTTP before any upgrade happens.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use permit_core::{ThreadId, UserId};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Why a credential was rejected.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Signature, expiry, or claim validation failed.
    #[error("invalid token: {0}")]
    Invalid(String),
    /// The `sub` claim is not a user id.
    #[error("token subject is not a user id")]
    BadSubject,
}

/// Turns a credential into the user it speaks for.
pub trait TokenValidator: Send + Sync {
    /// Verify `credential` and return its user.
    fn verify(&self, credential: &str) -> Result<UserId, TokenError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// HS256 JWT validation.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Validate with a shared secret, optionally pinning the issuer.
    pub fn hs256(secret: &[u8], issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenValidator for JwtValidator {
    fn verify(&self, credential: &str) -> Result<UserId, TokenError> {
        let data = decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        UserId::parse(&data.claims.sub).map_err(|_| TokenError::BadSubject)
    }
}

/// Query string on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Thread the connection starts subscribed to.
    #[serde(rename = "threadId", alias = "thread_id")]
    pub thread_id: Option<String>,
}

/// An admitted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Authenticated user.
    pub user_id: UserId,
    /// Initial thread subscription.
    pub thread_id: ThreadId,
}

/// Upgrade refused.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// Missing or invalid credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Missing or malformed thread id.
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Check the credential cookie, then the thread id.
///
/// `query` is taken as extracted, so an unparseable query string is only
/// reported once the credential has passed.
pub fn admit(
    jar: &CookieJar,
    query: Result<ConnectQuery, QueryRejection>,
    cookie_name: &str,
    validator: &dyn TokenValidator,
) -> Result<Admission, AdmissionError> {
    let credential = jar
        .get(cookie_name)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AdmissionError::Unauthorized(format!("missing {cookie_name} cookie")))?;

    let user_id = validator.verify(credential).map_err(|e| {
        debug!(error = %e, "credential rejected");
        AdmissionError::Unauthorized(e.to_string())
    })?;

    let query = query.map_err(|e| AdmissionError::BadRequest(e.body_text()))?;
    let raw = query
        .thread_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AdmissionError::BadRequest("threadId is required".into()))?;
    let thread_id =
        ThreadId::parse(raw).map_err(|e| AdmissionError::BadRequest(e.to_string()))?;

    Ok(Admission { user_id, thread_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::extract::Query;
    use axum_extra::extract::cookie::Cookie;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    const SECRET: &[u8] = b"test-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        exp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        iss: Option<&'a str>,
    }

    fn token(sub: &str, exp_offset: i64, iss: Option<&str>) -> String {
        let claims = TestClaims {
            sub,
            exp: chrono::Utc::now().timestamp() + exp_offset,
            iss,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn jar_with(value: &str) -> CookieJar {
        CookieJar::new().add(Cookie::new("access_token", value.to_owned()))
    }

    fn query(thread: Option<&str>) -> Result<ConnectQuery, QueryRejection> {
        Ok(ConnectQuery {
            thread_id: thread.map(str::to_owned),
        })
    }

    fn query_from(uri: &str) -> Result<ConnectQuery, QueryRejection> {
        Query::try_from_uri(&uri.parse().unwrap()).map(|Query(q)| q)
    }

    #[test]
    fn valid_token_and_thread_admitted() {
        let user = UserId::new();
        let thread = ThreadId::new();
        let validator = JwtValidator::hs256(SECRET, None);
        let jar = jar_with(&token(&user.to_string(), 3600, None));

        let admitted = admit(&jar, query(Some(&thread.to_string())), "access_token", &validator).unwrap();

        assert_eq!(admitted.user_id, user);
        assert_eq!(admitted.thread_id, thread);
    }

    #[test]
    fn missing_cookie_unauthorized() {
        let validator = JwtValidator::hs256(SECRET, None);
        let result = admit(&CookieJar::new(), query(Some("x")), "access_token", &validator);
        assert_matches!(result, Err(AdmissionError::Unauthorized(_)));
    }

    #[test]
    fn credential_checked_before_thread() {
        let validator = JwtValidator::hs256(SECRET, None);
        let result = admit(&jar_with("garbage"), query(None), "access_token", &validator);
        assert_matches!(result, Err(AdmissionError::Unauthorized(_)));
    }

    #[test]
    fn wrong_secret_unauthorized() {
        let validator = JwtValidator::hs256(b"other-secret", None);
        let jar = jar_with(&token(&UserId::new().to_string(), 3600, None));
        let result = admit(&jar, query(Some(&ThreadId::new().to_string())), "access_token", &validator);
        assert_matches!(result, Err(AdmissionError::Unauthorized(_)));
    }

    #[test]
    fn expired_token_unauthorized() {
        let validator = JwtValidator::hs256(SECRET, None);
        let jar = jar_with(&token(&UserId::new().to_string(), -3600, None));
        let result = admit(&jar, query(Some(&ThreadId::new().to_string())), "access_token", &validator);
        assert_matches!(result, Err(AdmissionError::Unauthorized(_)));
    }

    #[test]
    fn non_uuid_subject_rejected() {
        let validator = JwtValidator::hs256(SECRET, None);
        assert_matches!(
            validator.verify(&token("alice", 3600, None)),
            Err(TokenError::BadSubject)
        );
    }

    #[test]
    fn issuer_pinned_when_configured() {
        let validator = JwtValidator::hs256(SECRET, Some("permit-auth"));
        let user = UserId::new().to_string();
        assert!(validator.verify(&token(&user, 3600, Some("permit-auth"))).is_ok());
        assert_matches!(
            validator.verify(&token(&user, 3600, Some("someone-else"))),
            Err(TokenError::Invalid(_))
        );
    }

    #[test]
    fn missing_thread_bad_request() {
        let validator = JwtValidator::hs256(SECRET, None);
        let jar = jar_with(&token(&UserId::new().to_string(), 3600, None));
        assert_matches!(
            admit(&jar, query(None), "access_token", &validator),
            Err(AdmissionError::BadRequest(_))
        );
        assert_matches!(
            admit(&jar, query(Some("  ")), "access_token", &validator),
            Err(AdmissionError::BadRequest(_))
        );
    }

    #[test]
    fn malformed_thread_bad_request() {
        let validator = JwtValidator::hs256(SECRET, None);
        let jar = jar_with(&token(&UserId::new().to_string(), 3600, None));
        assert_matches!(
            admit(&jar, query(Some("not-a-uuid")), "access_token", &validator),
            Err(AdmissionError::BadRequest(_))
        );
    }

    #[test]
    fn unparseable_query_is_checked_after_credential() {
        let validator = JwtValidator::hs256(SECRET, None);
        let duplicated = format!("/ws?threadId={}&threadId={}", ThreadId::new(), ThreadId::new());
        assert!(query_from(&duplicated).is_err());

        assert_matches!(
            admit(&CookieJar::new(), query_from(&duplicated), "access_token", &validator),
            Err(AdmissionError::Unauthorized(_))
        );
        let jar = jar_with(&token(&UserId::new().to_string(), 3600, None));
        assert_matches!(
            admit(&jar, query_from(&duplicated), "access_token", &validator),
            Err(AdmissionError::BadRequest(_))
        );
    }

    #[test]
    fn query_accepts_both_spellings() {
        let thread = ThreadId::new();
        for uri in [format!("/ws?threadId={thread}"), format!("/ws?thread_id={thread}")] {
            assert_eq!(query_from(&uri).unwrap().thread_id, Some(thread.to_string()));
        }
    }

    #[test]
    fn rejection_statuses() {
        let unauthorized = AdmissionError::Unauthorized("x".into()).into_response();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        let bad = AdmissionError::BadRequest("x".into()).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }
}
