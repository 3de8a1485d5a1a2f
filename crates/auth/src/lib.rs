use arkiv_contracts::Role;
use http::HeaderMap;
use http::header;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

/// The authenticated caller as seen by the gateway: the token subject plus
/// the role claim mapped onto the archive's role set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
}

/// Outcome of classifying an inbound request for view tracking.
///
/// `Invalid` means an Authorization header was present but did not verify.
/// Such traffic is deliberately never counted: an undecodable token is more
/// likely a misconfigured staff client than a genuine visitor, and counting
/// it would inflate the numbers with ambiguous traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Anonymous,
    Authenticated(Principal),
    Invalid,
}

impl Classification {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Classification::Authenticated(principal) => Some(principal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    role: String,
}

/// Verifies HS256 bearer tokens issued by the archive's account service.
/// This service only verifies; it never mints tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "auth secret must be non-empty".to_string(),
            });
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        })
    }

    /// Strict verification for privileged endpoints: a missing or invalid
    /// token is an error the caller turns into 401.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = bearer_token(headers)?;

        let data = decode::<Claims>(&token, &self.decoding_key, &self.validation).map_err(
            |_| AuthError {
                code: "ERR_AUTH_INVALID",
                message: "token verification failed".to_string(),
            },
        )?;

        let role = Role::parse(&data.claims.role).ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: format!("unrecognized role claim: {}", data.claims.role),
        })?;

        Ok(Principal {
            subject: data.claims.sub,
            role,
        })
    }

    /// Lenient classification for public endpoints: absence of a token is a
    /// plain anonymous visitor, while a token that fails verification yields
    /// `Invalid` rather than an error.
    pub fn classify(&self, headers: &HeaderMap) -> Classification {
        if !headers.contains_key(header::AUTHORIZATION) {
            return Classification::Anonymous;
        }

        match self.authenticate(headers) {
            Ok(principal) => Classification::Authenticated(principal),
            Err(_) => Classification::Invalid,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing Authorization header".to_string(),
        })?;

    let token = raw.strip_prefix("Bearer ").ok_or_else(|| AuthError {
        code: "ERR_AUTH_INVALID",
        message: "Authorization header is not a bearer token".to_string(),
    })?;

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "empty bearer token".to_string(),
        });
    }

    Ok(token.to_string())
}
