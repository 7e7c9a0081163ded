// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub credits: u32,
    pub plan: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

struct UserRecord {
    password: String,
    profile: UserProfile,
}

/// In-memory auth with a fixed demo user set.  Login issues an opaque
/// bearer token; tokens live for the process lifetime.
pub struct AuthService {
    users: HashMap<String, UserRecord>,
    tokens: Mutex<HashMap<String, UserProfile>>,
}

impl AuthService {
    pub fn with_demo_users() -> Self {
        let mut users = HashMap::new();
        users.insert(
            "demo@troupe.dev".to_string(),
            UserRecord {
                password: "troupe-demo".into(),
                profile: UserProfile {
                    id: "user-1".into(),
                    email: "demo@troupe.dev".into(),
                    name: "Harvey Yang".into(),
                    credits: 1204,
                    plan: "Pro".into(),
                },
            },
        );
        users.insert(
            "linda@troupe.dev".to_string(),
            UserRecord {
                password: "troupe-linda".into(),
                profile: UserProfile {
                    id: "user-2".into(),
                    email: "linda@troupe.dev".into(),
                    name: "Linda Chen".into(),
                    credits: 680,
                    plan: "Basic".into(),
                },
            },
        );
        Self {
            users,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn login(&self, request: &LoginRequest) -> Result<TokenResponse, ApiError> {
        let record = self
            .users
            .get(&request.email)
            .filter(|r| r.password == request.password)
            .ok_or(ApiError::Unauthorized)?;
        let token = format!("token-{}", Uuid::new_v4());
        self.tokens
            .lock()
            .expect("token table poisoned")
            .insert(token.clone(), record.profile.clone());
        Ok(TokenResponse {
            access_token: token,
            token_type: "bearer",
        })
    }

    pub fn profile_for(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.tokens
            .lock()
            .expect("token table poisoned")
            .get(token)
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }

    /// Resolve the bearer token in an `Authorization` header.
    pub fn authenticate(
        &self,
        headers: &axum::http::HeaderMap,
    ) -> Result<UserProfile, ApiError> {
        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthorized)?;
        self.profile_for(token.trim())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_round_trip() {
        let auth = AuthService::with_demo_users();
        let token = auth
            .login(&LoginRequest {
                email: "demo@troupe.dev".into(),
                password: "troupe-demo".into(),
            })
            .unwrap();
        let profile = auth.profile_for(&token.access_token).unwrap();
        assert_eq!(profile.id, "user-1");
        assert_eq!(profile.plan, "Pro");
    }

    #[test]
    fn bad_credentials_are_unauthorized() {
        let auth = AuthService::with_demo_users();
        assert!(matches!(
            auth.login(&LoginRequest {
                email: "demo@troupe.dev".into(),
                password: "wrong".into(),
            }),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            auth.profile_for("token-unknown"),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn authenticate_parses_bearer_headers() {
        let auth = AuthService::with_demo_users();
        let token = auth
            .login(&LoginRequest {
                email: "linda@troupe.dev".into(),
                password: "troupe-linda".into(),
            })
            .unwrap();
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", token.access_token).parse().unwrap(),
        );
        assert_eq!(auth.authenticate(&headers).unwrap().id, "user-2");

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic abc".parse().unwrap(),
        );
        assert!(auth.authenticate(&headers).is_err());
    }
}
