//! Request principals.
//!
//! Credential verification is deliberately thin: bearer tokens are looked up in
//! a static table from the configuration, and internal solution users (the job
//! service, the scheduler) present the shared solution secret.

use std::collections::HashMap;
use std::fmt;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jobservice_client::{SECRET_SCHEME, Secret};

use crate::config::UserConfig;

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// No credentials were presented
    Anonymous,

    /// A user authenticated by bearer token
    User {
        /// Username
        username: String,

        /// Whether the user is a system administrator
        sys_admin: bool,
    },

    /// An internal component authenticated by the solution secret
    Solution,
}

impl Principal {
    /// Whether the request carried no usable credentials
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    /// Whether the principal is a system administrator
    pub fn is_sys_admin(&self) -> bool {
        matches!(self, Principal::User { sys_admin: true, .. })
    }

    /// Name recorded as creator or operator
    pub fn name(&self) -> &str {
        match self {
            Principal::Anonymous => "anonymous",
            Principal::User { username, .. } => username,
            Principal::Solution => "harbor-solution",
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
struct KnownUser {
    username: String,
    sys_admin: bool,
}

/// Maps request credentials to a [Principal].
#[derive(Debug, Default)]
pub struct TokenAuthenticator {
    users: HashMap<String, KnownUser>,
    solution_secret: Option<Secret>,
}

impl TokenAuthenticator {
    /// An authenticator which knows nobody.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recognize a bearer token.
    pub fn user<T, U>(mut self, token: T, username: U, sys_admin: bool) -> Self
    where
        T: Into<String>,
        U: Into<String>,
    {
        self.users.insert(
            token.into(),
            KnownUser {
                username: username.into(),
                sys_admin,
            },
        );
        self
    }

    /// Recognize the users listed in the configuration.
    pub fn users<'a>(mut self, users: impl IntoIterator<Item = &'a UserConfig>) -> Self {
        for user in users {
            self = self.user(user.token.revealed(), user.username.clone(), user.sys_admin);
        }
        self
    }

    /// Accept the given secret from solution users.
    pub fn solution_secret(mut self, secret: Secret) -> Self {
        if secret.is_empty() {
            tracing::warn!("ignoring empty solution secret");
        } else {
            self.solution_secret = Some(secret);
        }
        self
    }

    /// Identify the principal behind a request.
    ///
    /// Unrecognized credentials are treated like missing ones; the authorization
    /// check then answers `401` where authentication is required.
    pub fn authenticate(&self, headers: &HeaderMap) -> Principal {
        let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return Principal::Anonymous;
        };

        if let Some(token) = value.strip_prefix("Bearer ") {
            return match self.users.get(token.trim()) {
                Some(user) => Principal::User {
                    username: user.username.clone(),
                    sys_admin: user.sys_admin,
                },
                None => {
                    tracing::debug!("unknown bearer token");
                    Principal::Anonymous
                }
            };
        }

        if let Some(secret) = value
            .strip_prefix(SECRET_SCHEME)
            .and_then(|rest| rest.strip_prefix(' '))
        {
            return match &self.solution_secret {
                Some(expected) if expected.revealed() == secret.trim() => Principal::Solution,
                _ => {
                    tracing::debug!("solution secret mismatch");
                    Principal::Anonymous
                }
            };
        }

        Principal::Anonymous
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(authorization: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(authorization));
        headers
    }

    fn authenticator() -> TokenAuthenticator {
        TokenAuthenticator::new()
            .user("admin-token", "admin", true)
            .user("dev-token", "dev", false)
            .solution_secret(Secret::from("internal"))
    }

    #[test]
    fn bearer_tokens() {
        let auth = authenticator();
        assert!(auth.authenticate(&headers("Bearer admin-token")).is_sys_admin());

        let dev = auth.authenticate(&headers("Bearer dev-token"));
        assert_eq!(dev.name(), "dev");
        assert!(!dev.is_sys_admin());

        assert!(auth.authenticate(&headers("Bearer nope")).is_anonymous());
    }

    #[test]
    fn solution_secret() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate(&headers("Harbor-Secret internal")),
            Principal::Solution
        );
        assert!(auth.authenticate(&headers("Harbor-Secret wrong")).is_anonymous());
    }

    #[test]
    fn missing_credentials() {
        assert!(authenticator().authenticate(&HeaderMap::new()).is_anonymous());
        assert!(authenticator().authenticate(&headers("Basic abc")).is_anonymous());
    }
}
