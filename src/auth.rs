//! Endpoint authentication
//!
//! Strategies are registered by the host under a name; [`crate::config::AuthConfig`]
//! refers to them by that name, per endpoint.

use crate::config::{AuthSetting, Endpoint};
use crate::error::{Error, Result};
use crate::telemetry::Fault;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Decides whether a request may reach an endpoint.
pub trait AuthStrategy: Send + Sync {
    /// Check the request headers.
    fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<(), AuthRejection>;
}

/// Refusal of a strategy, answered as `401 Unauthorized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
    message: String,
    challenge: Option<String>,
}

impl AuthRejection {
    /// Rejection without a challenge.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            challenge: None,
        }
    }

    /// Sets the `WWW-Authenticate` value sent back to the client.
    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    /// Reason of the rejection.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let mut response = Fault::unauthorized(self.message).into_response();
        if let Some(challenge) = self.challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

/// HTTP Basic authentication against a fixed set of users.
#[derive(Clone)]
pub struct BasicAuth {
    realm: String,
    users: HashMap<String, String>,
}

impl BasicAuth {
    /// Strategy answering challenges for `realm`, with no user yet.
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            users: HashMap::new(),
        }
    }

    /// Accepts `username` with `password`.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    fn reject(&self, message: &str) -> AuthRejection {
        AuthRejection::new(message).with_challenge(format!("Basic realm=\"{}\"", self.realm))
    }

    fn credentials(&self, headers: &HeaderMap) -> std::result::Result<(String, String), AuthRejection> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| self.reject("Missing authentication"))?
            .to_str()
            .map_err(|_| self.reject("Bad HTTP authentication header format"))?;

        let (scheme, encoded) = value
            .trim()
            .split_once(' ')
            .ok_or_else(|| self.reject("Bad HTTP authentication header format"))?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(self.reject("Missing authentication"));
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| self.reject("Bad header internal syntax"))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| self.reject("Bad header internal syntax"))?;
        Ok((username.to_string(), password.to_string()))
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&str> = self.users.keys().map(String::as_str).collect();
        users.sort_unstable();
        f.debug_struct("BasicAuth")
            .field("realm", &self.realm)
            .field("users", &users)
            .finish()
    }
}

impl AuthStrategy for BasicAuth {
    fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<(), AuthRejection> {
        let (username, password) = self.credentials(headers)?;
        match self.users.get(&username) {
            Some(expected) if *expected == password => Ok(()),
            _ => {
                debug!(username = %username, realm = %self.realm, "Basic authentication failed");
                Err(self.reject("Bad username or password"))
            }
        }
    }
}

/// Strategies available to the plugin, by name.
#[derive(Clone, Default)]
pub struct AuthStrategies {
    strategies: HashMap<String, Arc<dyn AuthStrategy>>,
}

impl AuthStrategies {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `strategy` under `name`, replacing any previous one.
    pub fn with(mut self, name: impl Into<String>, strategy: impl AuthStrategy + 'static) -> Self {
        self.strategies.insert(name.into(), Arc::new(strategy));
        self
    }

    /// Strategy registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Strategy guarding `endpoint` under `setting`, `None` when disabled.
    pub fn resolve(&self, setting: &AuthSetting, endpoint: Endpoint) -> Result<Option<Arc<dyn AuthStrategy>>> {
        match setting {
            AuthSetting::Disabled => Ok(None),
            AuthSetting::Strategy(name) => {
                self.get(name)
                    .map(Some)
                    .ok_or_else(|| Error::UnknownAuthStrategy {
                        name: name.clone(),
                        endpoint: endpoint.to_string(),
                    })
            }
        }
    }
}

impl fmt::Debug for AuthStrategies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("AuthStrategies").field("names", &names).finish()
    }
}

/// Middleware rejecting requests the strategy refuses.
pub async fn require_auth(
    State(strategy): State<Arc<dyn AuthStrategy>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, AuthRejection> {
    strategy.authenticate(request.headers())?;
    Ok(next.run(request).await)
}
