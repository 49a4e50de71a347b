use std::collections::HashMap;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::UserId;

pub const SESSION_COOKIE: &str = "session";
pub const FORWARDED_USER_HEADER: &str = "x-user-id";

/// The slice of an inbound request the identity chain looks at.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl InboundRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

pub trait IdentityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, request: &InboundRequest) -> Option<UserId>;
}

/// Looks the session cookie up in a table of issued sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionTokenStrategy {
    sessions: HashMap<String, UserId>,
}

impl SessionTokenStrategy {
    pub fn new(sessions: HashMap<String, UserId>) -> Self {
        Self { sessions }
    }
}

impl IdentityStrategy for SessionTokenStrategy {
    fn name(&self) -> &'static str {
        "session-token"
    }

    fn resolve(&self, request: &InboundRequest) -> Option<UserId> {
        let token = request.cookie(SESSION_COOKIE)?.trim();
        self.sessions.get(token).cloned()
    }
}

/// Trusts a user id set by the upstream auth proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedUserStrategy;

impl IdentityStrategy for ForwardedUserStrategy {
    fn name(&self) -> &'static str {
        "forwarded-user"
    }

    fn resolve(&self, request: &InboundRequest) -> Option<UserId> {
        request
            .header(FORWARDED_USER_HEADER)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(UserId::new)
    }
}

/// Ordered strategies; the first one that yields an identity wins.
#[derive(Default)]
pub struct IdentityChain {
    strategies: Vec<Box<dyn IdentityStrategy>>,
}

impl IdentityChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: impl IdentityStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Session tokens first, then the forwarded header.
    pub fn standard(sessions: HashMap<String, UserId>) -> Self {
        Self::new()
            .with_strategy(SessionTokenStrategy::new(sessions))
            .with_strategy(ForwardedUserStrategy)
    }

    pub fn resolve(&self, request: &InboundRequest) -> Option<UserId> {
        self.strategies.iter().find_map(|strategy| {
            let resolved = strategy.resolve(request);
            if resolved.is_some() {
                debug!(strategy = strategy.name(), "identity resolved");
            }
            resolved
        })
    }

    pub fn require(&self, request: &InboundRequest) -> EngineResult<UserId> {
        self.resolve(request).ok_or(EngineError::Unauthenticated)
    }
}
