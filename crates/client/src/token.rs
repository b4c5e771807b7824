//! Bearer credentials for the hub.
//!
//! The provider is asked once per connection attempt, including every
//! automatic reconnect, so a rotated token is picked up without any
//! coordination with the client.

/// Supplies the current bearer token, or `None` to connect anonymously.
pub trait TokenProvider: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn token(&self) -> Option<String> {
        (self)()
    }
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from an environment variable on every attempt.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}
