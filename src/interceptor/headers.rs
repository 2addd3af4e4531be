//! Adapter that fills in default request headers.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use super::{AdaptState, Adapter};
use crate::config::default_user_agent;
use crate::error::BoxError;
use crate::request::TransportRequest;

/// Adds headers the request does not already carry.
///
/// A `User-Agent` naming this crate is included by default. Headers set on the
/// request itself always win.
#[derive(Debug, Clone)]
pub struct DefaultHeaders {
    headers: HeaderMap,
}

impl Default for DefaultHeaders {
    fn default() -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(agent) = HeaderValue::from_str(&default_user_agent()) {
            headers.insert(USER_AGENT, agent);
        }
        Self { headers }
    }
}

impl DefaultHeaders {
    /// Creates the default set (just `User-Agent`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a default header.
    #[must_use]
    pub fn with(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the configured defaults.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[async_trait]
impl Adapter for DefaultHeaders {
    async fn adapt(
        &self,
        mut request: TransportRequest,
        _state: &AdaptState,
    ) -> Result<TransportRequest, BoxError> {
        for (name, value) in &self.headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        Ok(request)
    }
}
