//! Actuator abstraction for driving the page session.
//!
//! The [`Actuator`] trait decouples batch orchestration from the actual page
//! backend (currently an external driver process, see [`crate::io::driver`]).
//! Tests use scripted actuators that answer without a browser.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::io::config::TargetConfig;

/// Predicate for the network response that confirms a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMatcher {
    /// Substring the response URL must contain.
    pub url_contains: String,
    /// Required HTTP status.
    pub status: u16,
    /// Method of the originating request.
    pub method: String,
}

impl ResponseMatcher {
    pub fn from_target(target: &TargetConfig) -> Self {
        Self {
            url_contains: target.confirm_url.clone(),
            status: target.confirm_status,
            method: target.confirm_method.clone(),
        }
    }

    pub fn matches(&self, url: &str, status: u16, method: &str) -> bool {
        url.contains(&self.url_contains)
            && status == self.status
            && method.eq_ignore_ascii_case(&self.method)
    }
}

/// Handle to a confirmation wait armed with [`Actuator::arm_confirmation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaitId(pub u64);

/// The response that satisfied a [`ResponseMatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfirmedResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Option<String>,
}

/// Abstraction over page automation backends.
///
/// Errors are reported as text; callers classify them by message (see
/// [`crate::core::classifier`]), so implementations should keep the backend's
/// wording for closed sessions and timeouts.
#[async_trait]
pub trait Actuator: Send {
    /// Load `url` and wait for the page to settle.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Set a cookie on the current page.
    async fn set_cookie(&mut self, name: &str, value: &str) -> Result<()>;

    /// Click the element matching `selector` once.
    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Start listening for a matching response. Must be called before the
    /// actions that trigger it, or a fast response can be missed.
    async fn arm_confirmation(&mut self, matcher: &ResponseMatcher) -> Result<WaitId>;

    /// Wait for an armed confirmation, failing after `timeout`.
    async fn await_confirmation(
        &mut self,
        wait: WaitId,
        timeout: Duration,
    ) -> Result<ConfirmedResponse>;

    /// Whether the page has flagged this session as a bot.
    async fn is_flagged(&mut self) -> Result<bool>;

    /// Release the session. Called at most once by the lifecycle controller.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matcher_requires_url_status_and_method() {
        let matcher = ResponseMatcher::from_target(&TargetConfig::default());

        assert!(matcher.matches("https://stats.popcat.click/pop?pop_count=800", 201, "POST"));
        assert!(matcher.matches("https://stats.popcat.click/pop", 201, "post"));
        assert!(!matcher.matches("https://stats.popcat.click/pop", 200, "POST"));
        assert!(!matcher.matches("https://stats.popcat.click/pop", 201, "GET"));
        assert!(!matcher.matches("https://popcat.click/", 201, "POST"));
    }
}
