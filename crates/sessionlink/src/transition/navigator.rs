//! Navigation primitives supplied by the host application.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("navigation to {url} failed: {message}")]
    Failed { url: String, message: String },

    #[error("navigation to {0} was cancelled")]
    Cancelled(String),
}

/// Client-side navigation available inside the application shell.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Navigate to `url`; resolves once the new page has taken over.
    async fn navigate(&self, url: &str) -> Result<(), NavigationError>;

    /// Warm up `url` ahead of the delayed navigation.
    fn prefetch(&self, _url: &str) {}
}

/// Immediate full-page redirect, used when no [`Navigator`] is mounted.
pub trait HardRedirect: Send + Sync {
    fn redirect(&self, url: &str);
}

impl<F> HardRedirect for F
where
    F: Fn(&str) + Send + Sync,
{
    fn redirect(&self, url: &str) {
        self(url)
    }
}
