//! Session credential management for signed tile URLs.
//!
//! The handshake that produces a credential lives behind [`SessionHandshake`];
//! [`CapabilityProvider`] runs it lazily on the first tile request and
//! decorates every later URL with the cached credential.

use std::env;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::BoxFuture;

/// Opaque token material used to sign tile URLs.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub session_id: String,
    pub access_key: String,
}

impl SessionCredential {
    pub fn new(session_id: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            access_key: access_key.into(),
        }
    }

    /// Append the credential as query parameters.
    pub fn decorate(&self, raw_url: &str) -> String {
        let sep = if raw_url.contains('?') { '&' } else { '?' };
        format!(
            "{raw_url}{sep}sid={}&accessKey={}",
            self.session_id, self.access_key
        )
    }
}

// Keep the access key out of logs.
impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("session_id", &self.session_id)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub struct CapabilityError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl std::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "authorization failed: {}", self.message)
    }
}

impl std::error::Error for CapabilityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Produces a session credential. Called at most once per successful session.
pub trait SessionHandshake: Send + Sync {
    fn establish(&self) -> BoxFuture<'_, Result<SessionCredential, CapabilityError>>;
}

/// Anything that turns a raw tile URL into an authorized one.
pub trait UrlAuthorizer: Send + Sync {
    fn authorize<'a>(&'a self, raw_url: &'a str) -> BoxFuture<'a, Result<String, CapabilityError>>;
}

/// Handshake backed by a credential obtained out of band.
#[derive(Debug, Clone, Default)]
pub struct StaticHandshake {
    session_id: Option<String>,
    access_key: Option<String>,
}

impl StaticHandshake {
    pub fn new(session_id: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            access_key: Some(access_key.into()),
        }
    }

    /// Reads `LOOKAROUND_SESSION_ID` / `LOOKAROUND_ACCESS_KEY`. Missing values
    /// only surface as an error when the first tile is requested.
    pub fn from_env() -> Self {
        Self {
            session_id: env::var("LOOKAROUND_SESSION_ID").ok(),
            access_key: env::var("LOOKAROUND_ACCESS_KEY").ok(),
        }
    }
}

impl SessionHandshake for StaticHandshake {
    fn establish(&self) -> BoxFuture<'_, Result<SessionCredential, CapabilityError>> {
        Box::pin(async move {
            match (&self.session_id, &self.access_key) {
                (Some(sid), Some(key)) if !sid.is_empty() && !key.is_empty() => {
                    Ok(SessionCredential::new(sid.clone(), key.clone()))
                }
                _ => Err(CapabilityError::new(
                    "no session credential configured (LOOKAROUND_SESSION_ID / LOOKAROUND_ACCESS_KEY)",
                )),
            }
        })
    }
}

/// Lazily initialized URL signer.
pub struct CapabilityProvider<H> {
    handshake: H,
    credential: OnceCell<SessionCredential>,
}

impl<H: SessionHandshake> CapabilityProvider<H> {
    pub fn new(handshake: H) -> Self {
        Self {
            handshake,
            credential: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.credential.initialized()
    }

    /// Concurrent first callers share a single handshake. A failed handshake
    /// is not cached; the next call starts a fresh attempt.
    async fn credential(&self) -> Result<&SessionCredential, CapabilityError> {
        self.credential
            .get_or_try_init(|| async {
                debug!("establishing tile session");
                let credential = self.handshake.establish().await;
                if let Err(err) = &credential {
                    warn!("tile session handshake failed: {err}");
                }
                credential
            })
            .await
    }
}

impl<H: SessionHandshake> UrlAuthorizer for CapabilityProvider<H> {
    fn authorize<'a>(&'a self, raw_url: &'a str) -> BoxFuture<'a, Result<String, CapabilityError>> {
        Box::pin(async move {
            let credential = self.credential().await?;
            Ok(credential.decorate(raw_url))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingHandshake {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl SessionHandshake for CountingHandshake {
        fn establish(&self) -> BoxFuture<'_, Result<SessionCredential, CapabilityError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    Err(CapabilityError::new("handshake refused"))
                } else {
                    Ok(SessionCredential::new("sess", "key"))
                }
            })
        }
    }

    #[test]
    fn decorate_picks_query_separator() {
        let c = SessionCredential::new("s", "k");
        assert_eq!(c.decorate("https://x/t/0/2"), "https://x/t/0/2?sid=s&accessKey=k");
        assert_eq!(c.decorate("https://x/t?a=1"), "https://x/t?a=1&sid=s&accessKey=k");
    }

    #[test]
    fn debug_redacts_access_key() {
        let c = SessionCredential::new("s", "secret");
        assert!(!format!("{c:?}").contains("secret"));
    }

    #[tokio::test]
    async fn handshake_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CapabilityProvider::new(CountingHandshake {
            calls: calls.clone(),
            fail: false,
        });

        let a = provider.authorize("https://x/a").await.unwrap();
        let b = provider.authorize("https://x/b").await.unwrap();

        assert_eq!(a, "https://x/a?sid=sess&accessKey=key");
        assert_eq!(b, "https://x/b?sid=sess&accessKey=key");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(provider.is_initialized());
    }

    #[tokio::test]
    async fn failed_handshake_surfaces_and_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CapabilityProvider::new(CountingHandshake {
            calls: calls.clone(),
            fail: true,
        });

        assert!(provider.authorize("https://x/a").await.is_err());
        assert!(provider.authorize("https://x/a").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!provider.is_initialized());
    }

    #[tokio::test]
    async fn static_handshake_requires_both_values() {
        let provider = CapabilityProvider::new(StaticHandshake::default());
        let err = provider.authorize("https://x/a").await.unwrap_err();
        assert!(err.to_string().contains("no session credential"));

        let provider = CapabilityProvider::new(StaticHandshake::new("s", "k"));
        assert!(provider.authorize("https://x/a").await.is_ok());
    }
}
