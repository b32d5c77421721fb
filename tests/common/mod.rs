use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use verdict_relay::forwarder::{Downstream, WebhookForwarder};
use verdict_relay::rate_limit::FixedWindowLimiter;
use verdict_relay::{app, AppState, RelayError, RELAY_PATH};

/// Tracks environment variable mutations and restores originals on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        self.originals
            .entry(key.to_string())
            .or_insert_with(|| std::env::var(key).ok());
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Serve `router` on an ephemeral port; returns its base URL.
pub async fn serve(router: Router) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

/// Serve the relay for `state`; returns the relay endpoint URL.
#[allow(dead_code)]
pub async fn spawn_relay(state: AppState) -> (String, JoinHandle<()>) {
    let (base, handle) = serve(app(state)).await;
    (format!("{}{}", base, RELAY_PATH), handle)
}

/// Relay state wired to a real HTTP forwarder with the default limiter.
#[allow(dead_code)]
pub fn webhook_state(url: Option<String>) -> AppState {
    let forwarder = WebhookForwarder::new(url, None).unwrap();
    AppState::new(Arc::new(forwarder), FixedWindowLimiter::default())
}

/// In-process downstream that returns a canned reply and counts calls.
#[allow(dead_code)]
pub struct CannedDownstream {
    reply: Result<Value, RelayError>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl CannedDownstream {
    pub fn new(reply: Result<Value, RelayError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Downstream for CannedDownstream {
    fn is_configured(&self) -> bool {
        true
    }

    async fn forward(&self, _code: &str) -> Result<Value, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}
