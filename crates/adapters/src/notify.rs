// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream event sink.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors from notify operations
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("sink rejected payload with status {0}")]
    Rejected(u16),
}

/// Adapter for forwarding events to the downstream sink
#[async_trait]
pub trait Notifier: Clone + Send + Sync + 'static {
    /// Deliver one structured event payload
    async fn deliver(&self, payload: &Value) -> Result<(), NotifyError>;
}

/// HTTP POST webhook. Without a URL every delivery is a no-op.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, payload: &Value) -> Result<(), NotifyError> {
        let Some(url) = self.url.as_deref() else {
            tracing::debug!("no webhook configured, dropping payload");
            return Ok(());
        };
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::{Notifier, NotifyError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;

    /// Recorded delivery attempt
    #[derive(Debug, Clone)]
    pub struct NotifyCall {
        pub payload: Value,
        pub succeeded: bool,
    }

    #[derive(Default)]
    struct FakeNotifyState {
        calls: Vec<NotifyCall>,
        failures_remaining: usize,
    }

    /// Fake notifier for testing
    #[derive(Clone, Default)]
    pub struct FakeNotifier {
        inner: Arc<Mutex<FakeNotifyState>>,
    }

    impl FakeNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `count` deliveries
        pub fn fail_next(&self, count: usize) {
            self.inner.lock().failures_remaining = count;
        }

        /// Get all recorded delivery attempts
        pub fn calls(&self) -> Vec<NotifyCall> {
            self.inner.lock().calls.clone()
        }

        /// Payloads that were delivered successfully
        pub fn delivered(&self) -> Vec<Value> {
            let inner = self.inner.lock();
            inner.calls.iter().filter(|c| c.succeeded).map(|c| c.payload.clone()).collect()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn deliver(&self, payload: &Value) -> Result<(), NotifyError> {
            let mut inner = self.inner.lock();
            let fail = inner.failures_remaining > 0;
            if fail {
                inner.failures_remaining -= 1;
            }
            inner.calls.push(NotifyCall { payload: payload.clone(), succeeded: !fail });
            if fail {
                return Err(NotifyError::SendFailed("injected failure".to_string()));
            }
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeNotifier, NotifyCall};

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
