//! Waiter - Poll a remote object until its status reaches a target set
//!
//! One parametrized loop serves every asynchronous resource: the caller
//! supplies the pending and target status sets, a refresh callback, and
//! the timing. The refresh callback reports `(value, status)`; delete
//! refreshers report [`DELETED_MARKER`] once the API stops returning the
//! object.

use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::provider::{ProviderError, ProviderResult};

/// Local-only status meaning "the API no longer returns this object"
pub const DELETED_MARKER: &str = "tf-marker-for-deleted-resource";

/// Applies when an operation has no configured timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error(
        "timeout while waiting for state to become '{}' (last state: '{last_state}', timeout: {})",
        target.join(", "),
        humantime::format_duration(*timeout)
    )]
    Timeout {
        last_state: String,
        target: Vec<String>,
        timeout: Duration,
    },

    #[error("unexpected state '{state}', wanted target '{}'", target.join(", "))]
    UnexpectedState { state: String, target: Vec<String> },

    #[error(transparent)]
    Refresh(#[from] ProviderError),
}

impl From<WaitError> for ProviderError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Refresh(inner) => inner,
            other => ProviderError::new(other.to_string()),
        }
    }
}

/// Poll-until-target configuration
#[derive(Debug, Clone)]
pub struct StateWaiter {
    pending: Vec<String>,
    target: Vec<String>,
    delay: Duration,
    min_interval: Duration,
    timeout: Duration,
}

impl StateWaiter {
    /// An empty pending set accepts any non-target status as pending.
    pub fn new<P, T>(pending: P, target: T) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            delay: Duration::from_secs(10),
            min_interval: Duration::from_secs(5),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Wait before the first refresh
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wait between refreshes
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn target(&self) -> &[String] {
        &self.target
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Run the poll loop. Returns the value that accompanied the first
    /// target status.
    pub async fn wait<T, F, Fut>(&self, mut refresh: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<(T, String)>>,
    {
        let mut last_state = String::new();

        let poll = async {
            tokio::time::sleep(self.delay).await;
            loop {
                let (value, status) = refresh().await?;
                if self.target.contains(&status) {
                    debug!("reached target state '{}'", status);
                    return Ok(value);
                }
                if !self.pending.is_empty() && !self.pending.contains(&status) {
                    return Err(WaitError::UnexpectedState {
                        state: status,
                        target: self.target.clone(),
                    });
                }
                debug!(
                    "waiting for state '{}', current state '{}'",
                    self.target.join(", "),
                    status
                );
                last_state = status;
                tokio::time::sleep(self.min_interval).await;
            }
        };

        let outcome = tokio::time::timeout(self.timeout, poll).await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(WaitError::Timeout {
                last_state,
                target: self.target.clone(),
                timeout: self.timeout,
            }),
        }
    }
}
