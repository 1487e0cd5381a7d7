//! Startup readiness gate.
//!
//! [`Bootstrap`] probes the search service until it answers, makes sure the
//! catalog index exists, and only then installs the service into the shared
//! [`Connection`]. Nothing else may serve until it returns.

use std::{fmt, num::NonZeroU32, sync::Arc, time::Duration};

use crate::{
    connection::Connection,
    error::{Error, Result},
    schema::{IndexDefinition, IndexStatus, ensure_index},
    service::{SearchService, ServiceInfo},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
        })
    }
}

/// How long to wait between probes, and how many to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<NonZeroU32>,
}

impl RetryPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

    /// No delay, unlimited attempts.
    pub fn immediate() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max: NonZeroU32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max.get())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Self::DEFAULT_DELAY,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub info: ServiceInfo,
    /// Probes made, including the successful one.
    pub attempts: u32,
    pub index: IndexStatus,
}

pub struct Bootstrap {
    service: Arc<dyn SearchService>,
    definition: IndexDefinition,
    policy: RetryPolicy,
    state: ConnectionState,
}

impl Bootstrap {
    pub fn new(service: Arc<dyn SearchService>) -> Self {
        Self {
            service,
            definition: IndexDefinition::default(),
            policy: RetryPolicy::default(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_definition(mut self, definition: IndexDefinition) -> Self {
        self.definition = definition;
        self
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::debug!(from = %self.state, to = %next, "connection state");
        self.state = next;
    }

    async fn probe(&self) -> Result<ServiceInfo> {
        let resp = self.service.info().await?;
        if !resp.is_success() {
            return Err(Error::Connection(format!(
                "info probe answered {}: {}",
                resp.status,
                resp.reason()
            )));
        }
        resp.decode().map_err(|e| {
            Error::Connection(format!("info probe returned garbage: {e}"))
        })
    }

    /// Wait for the service, ensure the index, and install the service into
    /// `connection`.
    ///
    /// Probe failures are retried per the policy. A failure to create the
    /// index is returned immediately and leaves `connection` uninitialized.
    pub async fn run(mut self, connection: &Connection) -> Result<BootstrapReport> {
        if connection.is_ready() {
            return Err(Error::AlreadyInitialized);
        }

        let mut attempts = 0u32;
        let info = loop {
            self.transition(ConnectionState::Connecting);
            attempts += 1;

            match self.probe().await {
                Ok(info) => break info,
                Err(err) => {
                    self.transition(ConnectionState::Disconnected);
                    if self.policy.exhausted(attempts) {
                        tracing::error!(attempts, error = %err, "giving up on search service");
                        return Err(err);
                    }
                    tracing::warn!(
                        attempt = attempts,
                        error = %err,
                        retry_in = ?self.policy.delay,
                        "search service unavailable"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        };

        self.transition(ConnectionState::Connected);
        tracing::info!(
            name = %info.name,
            cluster = %info.cluster_name,
            version = %info.version.number,
            attempts,
            "connected to search service"
        );

        let index =
            ensure_index(self.service.as_ref(), connection.index(), &self.definition)
                .await?;
        connection.install(self.service.clone())?;
        self.transition(ConnectionState::Ready);
        tracing::info!(index = connection.index(), "catalog ready");

        Ok(BootstrapReport {
            info,
            attempts,
            index,
        })
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
