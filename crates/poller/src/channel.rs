//! Status query channel with bounded retry and reconnect.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use vmsctl_common::{ClientFactory, PollerOptions, QueryError, RemoteTaskHandle, TaskClient, TaskStatus};

use crate::error::PollError;

/// Owns the current [`TaskClient`] and replaces it through the factory when a
/// query fails with a communication error.
pub struct Channel {
    factory: Arc<dyn ClientFactory>,
    client: Option<Arc<dyn TaskClient>>,
    max_attempts: u32,
    retry_delay: Duration,
    connects: u32,
}

impl Channel {
    pub fn new(factory: Arc<dyn ClientFactory>, options: &PollerOptions) -> Self {
        Self {
            factory,
            client: None,
            max_attempts: options.max_attempts.max(1),
            retry_delay: options.retry_delay,
            connects: 0,
        }
    }

    /// Number of times the factory has been asked for a client.
    #[inline]
    pub fn connects(&self) -> u32 {
        self.connects
    }

    async fn client(&mut self) -> Result<Arc<dyn TaskClient>, QueryError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        self.connects += 1;
        debug!(connects = self.connects, "Opening status channel");
        let client = self.factory.connect().await?;
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Query a task's status. Communication failures are retried with a flat
    /// delay and a fresh client, up to the attempt bound; anything else fails
    /// at once.
    pub async fn query(&mut self, handle: &RemoteTaskHandle) -> Result<TaskStatus, PollError> {
        let mut last = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
                self.client = None;
            }

            let result = match self.client().await {
                Ok(client) => client.get_status(handle).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(status) => return Ok(status),
                Err(e) if e.is_transient() => {
                    warn!(%handle, attempt, max = self.max_attempts, error = %e, "Status query failed");
                    last = Some(e);
                }
                Err(e) => {
                    return Err(PollError::Query {
                        handle: handle.clone(),
                        source: e,
                    })
                }
            }
        }

        Err(PollError::RetriesExhausted {
            handle: handle.clone(),
            attempts: self.max_attempts,
            last: last.unwrap_or_else(|| QueryError::Communication("no attempt made".into())),
        })
    }

    /// Whether the current client can clean up this handle's task type.
    pub async fn supports_cleanup(&mut self, handle: &RemoteTaskHandle) -> Result<bool, PollError> {
        match self.client().await {
            Ok(client) => Ok(client.supports_cleanup(handle)),
            Err(source) => Err(PollError::Cleanup {
                handle: handle.clone(),
                source,
            }),
        }
    }

    pub async fn cleanup(&mut self, handle: &RemoteTaskHandle) -> Result<(), PollError> {
        let client = self.client().await.map_err(|source| PollError::Cleanup {
            handle: handle.clone(),
            source,
        })?;
        client.cleanup(handle).await.map_err(|source| PollError::Cleanup {
            handle: handle.clone(),
            source,
        })
    }
}
