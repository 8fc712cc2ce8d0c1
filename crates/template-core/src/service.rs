//! Example service backing the bundled tools

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::ServiceError;

/// Simulated work duration for `process_data`
const PROCESSING_DELAY: Duration = Duration::from_secs(1);

/// Pause between failed attempts in `process_with_retry`
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Example service options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExampleServiceOptions {
    /// Maximum number of attempts made by `process_with_retry`
    pub retry_count: u32,
    pub debug: bool,
}

impl Default for ExampleServiceOptions {
    fn default() -> Self {
        Self {
            retry_count: 3,
            debug: false,
        }
    }
}

/// Example service
#[derive(Debug, Clone, Default)]
pub struct ExampleService {
    options: ExampleServiceOptions,
}

impl ExampleService {
    pub fn new(options: ExampleServiceOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExampleServiceOptions {
        &self.options
    }

    /// Process `input`, taking one second
    pub async fn process_data(&self, input: &str) -> Result<String, ServiceError> {
        info!("Processing data: {}", input);

        if self.options.debug {
            debug!(options = ?self.options, "Debug info");
        }

        sleep(PROCESSING_DELAY).await;

        Ok(format!("Processed: {} (took 1 second)", input))
    }

    /// Run `process_data` until it succeeds or the retry budget is spent
    pub async fn process_with_retry(&self, input: &str) -> Result<String, ServiceError> {
        self.retry(input, |input| self.process_data(input)).await
    }

    /// Retry loop shared by `process_with_retry`.
    ///
    /// `attempt` is invoked at most `retry_count` times with a fixed pause
    /// between consecutive failures. No pause follows the final attempt.
    pub async fn retry<'a, F, Fut>(&self, input: &'a str, attempt: F) -> Result<String, ServiceError>
    where
        F: Fn(&'a str) -> Fut,
        Fut: Future<Output = Result<String, ServiceError>>,
    {
        let max_attempts = self.options.retry_count;
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;

            match attempt(input).await {
                Ok(data) => return Ok(data),
                Err(e) => warn!("Attempt {} failed: {}", attempts, e),
            }

            if attempts < max_attempts {
                sleep(RETRY_DELAY).await;
            }
        }

        Err(ServiceError::RetriesExhausted { attempts })
    }
}
