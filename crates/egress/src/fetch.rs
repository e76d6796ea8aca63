//! One-off safe fetches: validate, resolve, then execute.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::dns::Resolver;
use crate::error::FetchError;
use crate::executor::{OutboundRequest, RequestOptions, SafeRequestExecutor, SafeResponse};
use crate::validate::Validator;

/// Validates every URL before handing it to the executor.
#[derive(Debug, Clone)]
pub struct SafeFetcher {
    validator: Validator,
    executor: SafeRequestExecutor,
    default_timeout: Duration,
}

impl SafeFetcher {
    pub fn new(validator: Validator, executor: SafeRequestExecutor) -> Self {
        Self {
            validator,
            executor,
            default_timeout: crate::executor::DEFAULT_TIMEOUT,
        }
    }

    /// Fetcher over a reqwest transport and the given resolver.
    pub fn with_resolver(resolver: Arc<dyn Resolver>) -> Result<Self, reqwest::Error> {
        Ok(Self::new(Validator::new(resolver), SafeRequestExecutor::reqwest()?))
    }

    /// Timeout used by [`SafeFetcher::get`].
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Validate `url`, resolve it and send `request` to the resolved address.
    pub async fn fetch(
        &self,
        url: &str,
        request: OutboundRequest,
        options: RequestOptions,
    ) -> Result<SafeResponse, FetchError> {
        let destination = self.validator.validate_resolved(url).await.inspect_err(|e| {
            warn!(url = %url, error = %e, "fetch rejected");
        })?;
        debug!(url = %url, ip = %destination.resolved_ip(), "fetching");

        Ok(self.executor.execute(destination, request, options).await?)
    }

    /// Plain GET with the default timeout.
    pub async fn get(&self, url: &str) -> Result<SafeResponse, FetchError> {
        self.fetch(
            url,
            OutboundRequest::get(),
            RequestOptions::with_timeout(self.default_timeout),
        )
        .await
    }
}
