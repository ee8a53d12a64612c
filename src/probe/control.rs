//! Client side of the control protocol.

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::error::ControlError;
use crate::model::{ControlRequest, ControlResponse};
use crate::netx::failure::classify_reqwest_error;
use crate::netx::{Failure, Operation};

/// A control response together with the helper that produced it.
#[derive(Debug, Clone)]
pub struct ControlExchange {
    pub response: ControlResponse,
    pub helper: String,
}

/// Asks a trusted vantage point to measure the same URL.
#[async_trait]
pub trait Control: Send + Sync {
    async fn exchange(&self, request: &ControlRequest) -> Result<ControlExchange, ControlError>;

    /// Whether there is any helper to ask.
    fn is_available(&self) -> bool {
        true
    }
}

/// Talks JSON over HTTP to a list of test helpers, in order.
#[derive(Clone)]
pub struct HelperClient {
    client: reqwest::Client,
    helpers: Vec<Url>,
}

impl HelperClient {
    pub fn new(client: reqwest::Client, helpers: Vec<Url>) -> Self {
        Self { client, helpers }
    }

    pub fn helpers(&self) -> &[Url] {
        &self.helpers
    }

    async fn exchange_with(
        &self,
        helper: &Url,
        request: &ControlRequest,
    ) -> Result<ControlResponse, ControlError> {
        let response = self
            .client
            .post(helper.clone())
            .json(request)
            .send()
            .await
            .map_err(|err| classify_reqwest_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::UnexpectedStatus(status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| classify_reqwest_error(&err))?;
        serde_json::from_slice(&body).map_err(ControlError::Decode)
    }
}

#[async_trait]
impl Control for HelperClient {
    async fn exchange(&self, request: &ControlRequest) -> Result<ControlExchange, ControlError> {
        let mut last = None;
        for helper in &self.helpers {
            debug!(%helper, "contacting test helper");
            match self.exchange_with(helper, request).await {
                Ok(response) => {
                    return Ok(ControlExchange {
                        response,
                        helper: helper.to_string(),
                    });
                }
                Err(err) => {
                    warn!(%helper, error = %err, "test helper failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| {
            Failure::new("unknown_failure: no test helpers", Operation::HttpRoundTrip).into()
        }))
    }

    fn is_available(&self) -> bool {
        !self.helpers.is_empty()
    }
}
