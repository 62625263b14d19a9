//! Message delivery to peer banks.
//!
//! [`MessageDelivery`] is the seam between the outbox relay and the wire.
//! [`HttpDelivery`] posts the outbox body to the peer's interbank endpoint;
//! tests plug in an in-process implementation instead.

use std::time::Duration;

use async_trait::async_trait;
use interbank_types::{
    InterbankError, Result, RoutingNumber, RoutingTable, VoteResponse, constants,
};
use reqwest::{StatusCode, header::CONTENT_TYPE};
use tracing::debug;

/// What a peer answered to a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReceipt {
    /// Accepted with no body (`COMMIT_TX`, `ROLLBACK_TX`).
    Acknowledged,
    /// The peer's vote on a `NEW_TX`.
    Vote(VoteResponse),
    /// The peer refused the message for good (a 4xx other than
    /// authentication or throttling). Resending the same body cannot help.
    Rejected(String),
}

/// Transport for outbox messages.
///
/// Implementations must be safe to call again with the same body: the
/// relay redelivers until the receipt has been recorded.
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    /// Transport name (for logging).
    fn name(&self) -> &'static str;

    /// Send `body` (an encoded [`interbank_types::Message`]) to `destination`.
    ///
    /// # Errors
    /// `Delivery` when the peer is unreachable or answered with a failure
    /// worth retrying. Permanent refusals come back as
    /// [`DeliveryReceipt::Rejected`].
    async fn deliver(&self, destination: RoutingNumber, body: &str) -> Result<DeliveryReceipt>;
}

/// HTTP transport: `POST <base_url>/interbank` with the peer's API key.
pub struct HttpDelivery {
    client: reqwest::Client,
    routes: RoutingTable,
}

impl HttpDelivery {
    /// Create a new HTTP transport over the configured peers.
    pub fn new(routes: RoutingTable, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                InterbankError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self { client, routes })
    }

    /// Endpoint URL for a peer base URL.
    #[must_use]
    pub fn endpoint(base_url: &str) -> String {
        format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            constants::INTERBANK_PATH
        )
    }
}

#[async_trait]
impl MessageDelivery for HttpDelivery {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, destination: RoutingNumber, body: &str) -> Result<DeliveryReceipt> {
        let peer = self.routes.peer(destination)?;
        let url = Self::endpoint(&peer.base_url);
        let failed = |reason: String| InterbankError::Delivery {
            destination,
            reason,
        };

        let response = self
            .client
            .post(&url)
            .header(constants::API_KEY_HEADER, &peer.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        debug!(destination = %destination, url = %url, status = %status, "Delivered");
        match status {
            StatusCode::NO_CONTENT => Ok(DeliveryReceipt::Acknowledged),
            StatusCode::OK => {
                let text = response.text().await.map_err(|e| failed(e.to_string()))?;
                let vote = serde_json::from_str(&text).map_err(|e| {
                    InterbankError::ProtocolViolation(format!(
                        "bank {destination} answered with an unreadable vote: {e}"
                    ))
                })?;
                Ok(DeliveryReceipt::Vote(vote))
            }
            other => {
                let text = response.text().await.unwrap_or_default();
                if is_permanent_refusal(other) {
                    return Ok(DeliveryReceipt::Rejected(format!("HTTP {other}: {text}")));
                }
                Err(failed(format!("HTTP {other}: {text}")))
            }
        }
    }
}

/// 4xx answers that will not change on a retry. Authentication failures
/// and throttling can clear up and stay retryable.
fn is_permanent_refusal(status: StatusCode) -> bool {
    status.is_client_error()
        && !matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
}
