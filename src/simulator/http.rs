//! Remote simulator backend
//!
//! Posts the boundary request to an external dry-run service. No retry
//! logic lives here: a single failure degrades the stage; retry policy
//! belongs to the service's own HTTP layer.

use async_trait::async_trait;
use eyre::{eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, USER_AGENT};
use std::time::Duration;
use tracing::debug;

use super::{SimRequest, SimResponse, Simulator};
use crate::utils::constants::USER_AGENT as USER_AGENT_CONST;

/// HTTP client for a remote execution simulator.
pub struct HttpSimulator {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSimulator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_CONST));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| eyre!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl Simulator for HttpSimulator {
    async fn simulate(&self, request: &SimRequest) -> Result<SimResponse> {
        debug!(to = %request.to, "submitting dry run to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| eyre!("simulator request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(eyre!("simulator returned HTTP {status}"));
        }

        response
            .json::<SimResponse>()
            .await
            .map_err(|e| eyre!("simulator response did not match the boundary shape: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};

    #[test]
    fn test_request_serializes_boundary_shape() {
        let request = SimRequest {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            value: U256::from(5u64),
            data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
            gas: None,
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert!(encoded.get("from").is_some());
        assert!(encoded.get("to").is_some());
        assert!(encoded.get("value").is_some());
        assert!(encoded.get("data").is_some());
        // Unset gas stays off the wire
        assert!(encoded.get("gas").is_none());
    }

    #[test]
    fn test_client_construction() {
        let sim = HttpSimulator::new("http://localhost:8545/simulate", Duration::from_secs(5));
        assert!(sim.is_ok());
    }
}
