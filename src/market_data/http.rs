// Shared GET-and-decode path for the REST adapters.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{MarketDataError, MarketResult};
use crate::telemetry::{REST_FAILURES, REST_REQUESTS};

pub(crate) fn build_client(timeout: Duration) -> MarketResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("cryptodash/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?)
}

/// Send `request`, map non-2xx to `Http`, decode the body as JSON.
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    endpoint: &'static str,
) -> MarketResult<T> {
    let start = Instant::now();
    metrics::counter!(REST_REQUESTS, "endpoint" => endpoint).increment(1);

    let response = request.send().await.map_err(|e| {
        metrics::counter!(REST_FAILURES, "endpoint" => endpoint).increment(1);
        warn!(endpoint, error = %e, "REST request network error");
        MarketDataError::Network(e)
    })?;

    let status = response.status();
    if !status.is_success() {
        metrics::counter!(REST_FAILURES, "endpoint" => endpoint).increment(1);
        let url = response.url().to_string();
        warn!(
            endpoint,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "REST request failed"
        );
        return Err(MarketDataError::Http { status: status.as_u16(), url });
    }

    let body = response.bytes().await?;
    let parsed = serde_json::from_slice::<T>(&body).map_err(|e| {
        metrics::counter!(REST_FAILURES, "endpoint" => endpoint).increment(1);
        warn!(endpoint, error = %e, "REST response did not decode");
        MarketDataError::Decode(e)
    })?;

    debug!(
        endpoint,
        bytes = body.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "REST request ok"
    );
    Ok(parsed)
}
