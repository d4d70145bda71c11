mod request;
mod response;
mod udp;

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use url::Url;

use crate::bencoding::Value;

pub use request::{AnnounceRequest, Event};
pub use response::TrackerResponse;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Announces to a single tracker, HTTP(S) or UDP depending on the URL scheme.
pub async fn announce(
    client: &reqwest::Client,
    tracker: &Url,
    request: &AnnounceRequest,
) -> Result<TrackerResponse> {
    match tracker.scheme() {
        "http" | "https" => announce_http(client, tracker, request).await,
        "udp" => udp::announce(tracker, request).await,
        other => bail!("unsupported tracker scheme '{}'", other),
    }
}

async fn announce_http(
    client: &reqwest::Client,
    tracker: &Url,
    request: &AnnounceRequest,
) -> Result<TrackerResponse> {
    let response = client
        .get(request.url(tracker))
        .timeout(HTTP_TIMEOUT)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(anyhow!("server returned status {}", response.status()));
    }
    let body = response.bytes().await?;
    TrackerResponse::try_from(Value::from_bytes(&body)?)
}
