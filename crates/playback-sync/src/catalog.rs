//! Track catalog collaborator.
//!
//! The catalog is an opaque JSON document fetched once per session:
//! `[{ "id": "...", "durationSec": 123.0 }, ...]`. A fetch failure is
//! recoverable, falling back to fixed assumed durations.

use std::time::Duration;

use tracing::{instrument, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::model::TrackInfo;

/// Fetch and parse the track list document.
#[instrument(skip(client), fields(url = %url))]
pub async fn fetch_catalog(
    client: &reqwest::Client,
    url: &Url,
    timeout: Duration,
) -> SyncResult<Vec<TrackInfo>> {
    let response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| SyncError::CatalogUnavailable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let tracks: Vec<TrackInfo> = response
        .json()
        .await
        .map_err(|e| SyncError::CatalogUnavailable(e.to_string()))?;

    if tracks.is_empty() {
        warn!("track catalog is empty");
    }
    Ok(tracks)
}
