use chrono::Local;
use std::path::Path;
use tracing::{info, warn};

use super::session::ZabbixSession;
use crate::alert::COMPACT_TIME_FORMAT;
use crate::error::{RelayError, Result};

/// Rendering parameters for `chart.php`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartOptions {
    pub height: u32,
    pub width: u32,
    /// Window length in seconds, ending now.
    pub period: u64,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            height: 100,
            width: 450,
            period: 3600,
        }
    }
}

impl ChartOptions {
    fn form(&self, item_id: &str, stime: String) -> Vec<(&'static str, String)> {
        vec![
            ("itemids[]", item_id.to_string()),
            ("height", self.height.to_string()),
            ("width", self.width.to_string()),
            ("period", self.period.to_string()),
            ("stime", stime),
        ]
    }
}

/// Render the item's graph over the last `period` seconds and write the image
/// to `dest`, replacing any existing file. Returns the number of bytes written.
pub async fn fetch_chart(
    session: &ZabbixSession,
    chart_url: &str,
    item_id: &str,
    dest: &Path,
    options: ChartOptions,
) -> Result<usize> {
    // The window always ends now, not at the alarm time.
    let stime = Local::now().format(COMPACT_TIME_FORMAT).to_string();

    let resp = session
        .http()
        .post(chart_url)
        .form(&options.form(item_id, stime))
        .send()
        .await
        .map_err(|e| RelayError::transport(format!("Chart request to {} failed", chart_url), e))?;

    let status = resp.status();
    if !status.is_success() {
        warn!(item_id = %item_id, status = %status, "Chart endpoint returned non-success status");
    }

    let image = resp
        .bytes()
        .await
        .map_err(|e| RelayError::transport("Failed to read chart image", e))?;

    tokio::fs::write(dest, &image)
        .await
        .map_err(|e| RelayError::filesystem("Failed to write chart image", dest, e))?;

    info!(item_id = %item_id, bytes = image.len(), path = %dest.display(), "Chart saved");
    Ok(image.len())
}
