//! File Demand Source - JSON Alert Demand Snapshot
//!
//! Reads a JSON array of demand records from disk on every call, so
//! edits take effect on the next reconcile cycle without a restart.
//! A missing or malformed file is an error; the reconciler then leaves
//! every live feed untouched.
//!
//! ```json
//! [
//!   { "venue": "bybit", "market": "spot", "symbols": ["BTCUSDT"],
//!     "alert_type": "price_cross", "selection_mode": "selected" }
//! ]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::ports::demand::{AlertDemand, DemandSource};

pub struct FileDemandSource {
    path: PathBuf,
}

impl FileDemandSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DemandSource for FileDemandSource {
    async fn active_demand(&self) -> Result<Vec<AlertDemand>> {
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read demand file: {}", self.path.display()))?;

        let records: Vec<AlertDemand> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse demand file: {}", self.path.display()))?;

        debug!(path = %self.path.display(), records = records.len(), "Demand loaded");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{Market, Venue};
    use crate::ports::demand::SelectionMode;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("venue-stream-{}-{name}", std::process::id()))
    }

    #[tokio::test]
    async fn test_reads_records_and_defaults_symbols() {
        let path = scratch("demand.json");
        fs::write(
            &path,
            r#"[
              {"venue":"okx","market":"futures","symbols":["BTC-USDT-SWAP"],
               "alert_type":"price_cross","selection_mode":"selected"},
              {"venue":"binance","market":"spot",
               "alert_type":"volatility","selection_mode":"all"}
            ]"#,
        )
        .await
        .unwrap();

        let records = FileDemandSource::new(&path).active_demand().await.unwrap();
        fs::remove_file(&path).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].venue, Venue::Okx);
        assert_eq!(records[0].market, Market::Futures);
        assert_eq!(records[1].selection_mode, SelectionMode::All);
        assert!(records[1].symbols.is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_files_error() {
        let missing = FileDemandSource::new(scratch("absent.json"));
        assert!(missing.active_demand().await.is_err());

        let path = scratch("broken.json");
        fs::write(&path, "{not json").await.unwrap();
        let err = FileDemandSource::new(&path).active_demand().await.unwrap_err();
        fs::remove_file(&path).await.unwrap();
        assert!(err.to_string().contains("parse"));
    }
}
