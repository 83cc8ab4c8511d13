// =============================================================================
// Trade Journal — CSV persistence for closed positions
// =============================================================================
//
// Every closed position is appended as one row to a CSV file on disk so the
// dashboard's journal stats survive a restart and an operator can open the
// file directly in a spreadsheet. The writer opens in append mode and writes
// the header only when the file doesn't exist yet.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::position_registry::PositionSnapshot;

#[derive(Debug, Clone, Serialize)]
struct JournalRow<'a> {
    id: &'a str,
    symbol: &'a str,
    side: String,
    entry_price: f64,
    close_price: f64,
    quantity: f64,
    leverage: u32,
    realized_pnl: f64,
    unrealized_pnl_pct: f64,
    opened_at: &'a str,
    closed_at: &'a str,
    close_reason: &'a str,
}

pub struct TradeJournal {
    path: String,
}

impl TradeJournal {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Append one closed position as a row. No-ops with an error if the
    /// position is not actually closed, since a partial row would corrupt
    /// downstream aggregate stats.
    pub fn record_close(&self, snapshot: &PositionSnapshot) -> Result<()> {
        let closed_at = snapshot
            .closed_at
            .as_deref()
            .context("cannot journal a position with no closed_at timestamp")?;

        let row = JournalRow {
            id: &snapshot.id,
            symbol: &snapshot.symbol,
            side: snapshot.side.to_string(),
            entry_price: snapshot.entry_price,
            close_price: snapshot.current_price,
            quantity: snapshot.quantity,
            leverage: snapshot.leverage,
            realized_pnl: snapshot.realized_pnl,
            unrealized_pnl_pct: snapshot.unrealized_pnl_pct,
            opened_at: &snapshot.opened_at,
            closed_at,
            close_reason: snapshot.close_reason.as_deref().unwrap_or(""),
        };

        let file_exists = Path::new(&self.path).exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open trade journal at {}", self.path))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);
        writer.serialize(row).context("failed to serialize journal row")?;
        writer.flush().context("failed to flush trade journal")?;
        Ok(())
    }

    /// Read every row currently on disk. Used at startup to warm the
    /// dashboard's aggregate stats without waiting for the next close.
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        if !Path::new(&self.path).exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("failed to open trade journal at {}", self.path))?;
        let mut rows = Vec::new();
        for result in reader.deserialize() {
            let record: JournalRecord = result.context("failed to parse journal row")?;
            rows.push(record);
        }
        Ok(rows)
    }
}

/// Owned counterpart of `JournalRow` for reading rows back.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct JournalRecord {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    pub close_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub realized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    pub opened_at: String,
    pub closed_at: String,
    pub close_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position_registry::PositionRegistry;
    use crate::types::Side;

    fn tmp_path(name: &str) -> String {
        format!("/tmp/scalp_engine_journal_test_{name}.csv")
    }

    #[test]
    fn record_close_then_read_all_roundtrips() {
        let path = tmp_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        let positions = PositionRegistry::new();
        let record = positions.create_pending("BTC-USDT-SWAP", Side::Long, 1.0, 5).unwrap();
        positions.confirm_open(&record.id, 100.0, 1.0, 98.0, 103.0, 106.0);
        let closed = positions.begin_close(&record.id).unwrap();
        positions.finalize_close(&record.id, 105.0, "take_profit", 0.05);
        let snapshot = closed.snapshot();

        let journal = TradeJournal::new(&path);
        journal.record_close(&snapshot).unwrap();
        journal.record_close(&snapshot).unwrap();

        let rows = journal.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].symbol, "BTC-USDT-SWAP");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn read_all_on_missing_file_returns_empty() {
        let path = tmp_path("missing");
        let _ = std::fs::remove_file(&path);
        let journal = TradeJournal::new(&path);
        assert!(journal.read_all().unwrap().is_empty());
    }

    #[test]
    fn record_close_rejects_unclosed_position() {
        let positions = PositionRegistry::new();
        let record = positions.create_pending("ETH-USDT-SWAP", Side::Long, 1.0, 5).unwrap();
        positions.confirm_open(&record.id, 100.0, 1.0, 98.0, 103.0, 106.0);
        let snapshot = record.snapshot();

        let journal = TradeJournal::new(tmp_path("rejects"));
        assert!(journal.record_close(&snapshot).is_err());
    }
}
