// =============================================================================
// Position Registry — Pending / Open / Closing / Closed state machine
// =============================================================================
//
// Life-cycle:
//
//   Pending  ->  Open      (entry order filled, confirm_open)
//   Pending  ->  Closed    (entry order failed/cancelled, cancel_pending)
//   Open     ->  Closing   (exit initiated, begin_close — CAS, at most one
//                           caller wins per position)
//   Closing  ->  Closed    (exit order filled, finalize_close)
//
// `begin_close` is the at-most-once guarantee: two exit paths can race on the
// same position (e.g. a stop-loss tick and a lifecycle-manager tick firing in
// the same instant) and only one will observe the CAS succeed. The loser gets
// `None` back and must not submit a second close order.
//
// Each symbol may hold at most one live (Pending or Open) position at a time;
// `create_pending` is serialized per-symbol via `symbol_locks` to make that
// check-then-insert atomic across concurrent entry attempts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::Side;

// =============================================================================
// PositionState
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    Pending,
    Open,
    Closing,
    Closed,
}

impl PositionState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// PositionRecord
// =============================================================================

/// A single tracked position. Immutable fields are plain values; fields that
/// mutate over the position's life sit behind locks so a read-only snapshot
/// (`PositionSnapshot`) can be cloned out without holding the registry lock.
pub struct PositionRecord {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub leverage: u32,
    pub opened_at: String,

    state: AtomicU8,
    entry_price: RwLock<f64>,
    quantity: RwLock<f64>,
    stop_loss: RwLock<f64>,
    take_profit_1: RwLock<f64>,
    take_profit_2: RwLock<f64>,
    trailing_stop: RwLock<Option<f64>>,
    highest_price: RwLock<f64>,
    current_price: RwLock<f64>,
    unrealized_pnl: RwLock<f64>,
    unrealized_pnl_pct: RwLock<f64>,
    realized_pnl: RwLock<f64>,
    closed_at: RwLock<Option<String>>,
    close_reason: RwLock<Option<String>>,
}

impl PositionRecord {
    pub fn state(&self) -> PositionState {
        PositionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Compare-and-swap the state. Returns true if this call performed the
    /// transition, false if another caller already moved the state away from
    /// `from` (or it was never in `from` to begin with).
    fn try_transition(&self, from: PositionState, to: PositionState) -> bool {
        self.state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn entry_price(&self) -> f64 {
        *self.entry_price.read()
    }

    pub fn quantity(&self) -> f64 {
        *self.quantity.read()
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            id: self.id.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            entry_price: *self.entry_price.read(),
            quantity: *self.quantity.read(),
            leverage: self.leverage,
            state: self.state(),
            stop_loss: *self.stop_loss.read(),
            take_profit_1: *self.take_profit_1.read(),
            take_profit_2: *self.take_profit_2.read(),
            trailing_stop: *self.trailing_stop.read(),
            highest_price: *self.highest_price.read(),
            current_price: *self.current_price.read(),
            unrealized_pnl: *self.unrealized_pnl.read(),
            unrealized_pnl_pct: *self.unrealized_pnl_pct.read(),
            realized_pnl: *self.realized_pnl.read(),
            opened_at: self.opened_at.clone(),
            closed_at: self.closed_at.read().clone(),
            close_reason: self.close_reason.read().clone(),
        }
    }
}

/// Read-only, serializable snapshot of a [`PositionRecord`] at a point in
/// time. This is what the API layer and journal persistence consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub state: PositionState,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub trailing_stop: Option<f64>,
    pub highest_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    pub realized_pnl: f64,
    pub opened_at: String,
    pub closed_at: Option<String>,
    pub close_reason: Option<String>,
}

// =============================================================================
// PositionRegistry
// =============================================================================

pub struct PositionRegistry {
    positions: RwLock<HashMap<String, Arc<PositionRecord>>>,
    symbol_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            symbol_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for_symbol(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.symbol_locks
            .lock()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// True if `symbol` already has a live (pending or open) position.
    pub fn has_live_position(&self, symbol: &str) -> bool {
        self.positions
            .read()
            .values()
            .any(|p| p.symbol == symbol && matches!(p.state(), PositionState::Pending | PositionState::Open))
    }

    // -------------------------------------------------------------------------
    // Pending -> Open
    // -------------------------------------------------------------------------

    /// Reserve a pending slot for `symbol`. Returns `None` if the symbol
    /// already has a live position — the per-symbol lock makes the
    /// check-then-insert atomic against concurrent entry attempts.
    pub fn create_pending(
        &self,
        symbol: &str,
        side: Side,
        requested_qty: f64,
        leverage: u32,
    ) -> Option<Arc<PositionRecord>> {
        let guard = self.lock_for_symbol(symbol);
        let _held = guard.lock();

        if self.has_live_position(symbol) {
            debug!(symbol, "create_pending rejected: symbol already has a live position");
            return None;
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let record = Arc::new(PositionRecord {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            leverage,
            opened_at: now,
            state: AtomicU8::new(PositionState::Pending.to_u8()),
            entry_price: RwLock::new(0.0),
            quantity: RwLock::new(requested_qty),
            stop_loss: RwLock::new(0.0),
            take_profit_1: RwLock::new(0.0),
            take_profit_2: RwLock::new(0.0),
            trailing_stop: RwLock::new(None),
            highest_price: RwLock::new(0.0),
            current_price: RwLock::new(0.0),
            unrealized_pnl: RwLock::new(0.0),
            unrealized_pnl_pct: RwLock::new(0.0),
            realized_pnl: RwLock::new(0.0),
            closed_at: RwLock::new(None),
            close_reason: RwLock::new(None),
        });

        self.positions.write().insert(id.clone(), record.clone());
        info!(id = %id, symbol, side = %side, requested_qty, leverage, "position reserved (pending)");
        Some(record)
    }

    /// Confirm a pending position as filled. Fixes the entry price/quantity
    /// reported by the exchange and installs the initial SL/TP levels.
    pub fn confirm_open(
        &self,
        id: &str,
        entry_price: f64,
        filled_qty: f64,
        stop_loss: f64,
        take_profit_1: f64,
        take_profit_2: f64,
    ) -> bool {
        let Some(record) = self.positions.read().get(id).cloned() else {
            return false;
        };

        if !record.try_transition(PositionState::Pending, PositionState::Open) {
            warn!(id, "confirm_open called on non-pending position");
            return false;
        }

        *record.entry_price.write() = entry_price;
        *record.quantity.write() = filled_qty;
        *record.stop_loss.write() = stop_loss;
        *record.take_profit_1.write() = take_profit_1;
        *record.take_profit_2.write() = take_profit_2;
        *record.highest_price.write() = entry_price;
        *record.current_price.write() = entry_price;

        info!(id, entry_price, filled_qty, stop_loss, take_profit_1, take_profit_2, "position opened");
        true
    }

    /// Remove a pending position that never got filled (entry order failed,
    /// was cancelled, or the admission gate changed its mind mid-flight).
    pub fn cancel_pending(&self, id: &str, reason: &str) -> bool {
        let Some(record) = self.positions.read().get(id).cloned() else {
            return false;
        };
        if !record.try_transition(PositionState::Pending, PositionState::Closed) {
            return false;
        }
        *record.close_reason.write() = Some(reason.to_string());
        *record.closed_at.write() = Some(Utc::now().to_rfc3339());
        info!(id, reason, "pending position cancelled");
        true
    }

    // -------------------------------------------------------------------------
    // Price updates
    // -------------------------------------------------------------------------

    /// Update bookkeeping (unrealised PnL, highest/lowest price, trailing
    /// stop) for every open position on `symbol`. Exit *decisions* live in
    /// the lifecycle manager, which reads these fields back out.
    pub fn update_price(&self, symbol: &str, current_price: f64, trailing_stop_pct: f64) {
        let positions = self.positions.read();
        for record in positions.values().filter(|p| p.symbol == symbol && p.state() == PositionState::Open) {
            *record.current_price.write() = current_price;

            let entry_price = record.entry_price();
            let quantity = record.quantity();
            let direction = record.side.sign();
            let pnl = direction * (current_price - entry_price) * quantity;
            *record.unrealized_pnl.write() = pnl;
            *record.unrealized_pnl_pct.write() = if entry_price > 0.0 {
                direction * ((current_price - entry_price) / entry_price) * 100.0
            } else {
                0.0
            };

            let mut highest = record.highest_price.write();
            let favorable_move = match record.side {
                Side::Long => current_price > *highest,
                Side::Short => current_price < *highest || *highest == entry_price,
            };
            if favorable_move {
                *highest = current_price;
                let trail = match record.side {
                    Side::Long => *highest * (1.0 - trailing_stop_pct),
                    Side::Short => *highest * (1.0 + trailing_stop_pct),
                };
                *record.trailing_stop.write() = Some(trail);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Open -> Closing -> Closed
    // -------------------------------------------------------------------------

    /// Attempt to claim exclusive rights to close `id`. This is the
    /// at-most-once guarantee: only one caller will ever receive `Some`.
    pub fn begin_close(&self, id: &str) -> Option<Arc<PositionRecord>> {
        let record = self.positions.read().get(id).cloned()?;
        if record.try_transition(PositionState::Open, PositionState::Closing) {
            Some(record)
        } else {
            None
        }
    }

    /// Complete a close previously claimed via `begin_close`. Returns the
    /// total realised PnL.
    pub fn finalize_close(&self, id: &str, close_price: f64, reason: &str, fees_paid: f64) -> Option<f64> {
        let record = self.positions.read().get(id).cloned()?;
        if !record.try_transition(PositionState::Closing, PositionState::Closed) {
            warn!(id, "finalize_close called on a position that was not in closing state");
            return None;
        }

        let direction = record.side.sign();
        let gross_pnl = direction * (close_price - record.entry_price()) * record.quantity();
        let net_pnl = gross_pnl - fees_paid;

        *record.realized_pnl.write() = net_pnl;
        *record.current_price.write() = close_price;
        *record.unrealized_pnl.write() = 0.0;
        *record.unrealized_pnl_pct.write() = 0.0;
        *record.closed_at.write() = Some(Utc::now().to_rfc3339());
        *record.close_reason.write() = Some(reason.to_string());

        info!(id, reason, close_price, gross_pnl, fees_paid, net_pnl, "position closed");
        Some(net_pnl)
    }

    /// Release the per-symbol slot immediately after finalize_close — call
    /// once the caller is certain no further reads of this record are
    /// pending so the registry doesn't grow unbounded.
    pub fn evict_closed(&self, id: &str) {
        let mut positions = self.positions.write();
        if let Some(record) = positions.get(id) {
            if record.state() == PositionState::Closed {
                positions.remove(id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get_open_positions(&self) -> Vec<PositionSnapshot> {
        self.positions
            .read()
            .values()
            .filter(|p| p.state() == PositionState::Open)
            .map(|p| p.snapshot())
            .collect()
    }

    pub fn get_pending_positions(&self) -> Vec<PositionSnapshot> {
        self.positions
            .read()
            .values()
            .filter(|p| p.state() == PositionState::Pending)
            .map(|p| p.snapshot())
            .collect()
    }

    pub fn get_record(&self, id: &str) -> Option<Arc<PositionRecord>> {
        self.positions.read().get(id).cloned()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.read().values().filter(|p| p.state() == PositionState::Open).count()
    }
}

impl Default for PositionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let positions = self.positions.read();
        let open = positions.values().filter(|p| p.state() == PositionState::Open).count();
        let pending = positions.values().filter(|p| p.state() == PositionState::Pending).count();
        f.debug_struct("PositionRegistry")
            .field("open", &open)
            .field("pending", &pending)
            .field("total_tracked", &positions.len())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_then_open_lifecycle() {
        let registry = PositionRegistry::new();
        let record = registry.create_pending("BTC-USDT-SWAP", Side::Long, 0.01, 10).unwrap();
        assert_eq!(record.state(), PositionState::Pending);

        let ok = registry.confirm_open(&record.id, 50000.0, 0.01, 49000.0, 51000.0, 52000.0);
        assert!(ok);
        assert_eq!(record.state(), PositionState::Open);
        assert_eq!(registry.open_position_count(), 1);
    }

    #[test]
    fn duplicate_symbol_rejected_while_live() {
        let registry = PositionRegistry::new();
        let first = registry.create_pending("BTC-USDT-SWAP", Side::Long, 0.01, 10);
        assert!(first.is_some());
        let second = registry.create_pending("BTC-USDT-SWAP", Side::Short, 0.01, 10);
        assert!(second.is_none());
    }

    #[test]
    fn new_symbol_slot_after_cancel() {
        let registry = PositionRegistry::new();
        let record = registry.create_pending("BTC-USDT-SWAP", Side::Long, 0.01, 10).unwrap();
        assert!(registry.cancel_pending(&record.id, "entry_rejected"));
        let retry = registry.create_pending("BTC-USDT-SWAP", Side::Long, 0.01, 10);
        assert!(retry.is_some());
    }

    #[test]
    fn begin_close_is_at_most_once() {
        let registry = PositionRegistry::new();
        let record = registry.create_pending("BTC-USDT-SWAP", Side::Long, 0.01, 10).unwrap();
        registry.confirm_open(&record.id, 50000.0, 0.01, 49000.0, 51000.0, 52000.0);

        let first_claim = registry.begin_close(&record.id);
        let second_claim = registry.begin_close(&record.id);
        assert!(first_claim.is_some());
        assert!(second_claim.is_none());
    }

    #[test]
    fn finalize_close_computes_pnl_for_long() {
        let registry = PositionRegistry::new();
        let record = registry.create_pending("BTC-USDT-SWAP", Side::Long, 1.0, 10).unwrap();
        registry.confirm_open(&record.id, 100.0, 1.0, 90.0, 110.0, 120.0);
        registry.begin_close(&record.id).unwrap();

        let pnl = registry.finalize_close(&record.id, 110.0, "take_profit", 0.5).unwrap();
        assert!((pnl - 9.5).abs() < 1e-9);
        assert_eq!(record.state(), PositionState::Closed);
    }

    #[test]
    fn finalize_close_computes_pnl_for_short() {
        let registry = PositionRegistry::new();
        let record = registry.create_pending("BTC-USDT-SWAP", Side::Short, 1.0, 10).unwrap();
        registry.confirm_open(&record.id, 100.0, 1.0, 110.0, 90.0, 80.0);
        registry.begin_close(&record.id).unwrap();

        let pnl = registry.finalize_close(&record.id, 90.0, "take_profit", 0.2).unwrap();
        assert!((pnl - 9.8).abs() < 1e-9);
    }

    #[test]
    fn update_price_tracks_trailing_stop_for_long() {
        let registry = PositionRegistry::new();
        let record = registry.create_pending("BTC-USDT-SWAP", Side::Long, 1.0, 10).unwrap();
        registry.confirm_open(&record.id, 100.0, 1.0, 90.0, 110.0, 120.0);

        registry.update_price("BTC-USDT-SWAP", 105.0, 0.01);
        let snap = record.snapshot();
        assert!((snap.highest_price - 105.0).abs() < 1e-9);
        assert!(snap.trailing_stop.unwrap() < 105.0);
    }

    #[test]
    fn evict_closed_removes_from_registry() {
        let registry = PositionRegistry::new();
        let record = registry.create_pending("BTC-USDT-SWAP", Side::Long, 1.0, 10).unwrap();
        registry.confirm_open(&record.id, 100.0, 1.0, 90.0, 110.0, 120.0);
        registry.begin_close(&record.id).unwrap();
        registry.finalize_close(&record.id, 110.0, "take_profit", 0.0).unwrap();

        registry.evict_closed(&record.id);
        assert!(registry.get_record(&record.id).is_none());
    }
}
