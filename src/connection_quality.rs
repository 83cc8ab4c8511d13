// =============================================================================
// Connection Quality Monitor — latency/SSL-driven reshaping with hysteresis
// =============================================================================
//
// Tracks round-trip latency to the exchange and TLS handshake failures, and
// classifies the connection into Good / Degraded / Poor. Quality is quick to
// degrade (a single bad sample is enough) but slow to recover — an upgrade
// only takes effect once `hysteresis_secs` have elapsed since the last
// downgrade, so a single good tick after a rough patch doesn't immediately
// reopen full-size trading.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Degraded,
    Poor,
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Degraded => write!(f, "degraded"),
            Self::Poor => write!(f, "poor"),
        }
    }
}

impl ConnectionQuality {
    /// Position-size multiplier to apply while in this quality state. Poor
    /// connections halt new entries entirely (existing positions still get
    /// managed).
    pub fn size_multiplier(self) -> f64 {
        match self {
            Self::Good => 1.0,
            Self::Degraded => 0.5,
            Self::Poor => 0.0,
        }
    }

    pub fn allows_new_entries(self) -> bool {
        !matches!(self, Self::Poor)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionQualityThresholds {
    pub degraded_latency_ms: u32,
    pub poor_latency_ms: u32,
    pub hysteresis_secs: u64,
}

impl From<&crate::runtime_config::ConnectionQualityConfig> for ConnectionQualityThresholds {
    fn from(c: &crate::runtime_config::ConnectionQualityConfig) -> Self {
        Self {
            degraded_latency_ms: c.degraded_latency_ms as u32,
            poor_latency_ms: c.poor_latency_ms as u32,
            hysteresis_secs: c.hysteresis_secs,
        }
    }
}

impl Default for ConnectionQualityThresholds {
    fn default() -> Self {
        Self {
            degraded_latency_ms: 250,
            poor_latency_ms: 750,
            hysteresis_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionQualitySnapshot {
    pub quality: ConnectionQuality,
    pub last_latency_ms: u32,
    pub ssl_error_count: u32,
    pub seconds_since_change: f64,
}

pub struct ConnectionQualityMonitor {
    thresholds: ConnectionQualityThresholds,
    last_latency_ms: AtomicU32,
    ssl_error_count: AtomicU32,
    state: RwLock<ConnectionQuality>,
    last_change_time: RwLock<Instant>,
}

impl ConnectionQualityMonitor {
    pub fn new(thresholds: ConnectionQualityThresholds) -> Self {
        Self {
            thresholds,
            last_latency_ms: AtomicU32::new(0),
            ssl_error_count: AtomicU32::new(0),
            state: RwLock::new(ConnectionQuality::Good),
            last_change_time: RwLock::new(Instant::now()),
        }
    }

    fn classify_latency(&self, latency_ms: u32) -> ConnectionQuality {
        if latency_ms >= self.thresholds.poor_latency_ms {
            ConnectionQuality::Poor
        } else if latency_ms >= self.thresholds.degraded_latency_ms {
            ConnectionQuality::Degraded
        } else {
            ConnectionQuality::Good
        }
    }

    /// Feed a new round-trip latency sample (e.g. WebSocket ping/pong RTT or
    /// REST call duration) and reclassify.
    pub fn record_latency(&self, latency_ms: u32) {
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        let candidate = self.classify_latency(latency_ms);
        self.apply_candidate(candidate);
    }

    /// Record a TLS handshake failure — forces at least Degraded
    /// immediately regardless of latency.
    pub fn record_ssl_error(&self) {
        self.ssl_error_count.fetch_add(1, Ordering::Relaxed);
        warn!("SSL/TLS handshake error recorded");
        self.apply_candidate(ConnectionQuality::Degraded);
    }

    fn apply_candidate(&self, candidate: ConnectionQuality) {
        let mut state = self.state.write();
        if candidate > *state {
            // Degrading — apply immediately.
            debug!(from = %*state, to = %candidate, "connection quality degraded");
            *state = candidate;
            *self.last_change_time.write() = Instant::now();
        } else if candidate < *state {
            // Recovering — only apply once the hysteresis window has passed.
            let elapsed = self.last_change_time.read().elapsed();
            if elapsed.as_secs() >= self.thresholds.hysteresis_secs {
                debug!(from = %*state, to = %candidate, elapsed_secs = elapsed.as_secs(), "connection quality recovered");
                *state = candidate;
                *self.last_change_time.write() = Instant::now();
            }
        }
    }

    pub fn current_quality(&self) -> ConnectionQuality {
        *self.state.read()
    }

    pub fn snapshot(&self) -> ConnectionQualitySnapshot {
        ConnectionQualitySnapshot {
            quality: *self.state.read(),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
            ssl_error_count: self.ssl_error_count.load(Ordering::Relaxed),
            seconds_since_change: self.last_change_time.read().elapsed().as_secs_f64(),
        }
    }
}

impl Default for ConnectionQualityMonitor {
    fn default() -> Self {
        Self::new(ConnectionQualityThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_latency_stays_good() {
        let monitor = ConnectionQualityMonitor::default();
        monitor.record_latency(50);
        assert_eq!(monitor.current_quality(), ConnectionQuality::Good);
    }

    #[test]
    fn high_latency_degrades_immediately() {
        let monitor = ConnectionQualityMonitor::default();
        monitor.record_latency(800);
        assert_eq!(monitor.current_quality(), ConnectionQuality::Poor);
    }

    #[test]
    fn ssl_error_forces_degraded() {
        let monitor = ConnectionQualityMonitor::default();
        monitor.record_ssl_error();
        assert_eq!(monitor.current_quality(), ConnectionQuality::Degraded);
    }

    #[test]
    fn recovery_blocked_within_hysteresis_window() {
        let monitor = ConnectionQualityMonitor::default();
        monitor.record_latency(800); // Poor
        monitor.record_latency(50); // candidate Good, but hysteresis blocks it
        assert_eq!(monitor.current_quality(), ConnectionQuality::Poor);
    }

    #[test]
    fn size_multiplier_reflects_quality() {
        assert_eq!(ConnectionQuality::Good.size_multiplier(), 1.0);
        assert_eq!(ConnectionQuality::Degraded.size_multiplier(), 0.5);
        assert_eq!(ConnectionQuality::Poor.size_multiplier(), 0.0);
        assert!(!ConnectionQuality::Poor.allows_new_entries());
    }
}
