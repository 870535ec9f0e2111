// =============================================================================
// Request-weight tracker — watches futures API usage during bulk pulls
// =============================================================================
//
// USDⓈ-M futures allow 2400 request weight per minute per IP. A full backfill
// of every perpetual (4 kline pulls per symbol) gets close to that, so the
// REST client feeds `X-MBX-USED-WEIGHT-1M` from every response into this
// tracker and it warns once usage crosses the threshold.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};

use reqwest::header::HeaderMap;
use tracing::{debug, warn};

/// Per-minute weight allowance on the futures API.
pub const WEIGHT_LIMIT_1M: u32 = 2400;
/// Usage at which a warning is emitted.
const WEIGHT_WARN_THRESHOLD: u32 = 1800;

/// Lock-free tracker of the last reported request weight.
#[derive(Default)]
pub struct WeightTracker {
    used_weight_1m: AtomicU32,
}

impl WeightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the weight reported by a response, if the header is present.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        let Some(weight) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };

        let prev = self.used_weight_1m.swap(weight, Ordering::Relaxed);
        if weight >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = weight,
                limit = WEIGHT_LIMIT_1M,
                "request weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = weight, "request weight updated from header");
    }

    /// Last weight reported by the exchange.
    pub fn used_weight(&self) -> u32 {
        self.used_weight_1m.load(Ordering::Relaxed)
    }

    /// Weight still available in the current minute.
    pub fn headroom(&self) -> u32 {
        WEIGHT_LIMIT_1M.saturating_sub(self.used_weight())
    }
}

impl std::fmt::Debug for WeightTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightTracker")
            .field("used_weight_1m", &self.used_weight())
            .finish()
    }
}
