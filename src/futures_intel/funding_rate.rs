// =============================================================================
// Funding Rate — last settled rate from the premium index
// =============================================================================
//
// Positive funding means longs pay shorts. The snapshot only carries the raw
// `lastFundingRate`; a failed request degrades to 0.

use tracing::{debug, warn};

use crate::binance::BinanceClient;

/// Best-effort last funding rate for `symbol`.
pub async fn fetch_funding_rate(client: &BinanceClient, symbol: &str) -> f64 {
    match client.get_premium_index(symbol).await {
        Ok(index) => {
            debug!(
                symbol,
                funding_rate = index.last_funding_rate,
                mark_price = index.mark_price,
                "funding rate fetched"
            );
            index.last_funding_rate
        }
        Err(e) => {
            warn!(symbol, error = %e, "funding rate unavailable");
            0.0
        }
    }
}
