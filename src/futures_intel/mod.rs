// =============================================================================
// Futures Intelligence Module
// =============================================================================
//
// Snapshot enrichment from the Binance Futures API: open interest (live plus
// 24h history) and the last funding rate. Both are best-effort; failures are
// logged and replaced with neutral values so a snapshot never fails on them.

pub mod funding_rate;
pub mod open_interest;

pub use funding_rate::fetch_funding_rate;
pub use open_interest::{fetch_open_interest_summary, OpenInterestSummary};
