// =============================================================================
// Acquisition — where candles come from (push stream or REST pull)
// =============================================================================

pub mod backfill;
pub mod controller;
pub mod error;
pub mod task_pool;

pub use backfill::{backfill, BackfillReport};
pub use controller::MarketDataController;
pub use error::MarketDataError;
pub use task_pool::BackgroundTasks;
