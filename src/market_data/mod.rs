pub mod candle_buffer;
pub mod kline_stream;

// Re-export the Candle struct for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle_buffer::{Candle, CandleBuffer, CandleKey, UpsertOutcome};
pub use kline_stream::{decode_kline_message, run_stream_reader, KlineUpdate};
