pub mod client;
pub mod error;
pub mod rate_limit;
pub mod stream;
pub mod transport;

pub use client::{BinanceClient, OpenInterestHistEntry, PremiumIndex, SymbolInfo, FUTURES_BASE_URL};
pub use error::BinanceError;
pub use stream::{CombinedStreamClient, StreamClient, FUTURES_STREAM_URL};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
