//! HTTP/WebSocket surface, auth, rate limiting, and bootstrap wiring for
//! the relay (C8/C9/C11).

pub mod auth;
pub mod http;
pub mod settings;
pub mod state;
pub mod tuner;
pub mod ws;

pub use auth::{ApiKeyStore, RateLimiter};
pub use settings::{Options, Settings};
pub use state::{ChainContext, RelayDataSource, RelayServerState};
