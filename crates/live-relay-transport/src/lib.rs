//! Session bridge and HTTP surface of the live relay.
//!
//! Provides:
//! - `Relay` - pumps one browser websocket to one live session
//! - `create_relay_router` - the client page plus the `/live` upgrade route

pub mod relay;
pub mod websocket;

pub use relay::{Relay, RelayError, RelayExit, RelayOptions};
pub use websocket::{LIVE_PATH, create_relay_router};
