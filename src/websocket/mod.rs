pub mod connection;
pub mod handler;
pub mod handshake;
pub mod types;

pub use connection::{ConnectionId, ConnectionRegistry, ConnectionState, Delivery, WsSender};
pub use handler::ws_handler;
pub use handshake::{bearer_token, token_from_query, TokenSources};
pub use types::{ClientEvent, ServerEvent};
