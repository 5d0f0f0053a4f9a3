pub mod connection;
pub mod gateway;
pub mod handler;
pub mod types;

pub use connection::{ConnectionId, ConnectionManager, WsSender};
pub use gateway::Session;
pub use handler::ws_handler;
