//! Network layer: TCP accept loop and per-connection tasks.

mod connection;
mod gateway;

pub use connection::spawn_connection;
pub use gateway::Gateway;
