// WebSocket transport adapter: handshake FSM, join acks, and fan-out.

pub mod connection;
pub mod routes;

pub use routes::create_router;
