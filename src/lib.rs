//! roomcast library
//!
//! Core components of the room-based WebSocket fan-out relay: the HTTP/WS
//! boundary, the room registry and broadcast engine, and configuration.

pub mod api;
pub mod config;
pub mod ws;
