//! Room-based WebSocket fan-out relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Clients                                │
//! │  One WebSocket connection each; envelopes in, envelopes out   │
//! └───────────────────────────────┬───────────────────────────────┘
//!                                 │ /ws, /ws/{room_id}
//! ┌───────────────────────────────▼───────────────────────────────┐
//! │                     Hub (room registry)                       │
//! │  room id -> Room, created on first join, removed when empty   │
//! └───────────────────────────────┬───────────────────────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//! ┌───────▼───────┐       ┌───────▼───────┐       ┌───────▼───────┐
//! │  Room actor   │       │  Room actor   │       │      ...      │
//! │  membership,  │       │               │       │               │
//! │  stage, fan-  │       │               │       │               │
//! │  out loop     │       │               │       │               │
//! └───────────────┘       └───────────────┘       └───────────────┘
//! ```
//!
//! Each connection runs two pump tasks (read, write) that talk to its room
//! only through message passing: inbound frames become room commands, and
//! the room fans broadcasts out to each member's bounded outbound queue.
//! A member that cannot drain its queue is evicted rather than ever
//! blocking the room.

mod connection;
mod handler;
mod hub;
mod room;
mod types;

pub use handler::{ws_handler, ws_room_handler};
pub use hub::Hub;
pub use room::{Member, RoomHandle};
pub use types::{
    CLIENT_LEFT_TYPE, ClientLeftPayload, ConnectionState, Envelope, SERVER_SENDER, STAGE_TYPE,
    StageGrid, StagePayload,
};
