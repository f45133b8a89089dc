//! Domain types: raw bridge payloads, normalized entities and events.

mod entities;
mod events;
mod payload;

pub use entities::*;
pub use events::*;
pub use payload::*;
