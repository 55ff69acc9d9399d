//! Owning containers used by the engine.
//!
//! Sockets and their control blocks refer to each other by key, never by reference. The arena
//! here hands out keys that detect reuse of a slot after its element was removed, so a stale
//! handle held by the application or a parent socket is caught instead of aliasing a newer socket.
pub mod slotmap;

pub use self::slotmap::{Key, SlotMap};
