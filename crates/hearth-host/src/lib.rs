//! Host daemon for managed game-server rooms.
//!
//! The crate exposes the surface an HTTP/routing layer drives: the room
//! registry and per-room operations, the per-type artifact caches, and the
//! download-staging store backups are published through.

pub mod archive;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod notify;
pub mod profile;
pub mod registry;
pub mod room;
pub mod staging;
pub mod supervisor;
pub mod versions;
