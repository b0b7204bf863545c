pub mod chat;
pub mod commands;
pub mod integrity;
pub mod protocol;
pub mod registry;
pub mod transfer;
pub mod transport;

/// Fixed width of the serialized frame header region on the wire.
pub const HEADER_SIZE: usize = 1024;

/// Size of the file slices a sender packs into each CHUNK frame.
/// The receiver does not enforce this boundary.
pub const CHUNK_SIZE: usize = 4096;

pub const DEFAULT_CHAT_PORT: u16 = 8888;
pub const DEFAULT_TRANSFER_PORT: u16 = 9999;
