//! # Commands Module
//!
//! The four command handlers for ferry:
//!
//! ## `chat-server`
//! Runs the multi-client chat service:
//! - Accepts connections and spawns one handler per client
//! - Tracks connected users in a shared registry
//! - Relays each message to every other connected client
//!
//! ## `chat`
//! Interactive chat client:
//! - Sends the chosen username, then relays stdin lines to the server
//! - Prints incoming messages as they arrive
//!
//! ## `file-server`
//! Runs the file transfer service:
//! - Accepts framed uploads, one transfer per connection
//! - Verifies each upload against its SHA-256 digest before saving
//! - Optionally serves TLS given a certificate and key
//!
//! ## `send`
//! Uploads a single file:
//! - Frames the file as header, chunks, and a completion message
//! - Reports the server's verdict and the saved filename

pub mod chat;
pub mod chat_server;
pub mod file_server;
pub mod send;
