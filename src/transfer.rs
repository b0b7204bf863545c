use std::error::Error;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use log::{debug, info, warn};
use serde_json::json;
use tokio::fs;
use tokio::net::TcpListener;

use crate::integrity;
use crate::protocol::{self, Frame, Metadata, MsgType};
use crate::transport::{Acceptor, Stream};

/// Run the file transfer service on a pre-bound listener.
///
/// Each accepted connection gets its own handler task and its own transfer
/// session; concurrent transfers never share state. The storage directory
/// is created up front so handlers can assume it exists.
pub async fn serve(
    listener: TcpListener,
    storage_dir: PathBuf,
    acceptor: Acceptor,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    fs::create_dir_all(&storage_dir).await?;
    let acceptor = Arc::new(acceptor);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n[!] Shutting down server...");
                break;
            }
            accepted = listener.accept() => {
                // An accept error affects only the connection that failed;
                // the loop ends on interrupt alone.
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                info!("New transfer connection from: {}", addr);

                let acceptor = acceptor.clone();
                let storage_dir = storage_dir.clone();
                tokio::spawn(async move {
                    match acceptor.accept(socket).await {
                        Ok(stream) => handle_client(stream, addr, storage_dir).await,
                        Err(e) => warn!("transport handshake with {} failed: {}", addr, e),
                    }
                });
            }
        }
    }

    info!("File server shutdown complete");
    Ok(())
}

/// One in-progress upload. Chunks accumulate in memory and nothing touches
/// disk until the completion frame verifies.
struct Session {
    filename: String,
    declared_size: u64,
    declared_checksum: String,
    data: Vec<u8>,
    chunks: u64,
}

/// Per-connection transfer state machine.
///
/// Exactly one session per connection: a header frame opens it, chunk
/// frames fill it, the completion frame verifies and persists it. Any frame
/// arriving out of that order aborts the connection without a reply; only
/// the completion path ever answers the sender.
pub async fn handle_client(mut stream: Stream, addr: SocketAddr, storage_dir: PathBuf) {
    let mut session: Option<Session> = None;

    loop {
        let frame = match protocol::read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("{} closed the connection", addr);
                break;
            }
            Err(e) => {
                warn!("bad frame from {}: {}", addr, e);
                break;
            }
        };

        match frame.msg_type {
            MsgType::FileHeader => {
                if session.is_some() {
                    warn!("{} sent a second file header mid-transfer, closing", addr);
                    break;
                }
                match open_session(&frame) {
                    Some(sess) => {
                        info!(
                            "Receiving '{}' ({} bytes) from {}",
                            sess.filename, sess.declared_size, addr
                        );
                        debug!("declared digest: {}", sess.declared_checksum);
                        println!("[+] Receiving '{}' from {}", sess.filename, addr);
                        session = Some(sess);
                    }
                    None => {
                        warn!("{} sent a file header with missing metadata, closing", addr);
                        break;
                    }
                }
            }
            MsgType::FileChunk => {
                let Some(sess) = session.as_mut() else {
                    warn!("{} sent a chunk before any file header, closing", addr);
                    break;
                };
                sess.data.extend_from_slice(&frame.payload);
                sess.chunks += 1;
                debug!(
                    "chunk {} from {}: {} bytes ({} total)",
                    sess.chunks,
                    addr,
                    frame.payload.len(),
                    sess.data.len()
                );
            }
            MsgType::FileComplete => {
                let Some(sess) = session.take() else {
                    warn!("{} sent completion before any file header, closing", addr);
                    break;
                };
                finish_transfer(&mut stream, sess, &frame, &storage_dir, addr).await;
                break;
            }
            other => {
                warn!("{} sent unexpected message type {:?}, closing", addr, other);
                break;
            }
        }
    }
}

/// Validate a file header frame's metadata into a fresh session.
fn open_session(frame: &Frame) -> Option<Session> {
    let filename = frame.metadata.get("filename")?.as_str()?.to_string();
    let declared_size = frame.metadata.get("filesize")?.as_u64()?;
    let declared_checksum = frame.metadata.get("checksum")?.as_str()?.to_string();

    Some(Session {
        filename,
        declared_size,
        declared_checksum,
        data: Vec::with_capacity(declared_size as usize),
        chunks: 0,
    })
}

/// Verify the accumulated bytes against the sender's digest, persist on a
/// match, and send the verdict back. The digest that counts is the one
/// carried by the completion frame; a completion without one never
/// verifies. The file header's digest is informational only.
async fn finish_transfer(
    stream: &mut Stream,
    session: Session,
    complete: &Frame,
    storage_dir: &Path,
    addr: SocketAddr,
) {
    let expected = complete.metadata.get("checksum").and_then(|v| v.as_str());

    let actual = integrity::digest(&session.data);
    if expected != Some(actual.as_str()) {
        warn!(
            "checksum mismatch for '{}' from {}: expected {:?}, got {}",
            session.filename, addr, expected, actual
        );
        println!("[!] Checksum mismatch for '{}'", session.filename);
        let reply = protocol::write_frame(
            stream,
            MsgType::FileComplete,
            b"ERROR: Checksum mismatch",
            Metadata::new(),
        )
        .await;
        if let Err(e) = reply {
            debug!("failed to send mismatch reply to {}: {}", addr, e);
        }
        return;
    }

    let saved_as = match persist(storage_dir, &session.filename, &session.data).await {
        Ok(name) => name,
        Err(e) => {
            warn!("failed to persist '{}': {}", session.filename, e);
            let reply = protocol::write_frame(
                stream,
                MsgType::FileComplete,
                b"ERROR: Could not save file",
                Metadata::new(),
            )
            .await;
            if let Err(e) = reply {
                debug!("failed to send save-error reply to {}: {}", addr, e);
            }
            return;
        }
    };

    info!(
        "Saved '{}' as '{}' ({} bytes, {} chunks)",
        session.filename,
        saved_as,
        session.data.len(),
        session.chunks
    );
    println!("[+] File saved: {}", saved_as);

    let mut metadata = Metadata::new();
    metadata.insert("saved_as".to_string(), json!(saved_as));
    let reply = protocol::write_frame(stream, MsgType::FileComplete, b"SUCCESS", metadata).await;
    if let Err(e) = reply {
        debug!("failed to send success reply to {}: {}", addr, e);
    }
}

/// Write verified bytes under a timestamped name and return that name.
///
/// The client-supplied name is reduced to its final path component, so a
/// name like `../../etc/passwd` cannot escape the storage directory.
async fn persist(storage_dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<String> {
    let base = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    let saved_as = format!("{}_{}", Local::now().format("%Y%m%d_%H%M%S"), base);
    fs::write(storage_dir.join(&saved_as), data).await?;
    Ok(saved_as)
}
