use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Local;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::registry::Registry;
use crate::transport::{Acceptor, Stream};

/// Upper bound of a single message read. One read is one message; the
/// protocol relies on stream delivery boundaries rather than framing.
const MESSAGE_BUFFER_SIZE: usize = 4096;

/// Run the chat service on a pre-bound listener.
///
/// # Overview
/// The accept loop:
/// 1. Accepts connections indefinitely
/// 2. Applies the transport strategy (plain or TLS) to each socket
/// 3. Spawns one handler task per connection; the loop never waits on them
/// 4. On interrupt, stops accepting and closes all registered connections;
///    in-flight handlers wind down on their own
pub async fn serve(listener: TcpListener, acceptor: Acceptor) -> Result<(), Box<dyn Error + Send + Sync>> {
    let registry = Arc::new(Registry::new());
    let acceptor = Arc::new(acceptor);
    let mut next_id: u64 = 0;

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
                next_id += 1;
                let id = next_id;
                info!("New client connection from: {}", addr);

                let acceptor = acceptor.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    match acceptor.accept(socket).await {
                        Ok(stream) => handle_client(id, stream, addr, registry).await,
                        Err(e) => warn!("transport handshake with {} failed: {}", addr, e),
                    }
                });
            }
        }
    }

    drop(listener);
    registry.close_all().await;
    info!("Chat server shutdown complete");
    Ok(())
}

/// Per-connection chat logic.
///
/// The first line from the peer is its display name; everything after is a
/// chat message relayed to all other registered connections. The write half
/// lives in the registry for the connection's lifetime so any handler can
/// broadcast to it.
pub async fn handle_client(id: u64, stream: Stream, addr: SocketAddr, registry: Arc<Registry>) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    // Identity line. An empty name means close without registering.
    let mut username = String::new();
    let mut line_buf = [0u8; MESSAGE_BUFFER_SIZE];
    match reader.read(&mut line_buf).await {
        Ok(0) | Err(_) => return,
        Ok(n) => username.push_str(&String::from_utf8_lossy(&line_buf[..n])),
    }
    let username = username.trim().to_string();
    if username.is_empty() {
        debug!("connection {} sent no username, closing", addr);
        return;
    }

    // Private welcome goes out before the write half moves into the
    // registry; the count includes the user about to be registered.
    let online = registry.count().await + 1;
    let welcome = format!("Welcome to the chat, {}!\nUsers online: {}\n", username, online);
    if write_half.write_all(welcome.as_bytes()).await.is_err() {
        return;
    }
    let _ = write_half.flush().await;

    if let Err(e) = registry.register(id, &username, write_half).await {
        warn!("failed to register {}: {}", username, e);
        return;
    }

    println!("[+] User '{}' joined from {}", username, addr);
    registry
        .broadcast(&format!("*** {} has joined the chat ***", username), Some(id))
        .await;

    // Relay loop. One read is one message; a zero-length read is a clean
    // close. No read timeout, a silent peer holds its task.
    let mut buf = vec![0u8; MESSAGE_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                // Relayed verbatim; the server does not reshape messages.
                let text = String::from_utf8_lossy(&buf[..n]);
                let timestamp = Local::now().format("%H:%M:%S");
                let message = format!("[{}] {}: {}", timestamp, username, text);
                println!("{}", message);
                registry.broadcast(&message, Some(id)).await;
            }
            Err(e) => {
                debug!("read error from {} ({}): {}", username, addr, e);
                break;
            }
        }
    }

    // Runs on every exit path. The second unregister after a broadcast
    // pruned us already is a no-op.
    if registry.unregister(id).await.is_some() {
        let leave = format!("*** {} has left the chat ***", username);
        println!("{}", leave);
        registry.broadcast(&leave, Some(id)).await;
    }
}
