use std::error::Error;
use std::path::PathBuf;

use log::debug;
use tokio::net::TcpListener;

use crate::chat;
use crate::transport::Acceptor;

/// Function handler to run the chat server:
///     - Build the transport strategy (TLS when a cert and key are given)
///     - Bind the listener
///     - Hand off to the accept loop, which runs until interrupted
pub async fn run(
    host: &str,
    port: u16,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let acceptor = match (cert, key) {
        (Some(cert), Some(key)) => {
            debug!("Loading TLS certificate from {}", cert.display());
            Acceptor::tls(&cert, &key)?
        }
        _ => Acceptor::plain(),
    };

    let listener = TcpListener::bind((host, port)).await?;
    println!("[+] Chat server listening on {}:{}", host, port);

    chat::serve(listener, acceptor).await
}
