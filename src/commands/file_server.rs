use std::error::Error;
use std::path::PathBuf;

use log::debug;
use tokio::net::TcpListener;

use crate::transfer;
use crate::transport::Acceptor;

/// Function handler to run the file server:
///     - Build the transport strategy (TLS when a cert and key are given)
///     - Bind the listener
///     - Hand off to the accept loop; uploads land in the storage directory
pub async fn run(
    host: &str,
    port: u16,
    storage: PathBuf,
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
    println!(
        "[+] File server listening on {}:{} (storage: {})",
        host,
        port,
        storage.display()
    );

    transfer::serve(listener, storage, acceptor).await
}
