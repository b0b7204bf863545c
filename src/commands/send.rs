use std::error::Error;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use serde_json::json;
use tokio::fs;

use crate::integrity;
use crate::protocol::{self, Metadata, MsgType};
use crate::transport::Connector;
use crate::CHUNK_SIZE;

/// Function handler to kickoff the upload:
///     - Read input (file path)
///     - Connect to the file server (TLS when requested)
///     - Frame the file as header, fixed-size chunks, and completion
///     - Wait for the server's verdict and report it
pub async fn run(host: &str, port: u16, file_path: &str, use_tls: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
    let path = Path::new(file_path);
    if !path.is_file() {
        return Err(format!("Not a file: {}", file_path).into());
    }

    let connector = if use_tls {
        Connector::tls()
    } else {
        Connector::plain()
    };

    let saved_as = send_file(host, port, path, &connector).await?;
    println!("[+] Transfer complete, saved as: {}", saved_as);
    Ok(())
}

/// Upload one file and return the name the server saved it under.
///
/// The whole file is read up front so the digest covers exactly the bytes
/// that go on the wire. The same digest is declared in the header and
/// repeated in the completion frame.
pub async fn send_file(
    host: &str,
    port: u16,
    path: &Path,
    connector: &Connector,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("Path has no file name: {}", path.display()))?;

    let content = fs::read(path).await?;
    let checksum = integrity::digest(&content);
    debug!("Read {} bytes, sha256 {}", content.len(), checksum);

    debug!("Connecting to {}:{}", host, port);
    let mut stream = connector.connect(host, port).await?;

    let mut header = Metadata::new();
    header.insert("filename".to_string(), json!(filename));
    header.insert("filesize".to_string(), json!(content.len() as u64));
    header.insert("checksum".to_string(), json!(checksum));
    protocol::write_frame(&mut stream, MsgType::FileHeader, b"", header).await?;

    let total_chunks = content.len().div_ceil(CHUNK_SIZE).max(1) as u64;
    let bar = ProgressBar::new(total_chunks);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.black}] {pos}/{len} chunks ({eta}) {msg}")?,
    );

    for chunk in content.chunks(CHUNK_SIZE) {
        protocol::write_frame(&mut stream, MsgType::FileChunk, chunk, Metadata::new()).await?;
        bar.inc(1);
    }
    bar.finish_with_message("Upload complete, verifying...");

    let mut complete = Metadata::new();
    complete.insert("checksum".to_string(), json!(checksum));
    protocol::write_frame(&mut stream, MsgType::FileComplete, b"", complete).await?;

    // One reply frame ends the exchange
    let reply = protocol::read_frame(&mut stream)
        .await?
        .ok_or("Server closed the connection without a reply")?;

    let text = String::from_utf8_lossy(&reply.payload).into_owned();
    if reply.msg_type != MsgType::FileComplete || text != "SUCCESS" {
        return Err(format!("Server rejected the transfer: {}", text).into());
    }

    let saved_as = reply
        .metadata
        .get("saved_as")
        .and_then(|v| v.as_str())
        .unwrap_or(&filename)
        .to_string();

    debug!("Server stored file as '{}'", saved_as);
    Ok(saved_as)
}
