use std::error::Error;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use crate::transport::Connector;

/// Function handler to run the interactive chat client:
///     - Connect to the chat server (TLS when requested)
///     - Send the username as the first line
///     - Spawn a task printing server traffic as it arrives
///     - Relay stdin lines until `/quit` or the server goes away
pub async fn run(host: &str, port: u16, username: &str, use_tls: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
    let connector = if use_tls {
        Connector::tls()
    } else {
        Connector::plain()
    };

    debug!("Connecting to {}:{}", host, port);
    let stream = connector.connect(host, port).await?;
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    write_half.write_all(format!("{}\n", username).as_bytes()).await?;
    write_half.flush().await?;
    println!("[+] Connected. Type a message and press enter; /quit to leave.");

    // Incoming traffic goes straight to the terminal. The task ends when the
    // server closes the connection.
    let printer = tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => print!("{}", String::from_utf8_lossy(&buf[..n])),
            }
        }
        println!("[!] Disconnected from server");
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = stdin.next_line().await? {
        let message = line.trim();
        if message == "/quit" {
            break;
        }
        if message.is_empty() {
            continue;
        }
        if write_half.write_all(message.as_bytes()).await.is_err() {
            break;
        }
        write_half.flush().await?;
    }

    // Closing our write side tells the server we left; the printer task
    // winds down when the server closes its side in response.
    write_half.shutdown().await?;
    printer.abort();
    println!("[-] Left the chat");
    Ok(())
}
