// Integration tests for the ferry chat and file transfer services
// These tests run both services on real loopback sockets

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use ferry::commands::send::send_file;
use ferry::protocol::{self, Metadata, MsgType};
use ferry::transport::{Acceptor, Connector};
use ferry::{chat, integrity, transfer};

fn test_storage_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ferry_e2e_{}_{}", tag, std::process::id()))
}

async fn start_file_server(storage: PathBuf) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(transfer::serve(listener, storage, Acceptor::plain()));
    addr
}

async fn start_chat_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(chat::serve(listener, Acceptor::plain()));
    addr
}

// ============================================================================
// File Transfer End-to-End Tests
// ============================================================================

#[tokio::test]
async fn test_send_file_end_to_end() {
    let storage = test_storage_dir("send");
    let addr = start_file_server(storage.clone()).await;

    // File larger than one chunk so the sender has to split it
    let content: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
    let src = std::env::temp_dir().join(format!("ferry_e2e_src_{}.bin", std::process::id()));
    tokio::fs::write(&src, &content).await.unwrap();

    let saved_as = timeout(
        Duration::from_secs(5),
        send_file("127.0.0.1", addr.port(), &src, &Connector::plain()),
    )
    .await
    .expect("transfer timed out")
    .expect("transfer failed");

    assert!(saved_as.ends_with(&format!("_{}", src.file_name().unwrap().to_str().unwrap())));
    let stored = tokio::fs::read(storage.join(&saved_as)).await.unwrap();
    assert_eq!(stored, content);

    let _ = tokio::fs::remove_file(&src).await;
    let _ = tokio::fs::remove_dir_all(&storage).await;
}

#[tokio::test]
async fn test_corrupted_transfer_is_rejected() {
    let storage = test_storage_dir("reject");
    let addr = start_file_server(storage.clone()).await;

    let content = b"bytes that will not match the digest".to_vec();
    let bogus = integrity::digest(b"something else entirely");

    // Drive the protocol by hand so the declared digest can lie
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut header = Metadata::new();
    header.insert("filename".to_string(), json!("liar.bin"));
    header.insert("filesize".to_string(), json!(content.len() as u64));
    header.insert("checksum".to_string(), json!(bogus));
    protocol::write_frame(&mut stream, MsgType::FileHeader, b"", header)
        .await
        .unwrap();
    protocol::write_frame(&mut stream, MsgType::FileChunk, &content, Metadata::new())
        .await
        .unwrap();

    let mut complete = Metadata::new();
    complete.insert("checksum".to_string(), json!(bogus));
    protocol::write_frame(&mut stream, MsgType::FileComplete, b"", complete)
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(5), protocol::read_frame(&mut stream))
        .await
        .expect("timed out")
        .unwrap()
        .expect("server closed without a verdict");
    assert_eq!(reply.msg_type, MsgType::FileComplete);
    assert_eq!(reply.payload, b"ERROR: Checksum mismatch");

    // Nothing may reach the storage directory
    let mut entries = tokio::fs::read_dir(&storage).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());

    let _ = tokio::fs::remove_dir_all(&storage).await;
}

#[tokio::test]
async fn test_concurrent_transfers_do_not_interfere() {
    let storage = test_storage_dir("concurrent");
    let addr = start_file_server(storage.clone()).await;

    let mut sources = Vec::new();
    for i in 0..3u8 {
        let content = vec![i + 1; 5000 + i as usize * 777];
        let src = std::env::temp_dir().join(format!(
            "ferry_e2e_multi_{}_{}.bin",
            i,
            std::process::id()
        ));
        tokio::fs::write(&src, &content).await.unwrap();
        sources.push((src, content));
    }

    let mut handles = Vec::new();
    for (src, _) in &sources {
        let src = src.clone();
        let port = addr.port();
        handles.push(tokio::spawn(async move {
            send_file("127.0.0.1", port, &src, &Connector::plain()).await
        }));
    }

    for (handle, (_, content)) in handles.into_iter().zip(&sources) {
        let saved_as = timeout(Duration::from_secs(5), handle)
            .await
            .expect("transfer timed out")
            .unwrap()
            .expect("transfer failed");
        let stored = tokio::fs::read(storage.join(&saved_as)).await.unwrap();
        assert_eq!(&stored, content);
    }

    for (src, _) in &sources {
        let _ = tokio::fs::remove_file(src).await;
    }
    let _ = tokio::fs::remove_dir_all(&storage).await;
}

#[tokio::test]
async fn test_file_server_survives_reset_connections() {
    let storage = test_storage_dir("resets");
    let addr = start_file_server(storage.clone()).await;

    // connections torn down with RST must not take the accept loop with them
    for _ in 0..5 {
        let socket = TcpStream::connect(addr).await.unwrap();
        socket.set_linger(Some(Duration::ZERO)).unwrap();
        drop(socket);
    }

    let content = b"still serving".to_vec();
    let src = std::env::temp_dir().join(format!("ferry_e2e_reset_{}.bin", std::process::id()));
    tokio::fs::write(&src, &content).await.unwrap();

    let saved_as = timeout(
        Duration::from_secs(5),
        send_file("127.0.0.1", addr.port(), &src, &Connector::plain()),
    )
    .await
    .expect("transfer timed out")
    .expect("transfer failed");
    let stored = tokio::fs::read(storage.join(&saved_as)).await.unwrap();
    assert_eq!(stored, content);

    let _ = tokio::fs::remove_file(&src).await;
    let _ = tokio::fs::remove_dir_all(&storage).await;
}

// ============================================================================
// Chat End-to-End Tests
// ============================================================================

struct ChatClient {
    lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

async fn join_chat(addr: SocketAddr, name: &str) -> ChatClient {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    writer
        .write_all(format!("{}\n", name).as_bytes())
        .await
        .unwrap();
    ChatClient {
        lines: BufReader::new(read_half).lines(),
        writer,
    }
}

async fn next_line(client: &mut ChatClient) -> String {
    timeout(Duration::from_secs(2), client.lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .unwrap()
        .expect("server closed the connection")
}

#[tokio::test]
async fn test_chat_session_over_tcp() {
    let addr = start_chat_server().await;

    let mut alice = join_chat(addr, "alice").await;
    assert_eq!(next_line(&mut alice).await, "Welcome to the chat, alice!");
    assert_eq!(next_line(&mut alice).await, "Users online: 1");

    let mut bob = join_chat(addr, "bob").await;
    assert_eq!(next_line(&mut bob).await, "Welcome to the chat, bob!");
    assert_eq!(next_line(&mut bob).await, "Users online: 2");
    assert_eq!(next_line(&mut alice).await, "*** bob has joined the chat ***");

    // alice speaks; bob hears a timestamped line, alice gets no echo
    alice.writer.write_all(b"hello bob").await.unwrap();
    let heard = next_line(&mut bob).await;
    assert!(heard.ends_with("alice: hello bob"), "got: {}", heard);

    let echo = timeout(Duration::from_millis(200), alice.lines.next_line()).await;
    assert!(echo.is_err(), "sender received its own message");

    // bob disconnects; alice is told
    drop(bob);
    assert_eq!(next_line(&mut alice).await, "*** bob has left the chat ***");
}

#[tokio::test]
async fn test_chat_server_survives_reset_connections() {
    let addr = start_chat_server().await;

    // connections torn down with RST must not take the accept loop with them
    for _ in 0..5 {
        let socket = TcpStream::connect(addr).await.unwrap();
        socket.set_linger(Some(Duration::ZERO)).unwrap();
        drop(socket);
    }

    let mut alice = join_chat(addr, "alice").await;
    assert_eq!(next_line(&mut alice).await, "Welcome to the chat, alice!");
    assert_eq!(next_line(&mut alice).await, "Users online: 1");
}

#[tokio::test]
async fn test_chat_ignores_clients_without_identity() {
    let addr = start_chat_server().await;

    // A client that closes before sending a username must not disturb others
    let silent = TcpStream::connect(addr).await.unwrap();
    drop(silent);

    let mut alice = join_chat(addr, "alice").await;
    assert_eq!(next_line(&mut alice).await, "Welcome to the chat, alice!");
    assert_eq!(next_line(&mut alice).await, "Users online: 1");
}

// ============================================================================
// Framing Over Real Sockets
// ============================================================================

#[tokio::test]
async fn test_frames_survive_tcp_segmentation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        protocol::read_frame(&mut socket).await.unwrap().unwrap()
    });

    // Dribble the frame out in small writes to force partial reads
    let encoded = protocol::encode(MsgType::FileChunk, &payload, Metadata::new()).unwrap();
    let mut client = TcpStream::connect(addr).await.unwrap();
    for piece in encoded.chunks(1300) {
        client.write_all(piece).await.unwrap();
        client.flush().await.unwrap();
        tokio::task::yield_now().await;
    }

    let frame = timeout(Duration::from_secs(5), server)
        .await
        .expect("timed out")
        .unwrap();
    assert_eq!(frame.msg_type, MsgType::FileChunk);
    assert_eq!(frame.payload, expected);
}

#[tokio::test]
async fn test_half_frame_then_close_is_reported_truncated() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        protocol::read_frame(&mut socket).await
    });

    let encoded = protocol::encode(MsgType::FileChunk, b"cut short", Metadata::new()).unwrap();
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&encoded[..encoded.len() - 3]).await.unwrap();
    client.shutdown().await.unwrap();

    let result = timeout(Duration::from_secs(5), server)
        .await
        .expect("timed out")
        .unwrap();
    let err = result.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}
