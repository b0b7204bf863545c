use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;

use ferry::{DEFAULT_CHAT_PORT, DEFAULT_TRANSFER_PORT};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "TCP chat and verified file transfer", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server
    ChatServer {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value_t = DEFAULT_CHAT_PORT)]
        port: u16,
        /// PEM certificate chain; enables TLS together with --key
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,
        /// PKCS#8 private key; enables TLS together with --cert
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
    },
    /// Join a chat server
    Chat {
        /// Username to appear as
        username: String,
        /// Server to connect to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_CHAT_PORT)]
        port: u16,
        /// Connect over TLS
        #[arg(long)]
        tls: bool,
    },
    /// Run the file server
    FileServer {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value_t = DEFAULT_TRANSFER_PORT)]
        port: u16,
        /// Directory to store verified uploads in
        #[arg(short, long, default_value = "received_files")]
        storage: PathBuf,
        /// PEM certificate chain; enables TLS together with --key
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,
        /// PKCS#8 private key; enables TLS together with --cert
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
    },
    /// Send a file to a file server
    Send {
        /// Path to the file to send
        file_path: String,
        /// Server to connect to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_TRANSFER_PORT)]
        port: u16,
        /// Connect over TLS
        #[arg(long)]
        tls: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    // Configure logging based on verbose flag
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
        log::info!("Verbose logging enabled");
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    match cli.command {
        Commands::ChatServer { host, port, cert, key } => {
            ferry::commands::chat_server::run(&host, port, cert, key).await?;
        }
        Commands::Chat { username, host, port, tls } => {
            ferry::commands::chat::run(&host, port, &username, tls).await?;
        }
        Commands::FileServer { host, port, storage, cert, key } => {
            ferry::commands::file_server::run(&host, port, storage, cert, key).await?;
        }
        Commands::Send { file_path, host, port, tls } => {
            ferry::commands::send::run(&host, port, &file_path, tls).await?;
        }
    }

    Ok(())
}
