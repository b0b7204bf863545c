use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use log::debug;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, ServerConfig, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// The byte-stream capability handlers and the codec operate on.
///
/// Both the plain TCP socket and the TLS-wrapped socket satisfy it, so
/// everything above the transport is agnostic to whether encryption was
/// applied.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// A live connection, plain or encrypted.
pub type Stream = Box<dyn Connection>;

/// Server-side transport strategy, selected at startup and applied once to
/// each accepted socket before the handler sees it.
pub enum Acceptor {
    Plain,
    Tls(TlsAcceptor),
}

impl Acceptor {
    pub fn plain() -> Self {
        Acceptor::Plain
    }

    /// Build a TLS acceptor from a PEM certificate chain and PKCS#8 key.
    pub fn tls(cert_path: &Path, key_path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Acceptor::Tls(TlsAcceptor::from(Arc::new(config))))
    }

    /// Wrap a freshly accepted socket. For TLS this runs the server side of
    /// the handshake; afterwards the stream behaves like any other.
    pub async fn accept(&self, stream: TcpStream) -> io::Result<Stream> {
        match self {
            Acceptor::Plain => Ok(Box::new(stream)),
            Acceptor::Tls(acceptor) => {
                let tls_stream = acceptor.accept(stream).await?;
                debug!("TLS handshake complete");
                Ok(Box::new(tls_stream))
            }
        }
    }
}

/// Client-side counterpart of [`Acceptor`].
pub enum Connector {
    Plain,
    Tls(TlsConnector),
}

impl Connector {
    pub fn plain() -> Self {
        Connector::Plain
    }

    /// TLS connector that accepts any server certificate. The servers run on
    /// self-signed deployment certs, so trust comes from the operator rather
    /// than a certificate chain.
    pub fn tls() -> Self {
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();

        Connector::Tls(TlsConnector::from(Arc::new(config)))
    }

    /// Connect to a server and, for TLS, complete the client side of the
    /// handshake before the first frame is sent.
    pub async fn connect(&self, host: &str, port: u16) -> Result<Stream, Box<dyn Error + Send + Sync>> {
        let stream = TcpStream::connect((host, port)).await?;
        match self {
            Connector::Plain => Ok(Box::new(stream)),
            Connector::Tls(connector) => {
                let server_name = ServerName::try_from(host)?;
                let tls_stream = connector.connect(server_name, stream).await?;
                debug!("TLS handshake complete");
                Ok(Box::new(tls_stream))
            }
        }
    }
}

struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, Box<dyn Error + Send + Sync>> {
    let certfile = File::open(path)
        .map_err(|e| format!("cannot open certificate {}: {}", path.display(), e))?;
    let mut reader = BufReader::new(certfile);
    let certs = certs(&mut reader)?;
    if certs.is_empty() {
        return Err(format!("no certificates found in {}", path.display()).into());
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<PrivateKey, Box<dyn Error + Send + Sync>> {
    let keyfile = File::open(path)
        .map_err(|e| format!("cannot open private key {}: {}", path.display(), e))?;
    let mut reader = BufReader::new(keyfile);
    let keys = pkcs8_private_keys(&mut reader)?;
    if keys.is_empty() {
        return Err(format!("no PKCS#8 private key found in {}", path.display()).into());
    }
    Ok(PrivateKey(keys[0].clone()))
}
