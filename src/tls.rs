//! Optional TLS sub-state for a [`Socket`](crate::socket::Socket), driven
//! through `ssl_handshake` (see [`crate::socket::ssl`]). Backed by `rustls`:
//! its raw, non-blocking `ClientConnection` exposes `wants_read()`/
//! `wants_write()` directly, which is exactly the want-read/want-write hint
//! pair the handshake step function needs to decide which direction to
//! register with the reactor.

use std::io::{Read, Write};
use std::sync::{Arc, Once};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};

use crate::buf::Buffer;
use crate::error::SocketError;

/// Builder for the TLS parameters a socket's handshake uses, mirroring the
/// teacher's `OpenOptions` fluent-builder shape (`fs/open_options.rs`).
#[derive(Clone)]
pub struct TlsOptions {
    pub verify_peer: bool,
    pub allow_self_signed: bool,
    pub alpn: Vec<Vec<u8>>,
    pub server_name: String,
}

impl TlsOptions {
    /// Starts from the process-wide [`Config`](crate::config::Config)
    /// defaults (`verify_peer`, ALPN list), overridable via the builder
    /// methods below.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            verify_peer: crate::config::default_verify_peer(),
            allow_self_signed: false,
            alpn: crate::config::default_alpn(),
            server_name: server_name.into(),
        }
    }

    pub fn verify_peer(mut self, verify_peer: bool) -> Self {
        self.verify_peer = verify_peer;
        self
    }

    pub fn allow_self_signed(mut self, allow: bool) -> Self {
        self.allow_self_signed = allow;
        self
    }

    pub fn alpn(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn = protocols;
        self
    }
}

/// Accepts any certificate chain. Only reachable through
/// [`TlsOptions::allow_self_signed`]; never the default.
#[derive(Debug)]
struct NoVerify;

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

static CRYPTO_PROVIDER_INSTALLED: Once = Once::new();

/// Installs `rustls`'s default process-wide [`rustls::crypto::CryptoProvider`]
/// the first time any TLS config is built. `rustls` 0.23 requires one to be
/// installed before `ClientConfig::builder()`/`ServerConfig::builder()` can
/// be called; a test or embedding application that builds its own rustls
/// configs (for a test TLS server, say) can call this too; the installation
/// races harmlessly since a losing `install_default()` just returns `Err`
/// without touching the provider the winner installed.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INSTALLED.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

fn build_client_config(opts: &TlsOptions) -> Result<ClientConfig, SocketError> {
    ensure_crypto_provider();
    let builder = ClientConfig::builder();

    let mut config = if opts.allow_self_signed || !opts.verify_peer {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            tracing::debug!(%err, "failed to load a native cert entry");
        }
        for cert in native.certs {
            let _ = roots.add(cert);
        }
        builder
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    if !opts.alpn.is_empty() {
        config.alpn_protocols = opts.alpn.clone();
    }
    Ok(config)
}

/// The state a socket's connection carries once `ssl_handshake` has been
/// invoked: the `rustls` session plus the want-read/want-write hints the
/// spec's TLS direction-flip note asks `recv`/`send` to consult.
pub struct TlsState {
    pub(crate) conn: ClientConnection,
    pub want_read: bool,
    pub want_write: bool,
}

impl TlsState {
    pub fn new(opts: &TlsOptions) -> Result<Self, SocketError> {
        let config = build_client_config(opts)?;
        let server_name = ServerName::try_from(opts.server_name.clone())
            .map_err(|err| SocketError::Tls(format!("invalid server name: {err}")))?;
        let conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|err| SocketError::Tls(err.to_string()))?;
        let want_read = conn_wants_read(&conn);
        let want_write = conn_wants_write(&conn);
        Ok(Self {
            conn,
            want_read,
            want_write,
        })
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// Drives one step of the handshake against `socket_fd` via the raw
    /// read/write-style transport callbacks the caller supplies, updating
    /// `want_read`/`want_write` for the next suspend decision.
    ///
    /// `io` is expected to behave like a non-blocking `TcpStream`: returning
    /// `WouldBlock` is how a partial TLS record exchange is signaled back up.
    pub fn step<T: Read + Write>(&mut self, io: &mut T) -> Result<(), SocketError> {
        if self.conn.wants_write() {
            match self.conn.write_tls(io) {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(SocketError::System(err)),
            }
        }
        if self.conn.wants_read() {
            let read = self.conn.read_tls(io);
            match read {
                Ok(0) => return Err(SocketError::Tls("peer closed during handshake".into())),
                Ok(_) => {
                    self.conn
                        .process_new_packets()
                        .map_err(|err| SocketError::Tls(err.to_string()))?;
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(SocketError::System(err)),
            }
        }
        self.want_read = conn_wants_read(&self.conn);
        self.want_write = conn_wants_write(&self.conn);
        Ok(())
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<usize, SocketError> {
        self.conn
            .writer()
            .write(plaintext)
            .map_err(SocketError::System)
    }

    pub fn decrypt(&mut self, out: &mut Buffer) -> Result<usize, SocketError> {
        let mut scratch = vec![0u8; out.cap()];
        let n = match self.conn.reader().read(&mut scratch) {
            Ok(n) => n,
            // No plaintext buffered yet (rustls' reader signals this as
            // `WouldBlock` rather than `Ok(0)`); the caller's retry loop
            // should keep exchanging TLS records, not treat this as EOF.
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => 0,
            Err(err) => return Err(SocketError::System(err)),
        };
        out.append(&scratch[..n]);
        Ok(n)
    }
}

fn conn_wants_read(conn: &ClientConnection) -> bool {
    conn.wants_read()
}

fn conn_wants_write(conn: &ClientConnection) -> bool {
    conn.wants_write()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_verify_peer() {
        let opts = TlsOptions::new("example.com");
        assert!(opts.verify_peer);
        assert!(!opts.allow_self_signed);
    }

    #[test]
    fn new_state_wants_write_first() {
        let opts = TlsOptions::new("example.com").allow_self_signed(true);
        let state = TlsState::new(&opts).expect("client config should build");
        assert!(state.is_handshaking());
        assert!(state.want_write);
    }

    /// Builds a self-signed `ServerConfig` for `name`, the way
    /// `spark-tck`'s `generate_server_config` does it with `rcgen`.
    fn self_signed_server_config(name: &str) -> Arc<rustls::ServerConfig> {
        use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
        use rustls::pki_types::{CertificateDer, PrivateKeyDer};

        ensure_crypto_provider();

        let mut params = CertificateParams::new(vec![name.to_string()]).expect("cert params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        params.distinguished_name = dn;

        let key_pair = KeyPair::generate().expect("key pair");
        let cert = params.self_signed(&key_pair).expect("self-signed cert");
        let cert_der = CertificateDer::from(cert.der().to_vec());
        let key_der = PrivateKeyDer::try_from(key_pair.serialize_der()).expect("private key der");

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .expect("server config");
        Arc::new(config)
    }

    /// Drives a real two-flight handshake against a genuine
    /// `rustls::ServerConnection` over loopback TCP and asserts the
    /// want-write/want-read hints flip direction mid-handshake rather than
    /// staying fixed, matching the reactor registrations `run_handshake`
    /// (see `crate::socket::ssl`) relies on.
    #[test]
    fn step_observes_both_write_and_read_interest_over_a_real_handshake() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server_config = self_signed_server_config("localhost");

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut conn =
                rustls::ServerConnection::new(server_config).expect("server connection");
            while conn.is_handshaking() {
                conn.complete_io(&mut stream).expect("server handshake step");
            }
        });

        let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_nonblocking(true).unwrap();

        let opts = TlsOptions::new("localhost").allow_self_signed(true);
        let mut state = TlsState::new(&opts).expect("client config should build");

        let mut saw_want_write = false;
        let mut saw_want_read = false;
        let mut iterations = 0;
        while state.is_handshaking() {
            iterations += 1;
            assert!(iterations < 10_000, "handshake did not converge");
            saw_want_write |= state.want_write;
            saw_want_read |= state.want_read;
            state.step(&mut stream).expect("client handshake step");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert!(saw_want_write, "handshake never reported write interest");
        assert!(saw_want_read, "handshake never reported read interest");
        assert!(!state.is_handshaking());
        server.join().unwrap();
    }
}
