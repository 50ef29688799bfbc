//! End-to-end scenarios over the reference reactor/timer/aio/coroutine
//! backends and real loopback TCP, one per concrete scenario this crate's
//! design was validated against.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use corosocket::coroutine::thread_runtime::ThreadCoroutineRuntime;
use corosocket::coroutine::CoroutineRuntime;
use corosocket::{Domain, Kind, Runtime, Socket, TlsOptions};

fn test_runtime() -> (Runtime, Arc<ThreadCoroutineRuntime>) {
    let coroutines = ThreadCoroutineRuntime::new();
    let runtime = Runtime::new_reference(coroutines.clone() as Arc<dyn CoroutineRuntime>).unwrap();
    (runtime, coroutines)
}

#[test]
fn literal_ipv4_connect_to_refusing_port_fails_cleanly() {
    let (runtime, coroutines) = test_runtime();
    coroutines.spawn(move || {
        let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
        socket.set_timeout(Some(Duration::from_secs(1)));
        let result = socket.connect("127.0.0.1", 9999);
        assert!(result.is_err());
        assert!(!socket.is_active());
        assert!(socket.last_error().is_some());
    });
}

#[test]
fn dns_resolve_failure_surfaces_as_connect_failure() {
    let (runtime, coroutines) = test_runtime();
    coroutines.spawn(move || {
        let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
        socket.set_timeout(Some(Duration::from_secs(2)));
        let result = socket.connect("example.invalid", 80);
        assert!(result.is_err());
        assert!(!socket.is_active());
    });
}

#[test]
fn recv_times_out_when_no_data_arrives() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        std::thread::sleep(Duration::from_millis(400));
        drop(stream);
    });

    let (runtime, coroutines) = test_runtime();
    coroutines.spawn(move || {
        let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
        socket.set_timeout(Some(Duration::from_millis(200)));
        socket.connect("127.0.0.1", port).expect("connect should succeed");
        let result = socket.recv();
        assert!(result.is_err());
        assert!(socket.last_error().unwrap().is_timed_out());
    });
    server.join().unwrap();
}

#[test]
fn recv_after_eagain_returns_the_bytes_written_late() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        use std::io::Write;
        let (mut stream, _) = listener.accept().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        stream.write_all(b"abcde").unwrap();
    });

    let (runtime, coroutines) = test_runtime();
    coroutines.spawn(move || {
        let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
        socket.set_timeout(Some(Duration::from_secs(1)));
        socket.connect("127.0.0.1", port).expect("connect should succeed");
        let buf = socket.recv().expect("recv should eventually succeed");
        assert_eq!(buf.as_ref(), b"abcde");
    });
    server.join().unwrap();
}

#[test]
fn accept_produces_a_child_with_inherited_domain_and_kind() {
    let (runtime, coroutines) = test_runtime();
    let port = 18_745;
    let mut listener = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
    listener.bind("127.0.0.1", port).unwrap();
    listener.listen(16).unwrap();

    let connector = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        std::net::TcpStream::connect(("127.0.0.1", port)).unwrap()
    });

    coroutines.spawn(move || {
        let child = listener.accept().expect("accept should succeed");
        assert_eq!(child.domain(), Domain::Ipv4);
        assert_eq!(child.kind(), Kind::Stream);
        assert!(child.is_active());
        assert!(listener.is_active());
    });
    connector.join().unwrap();
}

#[test]
fn ssl_handshake_on_unconnected_socket_is_rejected() {
    let (runtime, coroutines) = test_runtime();
    coroutines.spawn(move || {
        let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
        let opts = TlsOptions::new("example.com").allow_self_signed(true);
        let result = socket.ssl_handshake(opts);
        assert!(result.is_err());
    });
}

/// Builds a self-signed `ServerConfig` for `name`, the way `spark-tck`'s
/// `generate_server_config` does it with `rcgen`.
fn self_signed_server_config(name: &str) -> Arc<rustls::ServerConfig> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer};

    corosocket::ensure_crypto_provider();

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

/// Scenario 6: a real multi-step TLS handshake reaching `ssl_handshake`'s
/// suspend loop and completing over a real loopback connection, against a
/// genuine `rustls::ServerConnection` rather than a stub.
#[test]
fn tls_handshake_completes_over_real_loopback_tcp() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server_config = self_signed_server_config("localhost");

    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut conn = rustls::ServerConnection::new(server_config).expect("server connection");
        while conn.is_handshaking() {
            conn.complete_io(&mut stream).expect("server handshake step");
        }
        conn
    });

    let (runtime, coroutines) = test_runtime();
    coroutines.spawn(move || {
        let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
        socket.set_timeout(Some(Duration::from_secs(2)));
        socket.connect("127.0.0.1", port).expect("connect should succeed");

        assert!(!socket.tls_ready());
        let opts = TlsOptions::new("localhost").allow_self_signed(true);
        socket.ssl_handshake(opts).expect("tls handshake should complete");
        assert!(socket.tls_ready());
        assert!(socket.is_active());
    });

    let server_conn = server.join().unwrap();
    assert!(!server_conn.is_handshaking());
}
