//! A small probe for the proxy's health-check endpoint, suitable as a
//! container HEALTHCHECK command: prints the status message and exits
//! non-zero when the proxy is unhealthy.

use std::process::ExitCode;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Probe the local honeycomb instance.
#[derive(Parser, Debug)]
#[command(name = "healthcheck", version)]
struct Args {
    /// Port the HTTPS listener is bound to.
    #[arg(long, env = "PORT", default_value_t = 8443)]
    port: u16,

    /// Send a PROXY protocol LOCAL header before the request, matching a
    /// listener that expects PROXY framing.
    #[arg(long, env = "PROXY_PROTOCOL", default_value_t = false)]
    proxy_protocol: bool,

    /// Milliseconds allowed for the whole probe.
    #[arg(long, env = "CHECK_TIMEOUT", default_value_t = 500)]
    check_timeout: u64,
}

/// PROXY protocol v2 LOCAL header: signature, version 2 + LOCAL command,
/// AF_UNSPEC, zero-length address block.
const PROXY_V2_LOCAL: &[u8] = &[
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A, 0x20, 0x00, 0x00,
    0x00,
];

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());
    let args = Args::parse();

    let timeout = Duration::from_millis(args.check_timeout.max(1));
    match tokio::time::timeout(timeout, probe(&args)).await {
        Ok(Ok(message)) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Ok(Err(message)) => {
            println!("{message}");
            ExitCode::FAILURE
        }
        Err(_) => {
            println!("health-check timed out after {timeout:?}");
            ExitCode::FAILURE
        }
    }
}

/// Fetch the health-check page. The listener's certificate is for whatever
/// name the operator configured, so verification is skipped.
async fn probe(args: &Args) -> Result<String, String> {
    let mut tcp = TcpStream::connect(("127.0.0.1", args.port))
        .await
        .map_err(|e| e.to_string())?;

    if args.proxy_protocol {
        tcp.write_all(PROXY_V2_LOCAL)
            .await
            .map_err(|e| e.to_string())?;
    }

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(std::sync::Arc::new(danger::NoVerification::new()))
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(std::sync::Arc::new(config));
    let server_name = rustls::pki_types::ServerName::try_from("localhost")
        .map_err(|e| e.to_string())?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| e.to_string())?;

    let (mut sender, connection) = http1::handshake(TokioIo::new(tls))
        .await
        .map_err(|e| e.to_string())?;
    tokio::spawn(connection);

    let request = Request::get("/.honeycomb/health-check")
        .header(http::header::HOST, "localhost")
        .body(Empty::<Bytes>::new())
        .map_err(|e| e.to_string())?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .to_bytes();
    let message = String::from_utf8_lossy(&body).trim().to_string();

    if status == StatusCode::OK {
        Ok(message)
    } else {
        Err(message)
    }
}

mod danger {
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// The probe talks to its own process over loopback; there is nothing to
    /// verify.
    #[derive(Debug)]
    pub struct NoVerification {
        schemes: Vec<SignatureScheme>,
    }

    impl NoVerification {
        pub fn new() -> Self {
            NoVerification {
                schemes: rustls::crypto::ring::default_provider()
                    .signature_verification_algorithms
                    .supported_schemes(),
            }
        }
    }

    impl ServerCertVerifier for NoVerification {
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
            self.schemes.clone()
        }
    }
}
