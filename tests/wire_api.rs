//! Tests for the wire client and reconciler against a stub CA server.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use url::Url;

use puppetca::ca::identity::{Identity, Material};
use puppetca::ca::reconcile::{Reconciler, RetryPolicy};
use puppetca::ca::wire::{CaApi, Client};

const NODE: &str = "node1.example.com";
const CERT_PEM: &str = "-----BEGIN CERTIFICATE-----\nnode1\n-----END CERTIFICATE-----\n";
const CSR_PEM: &str = "-----BEGIN CERTIFICATE REQUEST-----\nnode1\n-----END CERTIFICATE REQUEST-----\n";

//------------ Stub CA -------------------------------------------------------

/// The mutable state of the stub CA, for one known node.
#[derive(Default)]
struct CaState {
    cert: Mutex<Option<String>>,
    csr: Mutex<Option<String>>,
    /// Installed as the certificate when a sign request arrives.
    signed_cert: Mutex<Option<String>>,
    /// Forces this status on every certificate read when set.
    cert_status_override: Mutex<Option<u16>>,
    cert_gets: AtomicUsize,
    sign_calls: AtomicUsize,
}

impl CaState {
    fn with_cert(pem: &str) -> Arc<Self> {
        let state = CaState::default();
        *state.cert.lock().unwrap() = Some(pem.to_string());
        Arc::new(state)
    }

    fn with_pending_csr(csr: &str, signed_cert: &str) -> Arc<Self> {
        let state = CaState::default();
        *state.csr.lock().unwrap() = Some(csr.to_string());
        *state.signed_cert.lock().unwrap() = Some(signed_cert.to_string());
        Arc::new(state)
    }
}

fn canned(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

async fn handle(state: Arc<CaState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    if parts.len() != 4 || parts[0] != "puppet-ca" || parts[1] != "v1" {
        return canned(StatusCode::BAD_REQUEST, "unknown endpoint");
    }
    let (endpoint, node) = (parts[2], parts[3]);

    match (&method, endpoint) {
        (&Method::GET, "certificate") => {
            state.cert_gets.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = *state.cert_status_override.lock().unwrap() {
                return canned(StatusCode::from_u16(status).unwrap(), "stub failure");
            }
            if node != NODE {
                return canned(StatusCode::NOT_FOUND, "");
            }
            match state.cert.lock().unwrap().as_ref() {
                Some(pem) => canned(StatusCode::OK, pem),
                None => canned(StatusCode::NOT_FOUND, ""),
            }
        }
        (&Method::GET, "certificate_request") => match state.csr.lock().unwrap().as_ref() {
            Some(csr) if node == NODE => canned(StatusCode::OK, csr),
            _ => canned(StatusCode::NOT_FOUND, ""),
        },
        (&Method::PUT, "certificate_request") => {
            state.sign_calls.fetch_add(1, Ordering::SeqCst);

            // The CA only honors a proper desired_state transition.
            let content_type = req
                .headers()
                .get(hyper::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = req.into_body().collect().await.unwrap().to_bytes();
            if content_type != "application/json" || body.as_ref() != br#"{"desired_state":"signed"}"# {
                return canned(StatusCode::BAD_REQUEST, "expected a desired_state of signed");
            }

            if let Some(pem) = state.signed_cert.lock().unwrap().take() {
                *state.cert.lock().unwrap() = Some(pem);
            }
            canned(StatusCode::NO_CONTENT, "")
        }
        (&Method::DELETE, "certificate_status") => {
            if state.cert.lock().unwrap().take().is_some() {
                canned(StatusCode::NO_CONTENT, "")
            } else {
                canned(StatusCode::NOT_FOUND, "")
            }
        }
        _ => canned(StatusCode::BAD_REQUEST, "unknown endpoint"),
    }
}

/// Serves the stub CA on an ephemeral loopback port.
async fn serve(state: Arc<CaState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            let state = state.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(handle(state, req).await) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

//------------ Client identity fixtures --------------------------------------

/// Mints a throwaway self-signed CA key pair as PEM strings.
fn test_material() -> (String, String) {
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::extension::BasicConstraints;
    use openssl::x509::{X509, X509NameBuilder};

    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "puppetca-test").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    (
        String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
        String::from_utf8(cert.to_pem().unwrap()).unwrap(),
    )
}

fn inline_identity(key_pem: &str, cert_pem: &str) -> Identity {
    Identity::build(
        &Material::from_setting(key_pem),
        &Material::from_setting(cert_pem),
        &Material::from_setting(cert_pem),
    )
    .unwrap()
}

fn client_for(addr: SocketAddr) -> Client {
    let (key_pem, cert_pem) = test_material();
    let base = Url::parse(&format!("http://{}", addr)).unwrap();
    Client::new(base, inline_identity(&key_pem, &cert_pem), false).unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(20),
        multiplier: 2.0,
        max_interval: Duration::from_millis(80),
        randomization_factor: 0.0,
        max_elapsed: Duration::from_secs(5),
    }
}

fn init_logging() {
    let _ = stderrlog::new().verbosity(2).init();
}

//------------ Tests ---------------------------------------------------------

#[tokio::test]
async fn certificate_read_maps_statuses_to_outcomes() {
    init_logging();
    let state = CaState::with_cert(CERT_PEM);
    let addr = serve(state.clone()).await;
    let client = client_for(addr);

    assert_eq!(client.certificate(NODE, "").await.unwrap().as_deref(), Some(CERT_PEM));
    assert_eq!(client.certificate("unknown.example.com", "").await.unwrap(), None);

    *state.cert_status_override.lock().unwrap() = Some(500);
    let err = client.certificate(NODE, "").await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn signing_request_read_maps_statuses_to_outcomes() {
    let state = CaState::with_pending_csr(CSR_PEM, CERT_PEM);
    let addr = serve(state).await;
    let client = client_for(addr);

    assert_eq!(client.signing_request(NODE, "production").await.unwrap().as_deref(), Some(CSR_PEM));
    assert_eq!(client.signing_request("unknown.example.com", "").await.unwrap(), None);
}

#[tokio::test]
async fn ensure_signs_pending_request_end_to_end() {
    init_logging();
    let state = CaState::with_pending_csr(CSR_PEM, CERT_PEM);
    let addr = serve(state.clone()).await;
    let reconciler = Reconciler::with_retry(client_for(addr), fast_retry());

    let pem = reconciler.ensure(NODE, "production", true, None).await.unwrap();

    assert_eq!(pem, CERT_PEM);
    assert_eq!(state.sign_calls.load(Ordering::SeqCst), 1);
    assert!(state.cert_gets.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn ensure_aborts_on_server_error() {
    let state = Arc::new(CaState::default());
    *state.cert_status_override.lock().unwrap() = Some(500);
    let addr = serve(state.clone()).await;
    let reconciler = Reconciler::with_retry(client_for(addr), fast_retry());

    let err = reconciler.ensure(NODE, "", false, None).await.unwrap_err();

    assert!(err.to_string().contains("500"));
    assert_eq!(state.cert_gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let state = CaState::with_cert(CERT_PEM);
    let addr = serve(state).await;
    let client = client_for(addr);

    // Present, then already gone. Both are success.
    client.delete(NODE, "").await.unwrap();
    client.delete(NODE, "").await.unwrap();
}

#[tokio::test]
async fn inline_and_file_identity_behave_identically() {
    let state = CaState::with_cert(CERT_PEM);
    let addr = serve(state).await;
    let base = Url::parse(&format!("http://{}", addr)).unwrap();

    let (key_pem, cert_pem) = test_material();

    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("client.key");
    let cert_path = dir.path().join("client.pem");
    std::fs::write(&key_path, &key_pem).unwrap();
    std::fs::write(&cert_path, &cert_pem).unwrap();

    let from_inline = Client::new(base.clone(), inline_identity(&key_pem, &cert_pem), false).unwrap();
    let from_files = Client::new(
        base,
        Identity::build(
            &Material::from_setting(key_path.to_str().unwrap()),
            &Material::from_setting(cert_path.to_str().unwrap()),
            &Material::from_setting(cert_path.to_str().unwrap()),
        )
        .unwrap(),
        false,
    )
    .unwrap();

    for client in [&from_inline, &from_files] {
        assert_eq!(client.certificate(NODE, "").await.unwrap().as_deref(), Some(CERT_PEM));
        assert_eq!(client.certificate("unknown.example.com", "").await.unwrap(), None);
    }
}
