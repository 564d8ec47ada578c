//! End-to-end PASE handshakes over an in-memory byte stream.

use std::time::Duration;

use assert_matches::assert_matches;
use tokio::io::DuplexStream;

use mash_commissioning::framing;
use mash_commissioning::messages::{CsrRequest, ErrorCode, Message, MessageType, PaseRequest};
use mash_commissioning::session::reject_busy;
use mash_commissioning::spake2p::Spake2pError;
use mash_commissioning::{CancellationToken, PaseClient, PaseServer, SessionError, SetupCode, SetupVerifier};

const CLIENT_IDENTITY: &[u8] = b"controller";
const SERVER_IDENTITY: &[u8] = b"device";

fn setup_code() -> SetupCode {
    SetupCode::new(12_345_678).unwrap()
}

fn verifier() -> SetupVerifier {
    SetupVerifier::generate(&setup_code(), CLIENT_IDENTITY, SERVER_IDENTITY).unwrap()
}

fn streams() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(4096)
}

#[tokio::test]
async fn handshake_agrees_on_a_32_byte_secret() {
    let verifier = verifier();
    assert_eq!(verifier.w0().len(), 32);
    assert_eq!(verifier.l().len(), 33);

    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();

    let client = PaseClient::new(&setup_code(), CLIENT_IDENTITY, SERVER_IDENTITY).unwrap();
    let server = PaseServer::new(&verifier, SERVER_IDENTITY).unwrap();

    let server_cancel = cancel.clone();
    let server_task =
        tokio::spawn(async move { server.handshake(&mut device_stream, &server_cancel).await });

    let client_secret = client.handshake(&mut controller_stream, &cancel).await.unwrap();
    let server_secret = server_task.await.unwrap().unwrap();

    assert_eq!(client_secret.as_bytes().len(), 32);
    assert_eq!(client_secret, server_secret);
    assert_eq!(ErrorCode::Success.description(), "success");
}

#[tokio::test]
async fn wrong_setup_code_fails_on_both_sides() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();

    // Server verifier derives from a different code than the client uses.
    let client = PaseClient::new(&SetupCode::new(87_654_321).unwrap(), CLIENT_IDENTITY, SERVER_IDENTITY).unwrap();
    let server = PaseServer::new(&verifier(), SERVER_IDENTITY).unwrap();

    let server_cancel = cancel.clone();
    let server_task =
        tokio::spawn(async move { server.handshake(&mut device_stream, &server_cancel).await });

    let client_result = client.handshake(&mut controller_stream, &cancel).await;
    let server_result = server_task.await.unwrap();

    assert_matches!(client_result, Err(SessionError::PaseFailed(ErrorCode::ConfirmFailed)));
    assert_matches!(server_result, Err(SessionError::ConfirmationFailed));
}

#[tokio::test]
async fn malformed_public_value_is_rejected_with_an_error_message() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();

    let server = PaseServer::new(&verifier(), SERVER_IDENTITY).unwrap();
    let server_cancel = cancel.clone();
    let server_task =
        tokio::spawn(async move { server.handshake(&mut device_stream, &server_cancel).await });

    // Hand-roll the opening message with garbage instead of a curve point.
    let request = Message::PaseRequest(PaseRequest {
        public_value: vec![0x01, 0x02, 0x03],
        client_identity: CLIENT_IDENTITY.to_vec(),
    });
    framing::write_message(&mut controller_stream, &request).await.unwrap();

    let reply = framing::read_message(&mut controller_stream).await.unwrap();
    assert_matches!(reply, Message::CommissioningError(error) => {
        assert_eq!(error.error_code, ErrorCode::InvalidPublicKey);
        assert_eq!(error.message.as_deref(), Some("invalid public key"));
    });

    let server_result = server_task.await.unwrap();
    assert_matches!(
        server_result,
        Err(SessionError::Spake2p(Spake2pError::InvalidPublicKey))
    );
}

#[tokio::test]
async fn server_requires_a_pase_request_first() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();

    let request = Message::CsrRequest(CsrRequest { nonce: vec![0; 32] });
    framing::write_message(&mut controller_stream, &request).await.unwrap();

    let result = PaseServer::await_initial(&mut device_stream, &cancel).await;

    assert_matches!(result, Err(SessionError::UnexpectedMessage(MessageType::CsrRequest)));
}

#[tokio::test]
async fn busy_rejection_reaches_the_client_with_a_retry_hint() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();

    let client = PaseClient::new(&setup_code(), CLIENT_IDENTITY, SERVER_IDENTITY).unwrap();

    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        // Observe the opening message, then refuse: another handshake holds
        // the commissioning lock.
        let _request = PaseServer::await_initial(&mut device_stream, &server_cancel).await.unwrap();
        reject_busy(&mut device_stream, &server_cancel, 5000).await.unwrap();
    });

    let result = client.handshake(&mut controller_stream, &cancel).await;
    server_task.await.unwrap();

    assert_matches!(result, Err(SessionError::Server { code: ErrorCode::Busy, message }) => {
        assert_eq!(message.as_deref(), Some("commissioning already in progress"));
    });
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_a_stalled_handshake() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();

    // A peer that reads the request but never replies.
    let silent_peer = tokio::spawn(async move {
        let _request = framing::read_frame(&mut device_stream).await;
        std::future::pending::<()>().await;
    });

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let client = PaseClient::new(&setup_code(), CLIENT_IDENTITY, SERVER_IDENTITY).unwrap();
    let started = tokio::time::Instant::now();
    let result = client.handshake(&mut controller_stream, &cancel).await;

    assert_matches!(result, Err(SessionError::Cancelled));
    assert!(started.elapsed() <= Duration::from_millis(200));

    silent_peer.abort();
}
