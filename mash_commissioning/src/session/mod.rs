//! Password-authenticated session establishment over a framed byte stream.
//!
//! The client and server state machines orchestrate one SPAKE2+ exchange
//! across the wire. A session owns its engine and is consumed by its
//! handshake: after completion or failure the engine is gone and a fresh
//! session must be created. Both roles assume a transport that delivers a
//! fresh stream per handshake (e.g. a new TLS connection); the protocol
//! itself does not detect replayed frames from earlier streams.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use mash_common::cancel::CancellationToken;

use crate::framing::{self, FramingError};
use crate::messages::{CommissioningError, ErrorCode, Message, MessageType};
use crate::spake2p::Spake2pError;

mod client;
mod server;

pub use client::PaseClient;
pub use server::PaseServer;

/// Recommended end-to-end deadline for one PASE handshake.
pub const RECOMMENDED_PASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Recommended end-to-end deadline for one credential renewal.
pub const RECOMMENDED_RENEWAL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("SPAKE2+ error: {0}")]
    Spake2p(#[from] Spake2pError),
    #[error("unexpected {0:?} message")]
    UnexpectedMessage(MessageType),
    #[error("peer reported \"{}\" ({code})", .message.as_deref().unwrap_or("no detail"))]
    Server { code: ErrorCode, message: Option<String> },
    #[error("handshake failed with code {0}")]
    PaseFailed(ErrorCode),
    #[error("confirmation verification failed")]
    ConfirmationFailed,
    #[error("operation cancelled")]
    Cancelled,
}

/// Receives one message, racing the read against the cancellation token.
pub(crate) async fn recv<S>(stream: &mut S, cancel: &CancellationToken) -> Result<Message, SessionError>
where
    S: AsyncRead + Unpin,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        message = framing::read_message(stream) => Ok(message?),
    }
}

/// Sends one message, racing the write against the cancellation token.
pub(crate) async fn send<S>(stream: &mut S, cancel: &CancellationToken, message: &Message) -> Result<(), SessionError>
where
    S: AsyncWrite + Unpin,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = framing::write_message(stream, message) => Ok(result?),
    }
}

/// Refuses an inbound commissioning attempt while another one holds the
/// lock. The hint tells the peer when to retry, in milliseconds.
pub async fn reject_busy<S>(
    stream: &mut S,
    cancel: &CancellationToken,
    retry_after_ms: u32,
) -> Result<(), SessionError>
where
    S: AsyncWrite + Unpin,
{
    let message = Message::CommissioningError(
        CommissioningError::new(ErrorCode::Busy, "commissioning already in progress").with_retry_after(retry_after_ms),
    );

    send(stream, cancel, &message).await
}
