use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use mash_common::cancel::CancellationToken;

use crate::messages::{CommissioningError, ErrorCode, Message, PaseComplete, PaseRequest, PaseResponse};
use crate::spake2p::{SetupVerifier, SharedSecret, Spake2pError, Spake2pServer};

use super::{recv, send, SessionError};

/// The device side of one PASE handshake.
///
/// Split into [`PaseServer::await_initial`] and [`PaseServer::complete`] so
/// an embedding can take its commissioning lock only after a client has
/// actually spoken: an idle inbound connection then never blocks other
/// commissioning attempts. A second connection observed while the lock is
/// held should be refused with [`super::reject_busy`].
pub struct PaseServer {
    engine: Spake2pServer,
}

impl PaseServer {
    pub fn new(verifier: &SetupVerifier, server_identity: impl Into<Vec<u8>>) -> Result<Self, Spake2pError> {
        let engine = Spake2pServer::new(verifier, server_identity)?;

        Ok(PaseServer { engine })
    }

    /// Reads the opening message of a handshake. Requires a `PASERequest`;
    /// anything else is fatal.
    pub async fn await_initial<S>(stream: &mut S, cancel: &CancellationToken) -> Result<PaseRequest, SessionError>
    where
        S: AsyncRead + Unpin,
    {
        match recv(stream, cancel).await? {
            Message::PaseRequest(request) => Ok(request),
            other => Err(SessionError::UnexpectedMessage(other.message_type())),
        }
    }

    /// Runs the rest of the handshake after [`PaseServer::await_initial`].
    pub async fn complete<S>(
        mut self,
        stream: &mut S,
        cancel: &CancellationToken,
        request: PaseRequest,
    ) -> Result<SharedSecret, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Err(error) = self.engine.process_client_value(&request.public_value) {
            warn!("rejecting client public value: {error}");
            // Best effort: the client may already be gone.
            let rejection = Message::CommissioningError(CommissioningError::new(
                ErrorCode::InvalidPublicKey,
                "invalid public key",
            ));
            let _ = send(stream, cancel, &rejection).await;
            return Err(error.into());
        }

        debug!("sending PASE response");
        let response = Message::PaseResponse(PaseResponse {
            public_value: self.engine.public_value(),
        });
        send(stream, cancel, &response).await?;

        let confirm = match recv(stream, cancel).await? {
            Message::PaseConfirm(confirm) => confirm,
            other => return Err(SessionError::UnexpectedMessage(other.message_type())),
        };

        let error_code = match self.engine.verify_peer_confirmation(&confirm.confirmation) {
            Ok(()) => ErrorCode::Success,
            Err(Spake2pError::ConfirmationFailed) => ErrorCode::ConfirmFailed,
            Err(error) => return Err(error.into()),
        };

        let complete = Message::PaseComplete(PaseComplete {
            confirmation: self.engine.confirmation()?,
            error_code,
        });
        send(stream, cancel, &complete).await?;

        if error_code != ErrorCode::Success {
            warn!("client confirmation did not verify");
            return Err(SessionError::ConfirmationFailed);
        }

        debug!("PASE handshake complete");
        Ok(self.engine.shared_secret()?)
    }

    /// Convenience wrapper running [`PaseServer::await_initial`] and
    /// [`PaseServer::complete`] back to back.
    pub async fn handshake<S>(self, stream: &mut S, cancel: &CancellationToken) -> Result<SharedSecret, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = Self::await_initial(stream, cancel).await?;
        self.complete(stream, cancel, request).await
    }
}
