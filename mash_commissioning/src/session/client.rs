use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use mash_common::cancel::CancellationToken;

use crate::messages::{ErrorCode, Message, PaseConfirm, PaseRequest};
use crate::setup_code::SetupCode;
use crate::spake2p::{SharedSecret, Spake2pClient, Spake2pError};

use super::{recv, send, SessionError};

/// The controller side of one PASE handshake.
pub struct PaseClient {
    engine: Spake2pClient,
    client_identity: Vec<u8>,
}

impl PaseClient {
    pub fn new(
        setup_code: &SetupCode,
        client_identity: impl Into<Vec<u8>>,
        server_identity: impl Into<Vec<u8>>,
    ) -> Result<Self, Spake2pError> {
        let client_identity = client_identity.into();
        let engine = Spake2pClient::new(setup_code, client_identity.clone(), server_identity)?;

        Ok(PaseClient {
            engine,
            client_identity,
        })
    }

    /// Runs the full handshake and returns the 32-byte session secret.
    ///
    /// Consumes the session: the underlying engine is single-use. Every
    /// network operation races `cancel`; a cancelled handshake returns
    /// [`SessionError::Cancelled`] and the session state is discarded.
    pub async fn handshake<S>(mut self, stream: &mut S, cancel: &CancellationToken) -> Result<SharedSecret, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("sending PASE request");
        let request = Message::PaseRequest(PaseRequest {
            public_value: self.engine.public_value(),
            client_identity: self.client_identity.clone(),
        });
        send(stream, cancel, &request).await?;

        let public_value = match recv(stream, cancel).await? {
            Message::PaseResponse(response) => response.public_value,
            Message::CommissioningError(error) => {
                return Err(SessionError::Server {
                    code: error.error_code,
                    message: error.message,
                });
            }
            other => return Err(SessionError::UnexpectedMessage(other.message_type())),
        };

        self.engine.process_server_value(&public_value)?;

        debug!("sending PASE confirmation");
        let confirm = Message::PaseConfirm(PaseConfirm {
            confirmation: self.engine.confirmation()?,
        });
        send(stream, cancel, &confirm).await?;

        let complete = match recv(stream, cancel).await? {
            Message::PaseComplete(complete) => complete,
            other => return Err(SessionError::UnexpectedMessage(other.message_type())),
        };
        if complete.error_code != ErrorCode::Success {
            return Err(SessionError::PaseFailed(complete.error_code));
        }

        self.engine
            .verify_peer_confirmation(&complete.confirmation)
            .map_err(|_| SessionError::ConfirmationFailed)?;

        debug!("PASE handshake complete");
        Ok(self.engine.shared_secret()?)
    }
}
