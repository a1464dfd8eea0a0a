//! Account authority seam used during the session handshake.
use thiserror::Error;

use tmsrv_primitives::AccountId;

use crate::packets::TICKET_LEN;

/// Why a handshake was refused. `Banned` is checked before the ticket so a
/// banned account learns nothing about ticket validity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum AuthRefusal {
    #[error("account or ticket not recognized")]
    BadTicket,
    #[error("account, character or address is banned")]
    Banned,
    #[error("account authority unavailable")]
    Unavailable,
}

/// Verifies login tickets issued by the external account server. The
/// implementation also owns the handshake-time ban check.
#[async_trait::async_trait]
pub trait AccountAuthority: Send + Sync + 'static {
    async fn verify_ticket(
        &self,
        account: &str,
        ticket: [u8; TICKET_LEN],
        address: &str,
    ) -> Result<AccountId, AuthRefusal>;
}
