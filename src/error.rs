//! Error type for session operations.

use thiserror::Error;

use crate::link::LinkError;
use crate::roster::RosterError;
use crate::tally::TallyError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Tally(#[from] TallyError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
