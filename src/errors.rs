use thiserror::Error;

use crate::fsm::ProtocolError;
use crate::key::KeyError;
use crate::stellar::amount::ParseAmountError;
use crate::stellar::strkey::StrkeyError;

/// Top-level error type for embedding the engine in a driver.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    ParseAmount(#[from] ParseAmountError),

    #[error(transparent)]
    Strkey(#[from] StrkeyError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
