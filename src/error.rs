use crate::dispatch::DispatchError;
use crate::settings::SettingsError;
use crate::volume::npy::NpyError;
use crate::volume::{AssembleError, DecodeError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Npy(#[from] NpyError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
