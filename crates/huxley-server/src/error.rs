use thiserror::Error;

use crate::crypto::CryptoError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("store error: {0}")]
    Store(#[from] huxley_store::StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
