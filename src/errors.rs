use std::io;

use thiserror::Error;

use crate::rpc::RpcError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] sea_orm::DbErr),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
