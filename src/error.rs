// error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Message broker unreachable: {0}")]
    BrokerUnreachable(String),
    #[error("Frame read failure: {0}")]
    FrameReadFailure(String),
    #[error("Settings decode error: {0}")]
    MessageDecode(String),
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}
