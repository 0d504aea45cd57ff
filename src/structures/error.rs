use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connect timed out")]
    ConnectTimeout,

    // Read half is owned by the continuous receive task
    #[error("Receiver busy")]
    ReceiverBusy,

    #[error("Link closed")]
    Closed,
}

pub type TResult<T> = Result<T, LinkError>;
