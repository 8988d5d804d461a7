/// Failures at the backend-adapter boundary. Transport failures are the
/// adapter call itself breaking (spawn, pipe, process); protocol failures
/// are the backend answering without the expected shape. Both reach the
/// reducer as plain message strings and reset only the affected thread.
#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Protocol(String),
}

impl AdapterError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        AdapterError::Transport(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        AdapterError::Protocol(err.to_string())
    }
}
