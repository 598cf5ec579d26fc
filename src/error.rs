use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessengerError {
    /// No free TCP port in the configured range. Fatal at startup.
    #[error("Bind failed: no free port in {first}..={last}: {source}")]
    Bind {
        first: u16,
        last: u16,
        #[source]
        source: std::io::Error,
    },

    /// Discovery sockets could not be set up.
    #[error("Discovery setup failed on port {port}: {source}")]
    Discovery {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MessengerResult<T> = Result<T, MessengerError>;
