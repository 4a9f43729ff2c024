//! Error types for gaze-link

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// gaze-link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (socket connect, read, write)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed or holds invalid values
    #[error("Configuration error: {0}")]
    Config(String),

    /// A protocol line that does not decode into a tagged message
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// An attribute value that cannot be represented on the wire
    #[error("Cannot encode attribute {name}: value contains both quote characters")]
    Unencodable {
        /// Attribute name
        name: String,
    },

    /// A command was issued while no connection is established
    #[error("Not connected to tracker")]
    NotConnected,

    /// No acknowledgment arrived within the wait bound
    #[error("Acknowledgment timeout for {id}")]
    AckTimeout {
        /// Acknowledgment identifier that was awaited
        id: String,
    },

    /// Another request is already waiting on the same acknowledgment id
    #[error("Command already pending for {id}")]
    CommandBusy {
        /// Acknowledgment identifier that is already awaited
        id: String,
    },

    /// A mandatory enable command was never acknowledged
    #[error("Stream configuration failed at {id}")]
    ConfigurationFailed {
        /// Enable command identifier that failed
        id: String,
    },

    /// Calibration attempt could not produce a mapping
    #[error("Calibration failed: {0}")]
    CalibrationFailed(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Worker thread could not be started
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// True for errors that mean the socket is gone and the session must reconnect
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            Error::NotConnected => true,
            _ => false,
        }
    }
}
