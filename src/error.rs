use thiserror::Error;

/// The error taxonomy shared by the dispatcher, the updater scheduler and the session FSM.
///
/// Each variant is one of the propagation boundaries documented for the agent: request-local
/// errors are caught by the dispatcher and turned into a varbind or response error code,
/// cycle-local errors are caught by the updater loop and only ever produce a log line, and
/// connection-local errors are caught by the session FSM and drive a reconnect.
#[derive(Error, Debug)]
pub enum AgentError {
    /// A PDU could not be parsed even though its header was well-formed.
    #[error("malformed PDU body: {0}")]
    ProtocolError(String),

    /// The stream socket to the master agent closed, refused a connection, or timed out.
    #[error("transport error: {0}")]
    TransportError(String),

    /// A backend connect or subscribe call failed.
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// A DB row was missing a field an updater expected.
    #[error("row '{key}' missing field '{field}'")]
    DataShapeError { key: String, field: String },

    /// A sensor or counter value could not be parsed as a number.
    #[error("could not convert value '{raw}' for {what}")]
    ConversionError { raw: String, what: String },

    /// The queried OID is not under any registered subtree.
    #[error("no such object")]
    LookupMiss,

    /// The queried OID is under a registered subtree, but no live sub_id matches.
    #[error("no such instance")]
    InstanceMiss,

    /// A GetNext/GetBulk walk ran past the last entry.
    #[error("end of mib view")]
    EndOfView,

    /// A getter function failed while producing a value for a live sub_id.
    #[error("getter failed at position {index}: {reason}")]
    GetterError { index: usize, reason: String },

    /// Any Set-family PDU; the core never implements writes.
    #[error("not writable")]
    NotWritable,
}

impl AgentError {
    pub fn backend_unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        AgentError::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn data_shape(key: impl Into<String>, field: impl Into<String>) -> Self {
        AgentError::DataShapeError {
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn conversion(raw: impl Into<String>, what: impl Into<String>) -> Self {
        AgentError::ConversionError {
            raw: raw.into(),
            what: what.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
