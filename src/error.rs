// Error taxonomy for the DBGp client
//
// Engine errors carry the three-digit protocol code from the <error> element;
// everything else maps onto the failure modes of the wire layer.

use thiserror::Error;

pub type DbgpResult<T> = Result<T, DbgpError>;

#[derive(Debug, Error)]
pub enum DbgpError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("operation on destroyed socket")]
    SocketDestroyed,

    #[error("engine error {code} (apperr '{apperr}'): {message}")]
    Engine {
        code: u16,
        apperr: String,
        message: String,
    },

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("base64 decoder error: {0}")]
    Decoder(String),
}

impl DbgpError {
    /// The engine's protocol error code, if this is an engine error.
    pub fn engine_code(&self) -> Option<u16> {
        match self {
            DbgpError::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = DbgpError::Engine {
            code: 301,
            apperr: "x".to_string(),
            message: "Stack depth not found".to_string(),
        };
        assert_eq!(err.engine_code(), Some(301));
        assert!(err.to_string().contains("301"));
        assert!(err.to_string().contains("Stack depth not found"));
    }

    #[test]
    fn test_non_engine_error_has_no_code() {
        let err = DbgpError::NotFound("breakpoint 7".to_string());
        assert_eq!(err.engine_code(), None);
    }
}
