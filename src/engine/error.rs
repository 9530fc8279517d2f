use ulid::Ulid;

use crate::model::Conflict;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed or past-dated interval, or an otherwise invalid request.
    Validation(&'static str),
    Conflict(Conflict),
    InvalidTransition {
        id: Ulid,
        from: &'static str,
        to: &'static str,
    },
    NotRequester {
        id: Ulid,
        requester_id: Ulid,
    },
    HasClaims(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Conflict(c) => write!(f, "conflict with {}: {}", c.kind, c.id),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "cannot move {id} from {from} to {to}")
            }
            EngineError::NotRequester { id, requester_id } => {
                write!(f, "{requester_id} did not request reservation {id}")
            }
            EngineError::HasClaims(id) => {
                write!(f, "cannot delete resource {id}: has reservations or service windows")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
