use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    /// Interval with `start >= end`.
    InvalidRange { start: Ms, end: Ms },
    /// Availability window with `start >= end`.
    InvalidWindow { start: Ms, end: Ms },
    HostNotFound(String),
    SlotUnavailable,
    NotFound(Ulid),
    Unauthorized,
    AlreadyExists(String),
    InvalidSlug(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable name of the error.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::InvalidWindow { .. } => "invalid_window",
            EngineError::HostNotFound(_) => "host_not_found",
            EngineError::SlotUnavailable => "slot_unavailable",
            EngineError::NotFound(_) => "not_found",
            EngineError::Unauthorized => "unauthorized",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidSlug(_) => "invalid_slug",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "internal",
        }
    }

    /// SQLSTATE reported to pgwire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. }
            | EngineError::InvalidWindow { .. }
            | EngineError::InvalidSlug(_) => "22023",
            EngineError::HostNotFound(_) | EngineError::NotFound(_) => "P0002",
            EngineError::SlotUnavailable => "23P01",
            EngineError::Unauthorized => "42501",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "XX000",
        }
    }

    /// Everything except store failures is the caller's fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range [{start}, {end}): start must be before end")
            }
            EngineError::InvalidWindow { start, end } => {
                write!(f, "invalid window [{start}, {end}): start must be before end")
            }
            EngineError::HostNotFound(slug) => write!(f, "host not found: {slug}"),
            EngineError::SlotUnavailable => write!(f, "This slot is no longer available."),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Unauthorized => write!(f, "not authorized for this host"),
            EngineError::AlreadyExists(slug) => write!(f, "already exists: {slug}"),
            EngineError::InvalidSlug(slug) => write!(f, "invalid slug: {slug:?}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
