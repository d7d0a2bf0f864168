use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `PiHive`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum HiveError {
    // ── Broker ──────────────────────────────────────────────────────────
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    // ── Client session ──────────────────────────────────────────────────
    #[error("session: {0}")]
    Session(#[from] SessionError),

    // ── Reservations ────────────────────────────────────────────────────
    #[error("reservation: {0}")]
    Reservation(#[from] ReservationError),

    // ── Discovery sidecar ───────────────────────────────────────────────
    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Broker errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to bind broker listener: {0}")]
    Bind(String),

    /// Also the wire-level message for a DM whose target name is unknown.
    #[error("Agent \"{0}\" is not online")]
    AgentNotOnline(String),

    #[error("state lock poisoned: {0}")]
    Lock(String),
}

// ─── Client session errors ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect to broker at {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("no broker URL given and no discovery sidecar found")]
    NoBroker,

    #[error("broker rejected registration: {0}")]
    Register(String),

    #[error("session closed")]
    Closed,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation aborted")]
    Aborted,

    #[error("broker error: {0}")]
    Remote(String),
}

// ─── Reservation errors ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("no paths provided")]
    Empty,

    #[error("{path} is already reserved by {owner}{}", format_reason(.reason))]
    Conflict {
        path: String,
        owner: String,
        reason: Option<String>,
    },
}

fn format_reason(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(" (reason: {reason})"),
        None => String::new(),
    }
}

// ─── Discovery errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("sidecar not found at {0}")]
    NotFound(std::path::PathBuf),

    #[error("sidecar unreadable: {0}")]
    Unreadable(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, HiveError>;
