use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for Meridian.
///
/// Each subsystem defines its own error variant. The dispatch layer matches
/// on these to decide what the user sees; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum MeridianError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Durable store ────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Model backend ────────────────────────────────────────────────────
    #[error("model: {0}")]
    Model(#[from] ModelError),

    // ── Web search ───────────────────────────────────────────────────────
    #[error("search: {0}")]
    Search(#[from] SearchError),

    // ── Chat platform ────────────────────────────────────────────────────
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Durable store errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient connection trouble that survived every retry attempt.
    #[error("store unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    /// Non-transient database failure (malformed query, constraint, decode).
    #[error("query failed: {0}")]
    Query(String),
}

// ─── Model backend errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("file {name} not active after {attempts} polls")]
    FileActivation { name: String, attempts: u32 },

    #[error("empty response from model")]
    EmptyResponse,
}

// ─── Search errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("request failed: {0}")]
    Request(String),
}

// ─── Channel errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("send failed ({status}): {message}")]
    Send { status: u16, message: String },

    #[error("file download failed: {0}")]
    Download(String),

    #[error("transport: {0}")]
    Transport(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, MeridianError>;
