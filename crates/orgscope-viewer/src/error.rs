//! Error types for the viewer binary.
//!
//! [`ViewerError`] is the top-level error type that wraps every failure
//! mode of the subcommands so `main` can propagate with `?`.

/// Top-level error for the viewer binary.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: orgscope_core::config::ConfigError,
    },

    /// A genome file could not be read.
    #[error("failed to read genome file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A `.org` genome file is malformed.
    #[error("genome file error: {source}")]
    Org {
        /// The underlying parse error.
        #[from]
        source: orgscope_vm::org::OrgParseError,
    },

    /// The genome could not be captured.
    #[error("capture error: {source}")]
    Capture {
        /// The underlying capture error.
        #[from]
        source: orgscope_core::capture::CaptureError,
    },

    /// The run-event listener failed.
    #[error("listener error: {source}")]
    Listener {
        /// The underlying listener error.
        #[from]
        source: orgscope_core::listener::ListenerError,
    },

    /// The population run failed.
    #[error("run error: {source}")]
    Run {
        /// The underlying run error.
        #[from]
        source: orgscope_core::run::RunError,
    },

    /// The cursor session ended early.
    #[error("session error: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: orgscope_core::session::SessionClosed,
    },

    /// The cursor session task failed.
    #[error("session task failed: {source}")]
    Join {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// Output could not be serialized.
    #[error("serialization error: {source}")]
    Json {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },
}
