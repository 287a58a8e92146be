//! Core library for kidivis, the visual diff of KiCad designs across Git
//! revisions.
//!
//! The crate is layered around four responsibilities:
//! - revision resolution and historical content extraction
//! - render invocation through an external renderer, behind a shared cache
//! - raster alignment and three-way diff compositing
//! - orchestration of a whole comparison for the serving layer

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::pedantic,
    missing_docs
)]
#![cfg_attr(
    not(test),
    deny(
        clippy::dbg_macro,
        clippy::expect_used,
        clippy::panic,
        clippy::print_stderr,
        clippy::print_stdout,
        clippy::todo,
        clippy::unwrap_used
    )
)]

/// Shared data models re-exported for the serving layer.
pub mod api;
/// Content-addressed render cache with single-flight rendering.
pub mod cache;
/// Raster alignment and diff compositing.
pub mod composite;
/// `kidivis.toml` configuration.
pub mod config;
/// Historical content extraction and content hashing.
pub mod extractor;
/// Render invocation and render results.
pub mod invoker;
/// Tracing subscriber setup.
pub mod logging;
/// Top-level comparison coordinator.
pub mod orchestrator;
/// Git repository access.
pub mod repository;
/// Design file and revision selection.
pub mod resolver;
/// Hierarchical schematic sheet discovery.
pub mod schematic;

pub use api::*;

/// Common result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying git operation failed.
    #[error("git error: {source}")]
    Git {
        /// Original libgit2 error bubbled up by the core library.
        #[from]
        source: git2::Error,
    },
    /// Provided path is not under version control.
    #[error("path is not inside a git repository: {path}")]
    InvalidRepository {
        /// Path that failed to resolve to a repository.
        path: String,
    },
    /// Bare repositories have no working tree to anchor design paths.
    #[error("repository at {path} is bare and unsupported")]
    BareRepository {
        /// Path of the repository lacking a working tree.
        path: String,
    },
    /// Targets or arguments handed to the resolver are unusable.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Human-readable description.
        message: String,
    },
    /// A revision name could not be resolved to a commit.
    #[error("unknown revision '{name}'")]
    UnknownRevision {
        /// Name as given by the caller.
        name: String,
    },
    /// History does not contain the commits needed for a default comparison.
    #[error("insufficient history: {message}")]
    MissingHistory {
        /// Human-readable description.
        message: String,
    },
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path involved in the failed operation.
        path: String,
        /// Source I/O error returned by the standard library.
        #[source]
        source: std::io::Error,
    },
    /// Configuration file could not be parsed or is invalid.
    #[error("invalid configuration {origin}: {message}")]
    Config {
        /// File the configuration came from, or `<inline>`.
        origin: String,
        /// Human-readable description.
        message: String,
    },
    /// Two different rasters were stored under one cache key. Rendering is
    /// assumed deterministic, so this indicates a bug or a lying renderer.
    #[error("render cache key {key} already holds a different raster")]
    CacheKeyConflict {
        /// Display form of the conflicting key.
        key: String,
    },
    /// Internal invariant failed.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string_lossy().into_owned(),
            source,
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}
