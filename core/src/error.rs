//! Error type shared by the storage-facing parts of the crate.
//!
//! Lookup paths deliberately do not use this: a missing entry or an unloaded
//! dictionary is expressed as `None` / an empty iterator, never as an error.

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("user db: {0}")]
    Storage(#[from] redb::Error),

    #[error("key index: {0}")]
    Index(#[from] fst::Error),

    #[error("payload: {0}")]
    Payload(#[from] bincode::Error),

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("snapshot format mismatch: {0}")]
    SnapshotFormat(String),

    #[error("{0}")]
    Other(String),
}
