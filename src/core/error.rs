use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// HTTP framing errors
// ---------------------------------------------------------------------------

/// Errors raised while reading one HTTP request off the wire.
///
/// `BodyTooLarge` is deliberately its own variant so the session can map it
/// to `413` while every other framing defect maps to `400`.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request body of {length} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { length: u64, limit: u64 },

    #[error("malformed request: {reason}")]
    Malformed { reason: String },

    #[error("connection closed before a complete request was read")]
    UnexpectedEof,

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Archive extraction errors
// ---------------------------------------------------------------------------

/// Errors from unpacking an uploaded archive into staging.
///
/// Per-entry write failures are not represented here; the extractor logs and
/// skips those. Only defects that invalidate the whole archive surface.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to open archive {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("archive entry {entry:?} escapes the staging directory")]
    PathEscape { entry: PathBuf },

    #[error("archive read failed: {0}")]
    Archive(std::io::Error),
}

// ---------------------------------------------------------------------------
// Upload pipeline errors
// ---------------------------------------------------------------------------

/// Terminal outcomes of the upload pipeline, mapped to HTTP statuses by the
/// session. Every variant implies staging and the uploaded archive have been
/// cleaned up and the permanent tree is untouched.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to write uploaded archive to disk: {0}")]
    ArchiveWrite(std::io::Error),

    #[error("uploaded archive is empty or missing")]
    EmptyUpload,

    #[error("archive is invalid or yielded no entries: {reason}")]
    InvalidArchive { reason: String },

    #[error("no valid files remained after validation")]
    NoValidFiles,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("upload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// HTTP status the session answers with for this failure.
    pub fn status(&self) -> u16 {
        match self {
            UploadError::EmptyUpload
            | UploadError::InvalidArchive { .. }
            | UploadError::NoValidFiles => 400,
            UploadError::ArchiveWrite(_) | UploadError::Storage(_) | UploadError::Io(_) => 500,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage layout errors
// ---------------------------------------------------------------------------

/// Errors from the on-disk layout: staging creation, promotion, listing.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to move {from:?} into permanent storage: {source}")]
    Rename {
        from: PathBuf,
        source: std::io::Error,
    },

    #[error("storage root {path:?} is missing or unreadable: {source}")]
    ListRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Metadata intake errors
// ---------------------------------------------------------------------------

/// Errors from the TOML metadata upload endpoint.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("TOML parse failed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("metadata document has an empty audio path")]
    MissingPath,
}

// ---------------------------------------------------------------------------
// Listener errors
// ---------------------------------------------------------------------------

/// Fatal errors bringing the listener up.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("another instance already holds the lock at {path:?}: {source}")]
    LockHeld {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid bind address {addr}: {source}")]
    BindAddr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

// ---------------------------------------------------------------------------
// TLS bootstrap errors
// ---------------------------------------------------------------------------

/// Errors building the TLS server context from PEM material at startup.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificates found in {path:?}")]
    NoCertificate { path: PathBuf },

    #[error("no private key found in {path:?}")]
    NoPrivateKey { path: PathBuf },

    #[error("invalid certificate or key: {0}")]
    Config(#[from] rustls::Error),
}
