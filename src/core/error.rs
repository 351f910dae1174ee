use thiserror::Error;

/// Session-aborting extraction failures. Callers collapse these into a single
/// "no media found" signal for the user; the concrete cause is only logged.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to load page: {0}")]
    Load(String),

    #[error("unexpected message from page: {0}")]
    Protocol(String),

    #[error("page never produced an extraction result")]
    Timeout,

    #[error("extraction superseded by a newer request")]
    Superseded,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("storage permission denied")]
    Permission,

    #[error("download cancelled")]
    Cancelled,

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("could not persist file: {0}")]
    Persistence(String),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive build cancelled")]
    Cancelled,

    #[error("none of the requested files could be downloaded")]
    NothingDownloaded,

    #[error("container write failed: {0}")]
    Container(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
