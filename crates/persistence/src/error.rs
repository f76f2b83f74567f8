use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create data directory {0}: {1}")]
    DirCreate(String, std::io::Error),

    #[error("failed to read snapshot file {0}: {1}")]
    Read(String, std::io::Error),

    #[error("failed to write snapshot file {0}: {1}")]
    Write(String, std::io::Error),

    #[error("failed to rename temp file into place for {0}: {1}")]
    Rename(String, std::io::Error),

    #[error("snapshot body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
