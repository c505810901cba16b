use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CensusError {
    #[error("Config: {0}")]
    Config(#[from] ConfigError),

    #[error("Workspace: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Mapper: {0}")]
    Mapper(#[from] MapperError),

    #[error("Request: {0}")]
    Request(#[from] RequestError),

    #[error("Upload store: {0}")]
    Store(#[from] StoreError),

    #[error("Database: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {message}")]
    Validation { message: String },

    #[error("Invalid portal '{id}': {reason}")]
    InvalidPortal { id: String, reason: String },

    #[error("Failed to open log file '{path}': {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install logger: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Cannot create {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Census file is not valid base64: {0}")]
    DecodeInput(#[from] base64::DecodeError),

    #[error("Census file is empty")]
    EmptyInput,

    #[error("Output file not found: {0}")]
    OutputMissing(PathBuf),

    #[error("Output file is empty: {0}")]
    OutputEmpty(PathBuf),

    #[error("Output file '{path}' could not be read: {source}")]
    OutputLocked {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output file '{path}' was still changing after {polls} polls")]
    Unstable { path: PathBuf, polls: u32 },
}

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Mapper command is empty")]
    EmptyCommand,

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to encode auxiliary data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Portal list is missing")]
    MissingPortals,

    #[error("Portal list is not valid JSON: {0}")]
    PortalsJson(#[source] serde_json::Error),

    #[error("Portal list must be an array of strings, got {0}")]
    PortalsShape(String),

    #[error("Auxiliary data is not valid JSON: {0}")]
    OtherDataJson(#[source] serde_json::Error),

    #[error("Auxiliary data must be a JSON object, got {0}")]
    OtherDataShape(String),

    #[error("Unknown upload status: {0}")]
    UnknownStatus(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Upload {id} has an invalid row: {reason}")]
    InvalidRow { id: i64, reason: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(crate::db::DatabaseError::Sqlite(e))
    }
}

pub type Result<T> = std::result::Result<T, CensusError>;
