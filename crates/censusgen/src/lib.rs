pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod pipeline;
pub mod portal;
pub mod request;
pub mod store;
pub mod worker;
pub mod workspace;

pub use config::{load_config, Config};
pub use error::{
    CensusError, ConfigError, MapperError, RequestError, Result, StoreError, WorkspaceError,
};
pub use mapper::{CensusMapper, CommandMapper, FnMapper, MapperContext};
pub use pipeline::{FailureReason, MappingInvoker, PortalOutcome, RequestReport};
pub use portal::{PortalRegistry, PortalResolver};
pub use request::{AuxiliaryData, UploadRequest, UploadStatus};
pub use store::{SqliteUploadStore, UploadStore};
pub use worker::{CensusWorker, PollOutcome};
pub use workspace::WorkspacePreparer;
