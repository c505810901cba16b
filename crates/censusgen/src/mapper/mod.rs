//! Per-insurer mapping functions.
//!
//! Every portal's spreadsheet transform sits behind [`CensusMapper`]: it reads
//! the staged input workbook(s) and overwrites one well-known output file.
//! Mappers signal failure only through their `Err` value.

pub mod command;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MapperError;
use crate::request::AuxiliaryData;

pub use command::CommandMapper;

/// Processing id passed to mappers for ordinary uploads.
pub const DEFAULT_PROCESSING_ID: &str = "default";

/// Everything a mapper is told about one invocation.
#[derive(Debug, Clone)]
pub struct MapperContext<'a> {
    pub processing_id: &'a str,
    /// Present only for mappers that accept auxiliary data.
    pub auxiliary: Option<&'a AuxiliaryData>,
    pub staging_dir: &'a Path,
    pub output_dir: &'a Path,
    pub output_file: &'a str,
}

impl MapperContext<'_> {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(self.output_file)
    }
}

#[async_trait]
pub trait CensusMapper: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the request's auxiliary data should be handed to this mapper.
    fn accepts_auxiliary_data(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &MapperContext<'_>) -> Result<(), MapperError>;
}

type BoxedMapperFuture = Pin<Box<dyn Future<Output = Result<(), MapperError>> + Send>>;
type MapperFn = dyn Fn(OwnedContext) -> BoxedMapperFuture + Send + Sync;

/// Owned copy of a [`MapperContext`], handed to closure mappers.
#[derive(Debug, Clone)]
pub struct OwnedContext {
    pub processing_id: String,
    pub auxiliary: Option<AuxiliaryData>,
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_file: String,
}

impl OwnedContext {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }
}

impl From<&MapperContext<'_>> for OwnedContext {
    fn from(ctx: &MapperContext<'_>) -> Self {
        Self {
            processing_id: ctx.processing_id.to_string(),
            auxiliary: ctx.auxiliary.cloned(),
            staging_dir: ctx.staging_dir.to_path_buf(),
            output_dir: ctx.output_dir.to_path_buf(),
            output_file: ctx.output_file.to_string(),
        }
    }
}

/// Adapts an async closure into a [`CensusMapper`], for in-process transforms.
#[derive(Clone)]
pub struct FnMapper {
    name: String,
    accepts_auxiliary_data: bool,
    func: Arc<MapperFn>,
}

impl FnMapper {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(OwnedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MapperError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            accepts_auxiliary_data: false,
            func: Arc::new(move |ctx| Box::pin(func(ctx))),
        }
    }

    pub fn with_auxiliary_data(mut self, accepts: bool) -> Self {
        self.accepts_auxiliary_data = accepts;
        self
    }
}

impl std::fmt::Debug for FnMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMapper")
            .field("name", &self.name)
            .field("accepts_auxiliary_data", &self.accepts_auxiliary_data)
            .finish()
    }
}

#[async_trait]
impl CensusMapper for FnMapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_auxiliary_data(&self) -> bool {
        self.accepts_auxiliary_data
    }

    async fn run(&self, ctx: &MapperContext<'_>) -> Result<(), MapperError> {
        (self.func)(OwnedContext::from(ctx)).await
    }
}
