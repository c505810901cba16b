use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use super::{CensusMapper, MapperContext};
use crate::error::MapperError;

pub const ENV_STAGING_DIR: &str = "CENSUS_STAGING_DIR";
pub const ENV_OUTPUT_DIR: &str = "CENSUS_OUTPUT_DIR";
pub const ENV_OUTPUT_FILE: &str = "CENSUS_OUTPUT_FILE";
pub const ENV_OTHER_DATA: &str = "CENSUS_OTHER_DATA";
pub const ENV_EFFECTIVE_DATE: &str = "CENSUS_EFFECTIVE_DATE";

/// Lines of stderr kept in the error when the program fails.
const STDERR_TAIL_LINES: usize = 20;

/// Runs an external mapping program.
///
/// The processing id is appended as the last argument; paths and auxiliary
/// data are passed through `CENSUS_*` environment variables.
#[derive(Debug, Clone)]
pub struct CommandMapper {
    name: String,
    program: String,
    args: Vec<String>,
    accepts_auxiliary_data: bool,
}

impl CommandMapper {
    pub fn new(
        name: impl Into<String>,
        command: &[String],
        accepts_auxiliary_data: bool,
    ) -> Result<Self, MapperError> {
        let (program, args) = command.split_first().ok_or(MapperError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(MapperError::EmptyCommand);
        }

        Ok(Self {
            name: name.into(),
            program: program.clone(),
            args: args.to_vec(),
            accepts_auxiliary_data,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl CensusMapper for CommandMapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_auxiliary_data(&self) -> bool {
        self.accepts_auxiliary_data
    }

    async fn run(&self, ctx: &MapperContext<'_>) -> Result<(), MapperError> {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .arg(ctx.processing_id)
            .env(ENV_STAGING_DIR, ctx.staging_dir)
            .env(ENV_OUTPUT_DIR, ctx.output_dir)
            .env(ENV_OUTPUT_FILE, ctx.output_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(aux) = ctx.auxiliary {
            cmd.env(ENV_OTHER_DATA, aux.to_json()?);
            if let Some(date) = aux.effective_date() {
                cmd.env(ENV_EFFECTIVE_DATE, date);
            }
        }

        log::debug!("Running mapper '{}': {} {:?}", self.name, self.program, self.args);

        let output = cmd.output().await.map_err(|e| MapperError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            log::debug!("[{}] {}", self.name, line);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.trim().lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(MapperError::ExitStatus {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        Ok(())
    }
}
