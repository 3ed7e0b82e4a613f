//! Pipeline configuration loaded from YAML
//!
//! ```yaml
//! store_path: /data/ghrss/obs
//! rfi_path: /data/ghrss/rfi
//! state_path: /data/ghrss/state
//! analysis_dates: ["20230910", "20230911"]
//! pool_width: 4
//! processors:
//!   raw: "raw2fil {path} {rfi_dir}"
//!   prepared: "filtool -f {path} -o {rfi_dir}/{name}"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use crate::error::{PipelineError, PipelineResult};
use crate::model::{Layout, SourceKind, WorkUnit};
use crate::processor::{CommandProcessor, ItemProcessor, Processors};
use crate::source::SourcePatterns;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_raw_extension() -> String {
    SourcePatterns::default().raw_extension
}

fn default_prepared_extension() -> String {
    SourcePatterns::default().prepared_extension
}

/// Command templates per source kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    pub raw: Option<String>,
    pub prepared: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root holding one input directory per date
    pub store_path: PathBuf,
    /// Root for mitigation outputs
    pub rfi_path: PathBuf,
    /// Root for logs, ledgers and checkpoint logs
    pub state_path: PathBuf,
    #[serde(default)]
    pub analysis_dates: Vec<String>,
    /// Process every directory under `store_path` instead of `analysis_dates`
    #[serde(default)]
    pub all_dates: bool,
    #[serde(default = "default_raw_extension")]
    pub raw_extension: String,
    #[serde(default = "default_prepared_extension")]
    pub prepared_extension: String,
    /// Concurrent units per peer; defaults to available parallelism
    #[serde(default)]
    pub pool_width: Option<usize>,
    #[serde(default)]
    pub processors: ProcessorConfig,
}

impl PipelineConfig {
    /// Read, resolve and validate a configuration file
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and resolve a configuration file without validating it
    pub fn read(path: &Path) -> PipelineResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::io("Failed to read configuration", path, e))?;
        let mut config = Self::from_yaml(&contents)
            .map_err(|e| PipelineError::config_at(e.to_string(), path))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.store_path,
            &mut self.rfi_path,
            &mut self.state_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if !self.all_dates && self.analysis_dates.is_empty() {
            return Err(PipelineError::config(
                "analysis_dates is empty and all_dates is off",
            ));
        }
        if let Some(date) = self
            .analysis_dates
            .iter()
            .find(|d| d.is_empty() || d.contains(['/', '\\']) || d.as_str() == "..")
        {
            return Err(PipelineError::config(format!(
                "invalid analysis date {:?}",
                date
            )));
        }
        if self.pool_width == Some(0) {
            return Err(PipelineError::config("pool_width must be at least 1"));
        }
        for (field, ext) in [
            ("raw_extension", &self.raw_extension),
            ("prepared_extension", &self.prepared_extension),
        ] {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(PipelineError::config(format!(
                    "{} must look like \".ext\", got {:?}",
                    field, ext
                )));
            }
        }
        if self.raw_extension == self.prepared_extension {
            return Err(PipelineError::config(
                "raw_extension and prepared_extension must differ",
            ));
        }
        if self.processors.raw.is_none() && self.processors.prepared.is_none() {
            return Err(PipelineError::config(
                "at least one of processors.raw or processors.prepared is required",
            ));
        }
        Ok(())
    }

    pub fn layout(&self) -> Layout {
        Layout {
            store_path: self.store_path.clone(),
            rfi_path: self.rfi_path.clone(),
            state_path: self.state_path.clone(),
        }
    }

    pub fn patterns(&self) -> SourcePatterns {
        SourcePatterns {
            raw_extension: self.raw_extension.clone(),
            prepared_extension: self.prepared_extension.clone(),
        }
    }

    pub fn pool_width(&self) -> usize {
        self.pool_width.unwrap_or_else(crate::pool::default_width)
    }

    /// Build command processors for the configured templates
    pub fn processors(&self) -> PipelineResult<Processors> {
        let build = |template: &Option<String>| -> PipelineResult<Option<Arc<dyn ItemProcessor>>> {
            template
                .as_deref()
                .map(|t| {
                    CommandProcessor::from_template(t)
                        .map(|p| Arc::new(p) as Arc<dyn ItemProcessor>)
                })
                .transpose()
        };
        Ok(Processors::new(
            build(&self.processors.raw)?,
            build(&self.processors.prepared)?,
        ))
    }

    /// Whether a processor template exists for `kind`
    pub fn handles(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Raw => self.processors.raw.is_some(),
            SourceKind::Prepared => self.processors.prepared.is_some(),
            SourceKind::None => false,
        }
    }

    /// Dates to process, in configuration order or sorted when discovered
    pub fn dates(&self) -> PipelineResult<Vec<String>> {
        if !self.all_dates {
            return Ok(self.analysis_dates.clone());
        }

        let entries = std::fs::read_dir(&self.store_path).map_err(|e| {
            PipelineError::io("Failed to list observation directory", &self.store_path, e)
        })?;
        let mut dates: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        dates.sort();
        Ok(dates)
    }

    pub fn units(&self) -> PipelineResult<Vec<WorkUnit>> {
        let layout = self.layout();
        Ok(self
            .dates()?
            .into_iter()
            .map(|date| WorkUnit::new(date, &layout))
            .collect())
    }
}
