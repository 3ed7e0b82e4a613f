//! External command processor
//!
//! Runs a configured command line once per item. The template is split with
//! shell-word rules and each word may reference `{name}`, `{path}`, `{unit}`,
//! `{rfi_dir}`, `{state_dir}` or `{kind}`.

use super::{ItemJob, ItemProcessor};
use crate::checkpoint::ItemMetadata;
use crate::error::{PipelineError, PipelineResult};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandProcessor {
    template: Vec<String>,
}

impl CommandProcessor {
    /// Parse a command template, rejecting empty or unbalanced quoting
    pub fn from_template(template: &str) -> PipelineResult<Self> {
        let words = shell_words::split(template).map_err(|e| {
            PipelineError::config(format!("invalid command template {:?}: {}", template, e))
        })?;
        if words.is_empty() {
            return Err(PipelineError::config("command template is empty"));
        }
        Ok(Self { template: words })
    }

    /// Concrete argv for one item
    pub fn render(&self, job: &ItemJob<'_>) -> Vec<String> {
        let path = job.item.path.display().to_string();
        let rfi_dir = job.unit.rfi_dir.display().to_string();
        let state_dir = job.unit.state_dir.display().to_string();
        let kind = job.kind.to_string();

        self.template
            .iter()
            .map(|word| {
                word.replace("{name}", &job.item.name)
                    .replace("{path}", &path)
                    .replace("{unit}", &job.unit.id)
                    .replace("{rfi_dir}", &rfi_dir)
                    .replace("{state_dir}", &state_dir)
                    .replace("{kind}", &kind)
            })
            .collect()
    }
}

#[async_trait]
impl ItemProcessor for CommandProcessor {
    async fn process(&self, job: ItemJob<'_>) -> Result<ItemMetadata> {
        let argv = self.render(&job);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("command template rendered to nothing"))?;

        debug!(item = %job.item.name, "Running {}", shell_words::join(&argv));
        let started = Instant::now();

        let output = Command::new(program)
            .args(args)
            .current_dir(&job.unit.state_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", program))?;

        let duration = started.elapsed();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                program,
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "a signal".to_string()),
                stderr_tail(&stderr)
            ));
        }

        Ok(ItemMetadata::new(job.item.name.clone())
            .with("path", job.item.path.display().to_string())
            .with("kind", job.kind.to_string())
            .with("exit_code", output.status.code().unwrap_or(0))
            .with("duration_ms", duration.as_millis() as u64))
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
