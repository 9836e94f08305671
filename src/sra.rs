use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tracing::debug;

use crate::domain::Accession;
use crate::error::KiraError;

pub const PREFETCH: &str = "prefetch";
pub const FASTERQ_DUMP: &str = "fasterq-dump";

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub prefetch: Option<String>,
    pub fasterq_dump: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn into_result(self, tool: &str) -> Result<ToolOutput, KiraError> {
        if self.success {
            return Ok(self);
        }
        let message = if self.stderr.trim().is_empty() {
            format!("command failed: {tool}")
        } else {
            self.stderr.trim().to_string()
        };
        Err(KiraError::ToolFailed {
            tool: tool.to_string(),
            message,
        })
    }
}

pub trait SraToolkit: Send + Sync {
    fn prefetch(&self, run: &Accession, out_dir: &Path) -> Result<ToolOutput, KiraError>;
    /// Converts an archive into `<run>.fastq`, or `<run>_1.fastq`/`<run>_2.fastq` when `split`.
    fn fasterq_dump(
        &self,
        archive: &Path,
        out_dir: &Path,
        split: bool,
    ) -> Result<ToolOutput, KiraError>;
    fn tool_info(&self) -> ToolInfo;
}

#[derive(Debug, Clone)]
pub enum SraToolStatus {
    Ready,
    Missing { message: String },
}

#[derive(Clone)]
pub struct SystemSraToolkit {
    prefetch: Option<PathBuf>,
    fasterq_dump: Option<PathBuf>,
}

impl SystemSraToolkit {
    pub fn new() -> Self {
        Self {
            prefetch: find_in_path(PREFETCH),
            fasterq_dump: find_in_path(FASTERQ_DUMP),
        }
    }

    pub fn with_paths(prefetch: Option<PathBuf>, fasterq_dump: Option<PathBuf>) -> Self {
        let defaults = Self::new();
        Self {
            prefetch: prefetch.or(defaults.prefetch),
            fasterq_dump: fasterq_dump.or(defaults.fasterq_dump),
        }
    }

    pub fn tool_status(&self) -> SraToolStatus {
        if self.prefetch.is_none() {
            return SraToolStatus::Missing {
                message: "missing prefetch (SRA Toolkit)".to_string(),
            };
        }
        if self.fasterq_dump.is_none() {
            return SraToolStatus::Missing {
                message: "missing fasterq-dump (SRA Toolkit)".to_string(),
            };
        }
        SraToolStatus::Ready
    }

    fn require(path: Option<&PathBuf>, name: &str) -> Result<PathBuf, KiraError> {
        path.cloned()
            .ok_or_else(|| KiraError::MissingTool(name.to_string()))
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<ToolOutput, KiraError> {
        debug!("exec {} {}", program.display(), args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| KiraError::ToolFailed {
                tool: program.display().to_string(),
                message: err.to_string(),
            })?;
        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

impl Default for SystemSraToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl SraToolkit for SystemSraToolkit {
    fn prefetch(&self, run: &Accession, out_dir: &Path) -> Result<ToolOutput, KiraError> {
        let prefetch = Self::require(self.prefetch.as_ref(), PREFETCH)?;
        let args = vec![
            run.as_str().to_string(),
            "--output-directory".to_string(),
            out_dir.to_string_lossy().to_string(),
        ];
        self.run_cmd(&prefetch, &args)?.into_result(PREFETCH)
    }

    fn fasterq_dump(
        &self,
        archive: &Path,
        out_dir: &Path,
        split: bool,
    ) -> Result<ToolOutput, KiraError> {
        let fasterq = Self::require(self.fasterq_dump.as_ref(), FASTERQ_DUMP)?;
        let mut args = vec![
            archive.to_string_lossy().to_string(),
            "--outdir".to_string(),
            out_dir.to_string_lossy().to_string(),
        ];
        if split {
            args.push("--split-files".to_string());
        }
        self.run_cmd(&fasterq, &args)?.into_result(FASTERQ_DUMP)
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            prefetch: self
                .prefetch
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
            fasterq_dump: self
                .fasterq_dump
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
        }
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() { None } else { Some(stdout) }
}
