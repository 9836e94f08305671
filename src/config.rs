use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{Layout, LayoutOverride, UnknownLayoutPolicy};
use crate::error::KiraError;

pub const DEFAULT_CHUNK_SIZE: usize = 350;
pub const DEFAULT_SLEEP_SECS: u64 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub outdir: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub sleep_secs: Option<u64>,
    #[serde(default)]
    pub layout: Option<LayoutOverride>,
    #[serde(default)]
    pub unknown_layout: Option<UnknownLayoutPolicy>,
    #[serde(default)]
    pub skip_existing: Option<bool>,
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub ncbi_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToolPaths {
    #[serde(default)]
    pub prefetch: Option<PathBuf>,
    #[serde(default)]
    pub fasterq_dump: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub outdir: Option<String>,
    pub chunk_size: Option<usize>,
    pub sleep_secs: Option<u64>,
    pub layout: Option<LayoutOverride>,
    pub unknown_layout: Option<UnknownLayoutPolicy>,
    pub skip_existing: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub outdir: Utf8PathBuf,
    pub chunk_size: usize,
    pub sleep: Duration,
    pub forced_layout: Option<Layout>,
    pub unknown_layout: UnknownLayoutPolicy,
    pub skip_existing: bool,
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            outdir: Utf8PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
            sleep: Duration::from_secs(DEFAULT_SLEEP_SECS),
            forced_layout: None,
            unknown_layout: UnknownLayoutPolicy::default(),
            skip_existing: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub pipeline: PipelineConfig,
    pub tools: ToolPaths,
    pub ncbi_api_key: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, KiraError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Config::default(),
        };
        Self::resolve_config(config, overrides)
    }

    pub fn load(path: &str) -> Result<Config, KiraError> {
        let config_path = PathBuf::from(path);
        if !config_path.exists() {
            return Err(KiraError::MissingConfig(config_path));
        }
        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, KiraError> {
        let chunk_size = overrides
            .chunk_size
            .or(config.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(KiraError::InvalidConfig(
                "chunk size must be positive".to_string(),
            ));
        }

        let outdir = overrides
            .outdir
            .or(config.outdir)
            .unwrap_or_else(|| ".".to_string());
        if outdir.trim().is_empty() {
            return Err(KiraError::InvalidConfig(
                "output directory must not be empty".to_string(),
            ));
        }

        let sleep_secs = overrides
            .sleep_secs
            .or(config.sleep_secs)
            .unwrap_or(DEFAULT_SLEEP_SECS);

        let pipeline = PipelineConfig {
            outdir: Utf8PathBuf::from(outdir),
            chunk_size,
            sleep: Duration::from_secs(sleep_secs),
            forced_layout: overrides.layout.or(config.layout).map(Layout::from),
            unknown_layout: overrides
                .unknown_layout
                .or(config.unknown_layout)
                .unwrap_or_default(),
            skip_existing: overrides.skip_existing || config.skip_existing.unwrap_or(false),
            dry_run: overrides.dry_run,
        };

        Ok(ResolvedConfig {
            pipeline,
            tools: config.tools,
            ncbi_api_key: config.ncbi_api_key,
        })
    }
}
