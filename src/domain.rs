use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const RUN_PREFIXES: [&str; 3] = ["SRR", "ERR", "DRR"];
pub const EXPERIMENT_PREFIXES: [&str; 3] = ["SRX", "ERX", "DRX"];

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}[0-9]+$").expect("static accession regex"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> AccessionKind {
        let prefix = &self.0[..3.min(self.0.len())];
        if RUN_PREFIXES.contains(&prefix) {
            AccessionKind::Run
        } else if EXPERIMENT_PREFIXES.contains(&prefix) {
            AccessionKind::Experiment
        } else {
            AccessionKind::Invalid
        }
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        if !ACCESSION_RE.is_match(&normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessionKind {
    Run,
    Experiment,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    Run,
    Experiment,
}

impl BatchMode {
    pub fn kind(self) -> AccessionKind {
        match self {
            BatchMode::Run => AccessionKind::Run,
            BatchMode::Experiment => AccessionKind::Experiment,
        }
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::Run => write!(f, "run"),
            BatchMode::Experiment => write!(f, "experiment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Layout {
    Single,
    Paired,
    Unknown,
}

impl Layout {
    pub fn from_runinfo(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "paired" => Layout::Paired,
            "single" => Layout::Single,
            _ => Layout::Unknown,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Single => write!(f, "SINGLE"),
            Layout::Paired => write!(f, "PAIRED"),
            Layout::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LayoutOverride {
    Single,
    Paired,
}

impl From<LayoutOverride> for Layout {
    fn from(value: LayoutOverride) -> Self {
        match value {
            LayoutOverride::Single => Layout::Single,
            LayoutOverride::Paired => Layout::Paired,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownLayoutPolicy {
    #[default]
    AssumeSingle,
    AssumePaired,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesBatch {
    pub name: String,
    pub accessions: Vec<Accession>,
}

impl SpeciesBatch {
    pub fn sanitized_name(&self) -> Result<String, KiraError> {
        sanitize_species_name(&self.name)
    }
}

pub fn sanitize_species_name(name: &str) -> Result<String, KiraError> {
    let sanitized: String = name.chars().filter(|ch| ch.is_alphanumeric()).collect();
    if sanitized.is_empty() {
        return Err(KiraError::InvalidSpeciesName(name.to_string()));
    }
    Ok(sanitized)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadUnit {
    pub run: Accession,
    pub layout: Layout,
    pub species: String,
    pub experiment: Option<Accession>,
}

impl DownloadUnit {
    pub fn output_stem(&self) -> String {
        match &self.experiment {
            Some(experiment) => format!("{}_{}_{}", self.species, experiment, self.run),
            None => format!("{}_{}", self.species, self.run),
        }
    }
}
