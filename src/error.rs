use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("failed to read input file {path}: {message}")]
    InputRead { path: PathBuf, message: String },

    #[error("species {0} has no accessions")]
    EmptyBatch(String),

    #[error("species name has no alphanumeric characters: {0:?}")]
    InvalidSpeciesName(String),

    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("accession {0} matches neither run (SRR/ERR/DRR) nor experiment (SRX/ERX/DRX) prefixes")]
    #[diagnostic(help("the first accession of a line decides whether the whole line is run or experiment based"))]
    UnknownAccessionPrefix(String),

    #[error("species {species}: accession {accession} is not a {expected} accession")]
    #[diagnostic(help("run and experiment accessions cannot be mixed on one line"))]
    MixedAccessions {
        species: String,
        accession: String,
        expected: String,
    },

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("config file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("unexpected NCBI response: {0}")]
    NcbiResponse(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("archive directory missing after prefetch: {0}")]
    MissingArchive(PathBuf),

    #[error("layout of {0} could not be resolved")]
    UnresolvedLayout(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    /// Fatal errors stop the whole batch; everything else only skips the current unit.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            KiraError::NcbiHttp(_)
                | KiraError::NcbiStatus { .. }
                | KiraError::NcbiResponse(_)
                | KiraError::ToolFailed { .. }
                | KiraError::MissingArchive(_)
                | KiraError::UnresolvedLayout(_)
        )
    }
}
