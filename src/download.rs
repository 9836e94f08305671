use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::domain::{DownloadUnit, Layout};
use crate::error::KiraError;
use crate::fs_util;
use crate::sra::SraToolkit;

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: Utf8PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn species_dir(&self, species: &str) -> Utf8PathBuf {
        self.root.join(species)
    }

    pub fn runinfo_path(&self, species: &str) -> Utf8PathBuf {
        self.species_dir(species)
            .join(format!("{species}_runinfo.csv"))
    }

    pub fn error_log_path(&self, species: &str) -> Utf8PathBuf {
        self.species_dir(species)
            .join(format!("{species}_runinfo.err"))
    }

    pub fn archive_dir(&self, unit: &DownloadUnit) -> Utf8PathBuf {
        self.species_dir(&unit.species).join(unit.run.as_str())
    }

    pub fn converted_paths(&self, unit: &DownloadUnit) -> Vec<Utf8PathBuf> {
        let dir = self.species_dir(&unit.species);
        mate_suffixes(unit.layout)
            .iter()
            .map(|suffix| dir.join(format!("{}{suffix}.fastq", unit.run)))
            .collect()
    }

    pub fn final_paths(&self, unit: &DownloadUnit) -> Vec<Utf8PathBuf> {
        let stem = unit.output_stem();
        mate_suffixes(unit.layout)
            .iter()
            .map(|suffix| self.root.join(format!("{stem}{suffix}.fastq")))
            .collect()
    }
}

pub fn mate_suffixes(layout: Layout) -> &'static [&'static str] {
    match layout {
        Layout::Paired => &["_1", "_2"],
        Layout::Single | Layout::Unknown => &[""],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Converted,
    Skipped,
    Planned,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub run: String,
    pub experiment: Option<String>,
    pub layout: Layout,
    pub status: UnitStatus,
    pub outputs: Vec<String>,
    pub reason: Option<String>,
}

impl UnitReport {
    pub fn skipped(unit: &DownloadUnit, reason: impl Into<String>) -> Self {
        Self {
            run: unit.run.to_string(),
            experiment: unit.experiment.as_ref().map(ToString::to_string),
            layout: unit.layout,
            status: UnitStatus::Skipped,
            outputs: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    fn with_outputs(unit: &DownloadUnit, status: UnitStatus, outputs: &[Utf8PathBuf]) -> Self {
        Self {
            run: unit.run.to_string(),
            experiment: unit.experiment.as_ref().map(ToString::to_string),
            layout: unit.layout,
            status,
            outputs: outputs.iter().map(ToString::to_string).collect(),
            reason: None,
        }
    }
}

pub fn download_run<S: SraToolkit + ?Sized>(
    toolkit: &S,
    layout: &OutputLayout,
    unit: &DownloadUnit,
    config: &PipelineConfig,
) -> Result<UnitReport, KiraError> {
    let targets = layout.final_paths(unit);

    if config.dry_run {
        info!("plan {} ({}) -> {}", unit.run, unit.layout, join_paths(&targets));
        return Ok(UnitReport::with_outputs(unit, UnitStatus::Planned, &targets));
    }

    if config.skip_existing && targets.iter().all(|path| path.as_std_path().is_file()) {
        info!("{}: outputs already present, skipping", unit.run);
        return Ok(UnitReport {
            reason: Some("outputs already present".to_string()),
            ..UnitReport::with_outputs(unit, UnitStatus::Skipped, &targets)
        });
    }

    let species_dir = layout.species_dir(&unit.species);
    fs_util::ensure_dir(&species_dir)?;

    info!("{}: prefetch", unit.run);
    if let Err(err) = toolkit.prefetch(&unit.run, species_dir.as_std_path()) {
        return skip_or_propagate(unit, err);
    }

    let archive = layout.archive_dir(unit);
    if !archive.as_std_path().is_dir() {
        let err = KiraError::MissingArchive(archive.into_std_path_buf());
        return skip_or_propagate(unit, err);
    }

    let split = unit.layout == Layout::Paired;
    info!(
        "{}: fasterq-dump ({})",
        unit.run,
        if split { "split" } else { "single" }
    );
    if let Err(err) = toolkit.fasterq_dump(archive.as_std_path(), species_dir.as_std_path(), split)
    {
        return skip_or_propagate(unit, err);
    }

    let mut moved = Vec::new();
    for (source, dest) in layout.converted_paths(unit).iter().zip(&targets) {
        match fs_util::move_file(source, dest) {
            Ok(()) => moved.push(dest.clone()),
            Err(err) => warn!("{}: could not move {source} to {dest}: {err}", unit.run),
        }
    }
    if moved.is_empty() {
        warn!("{}: conversion produced no output files; skipping run", unit.run);
        return Ok(UnitReport::skipped(
            unit,
            "conversion produced no output files",
        ));
    }
    info!("{}: wrote {}", unit.run, join_paths(&moved));
    Ok(UnitReport::with_outputs(unit, UnitStatus::Converted, &moved))
}

fn skip_or_propagate(unit: &DownloadUnit, err: KiraError) -> Result<UnitReport, KiraError> {
    if err.is_fatal() {
        return Err(err);
    }
    warn!("{}: {err}; skipping run", unit.run);
    Ok(UnitReport::skipped(unit, err.to_string()))
}

fn join_paths(paths: &[Utf8PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
