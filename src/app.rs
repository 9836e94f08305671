use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::classify::classify_batch;
use crate::config::PipelineConfig;
use crate::domain::{Accession, BatchMode, DownloadUnit, Layout, SpeciesBatch};
use crate::download::{OutputLayout, UnitReport, UnitStatus, download_run};
use crate::error::KiraError;
use crate::fs_util;
use crate::input::BatchReader;
use crate::layout::{apply_unknown_policy, expand_experiment, resolve_run_layout};
use crate::metadata::{MetadataClient, RunInfoTable, fetch_species_metadata};
use crate::sra::SraToolkit;

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: String,
    pub finished_at: String,
    pub species: Vec<SpeciesReport>,
}

impl BatchReport {
    pub fn count(&self, status: UnitStatus) -> usize {
        self.species
            .iter()
            .flat_map(|species| &species.units)
            .filter(|unit| unit.status == status)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeciesReport {
    pub species: String,
    pub sanitized: String,
    pub mode: BatchMode,
    pub metadata_skipped: bool,
    pub metadata_rows: usize,
    pub metadata_failures: usize,
    pub unmatched_experiments: Vec<String>,
    pub units: Vec<UnitReport>,
}

#[derive(Debug, Clone)]
pub struct SpeciesPlan {
    pub batch: SpeciesBatch,
    pub mode: BatchMode,
    pub sanitized: String,
}

impl SpeciesPlan {
    pub fn new(batch: SpeciesBatch) -> Result<Self, KiraError> {
        let mode = classify_batch(&batch)?;
        let sanitized = batch.sanitized_name()?;
        Ok(Self {
            batch,
            mode,
            sanitized,
        })
    }
}

pub struct App<M: MetadataClient, S: SraToolkit> {
    config: PipelineConfig,
    layout: OutputLayout,
    metadata: M,
    toolkit: S,
}

impl<M: MetadataClient, S: SraToolkit> App<M, S> {
    pub fn new(config: PipelineConfig, metadata: M, toolkit: S) -> Self {
        let layout = OutputLayout::new(config.outdir.clone());
        Self {
            config,
            layout,
            metadata,
            toolkit,
        }
    }

    pub fn metadata_client(&self) -> &M {
        &self.metadata
    }

    pub fn toolkit(&self) -> &S {
        &self.toolkit
    }

    pub fn run_file(&self, input: &Path) -> Result<BatchReport, KiraError> {
        let batches = BatchReader::open(input)?.collect::<Result<Vec<_>, KiraError>>()?;
        self.run(batches)
    }

    pub fn run(&self, batches: Vec<SpeciesBatch>) -> Result<BatchReport, KiraError> {
        let started_at = Utc::now().to_rfc3339();
        let plans = batches
            .into_iter()
            .map(SpeciesPlan::new)
            .collect::<Result<Vec<_>, KiraError>>()?;

        fs_util::ensure_dir(self.layout.root())?;
        let mut species = Vec::with_capacity(plans.len());
        for plan in plans {
            species.push(self.process_species(&plan)?);
        }

        let report = BatchReport {
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            species,
        };
        info!(
            "finished {} species: {} converted, {} skipped, {} planned",
            report.species.len(),
            report.count(UnitStatus::Converted),
            report.count(UnitStatus::Skipped),
            report.count(UnitStatus::Planned)
        );
        Ok(report)
    }

    pub fn process_species(&self, plan: &SpeciesPlan) -> Result<SpeciesReport, KiraError> {
        let species = &plan.sanitized;
        info!(
            "species {} ({} {} accessions)",
            plan.batch.name,
            plan.batch.accessions.len(),
            plan.mode
        );
        fs_util::ensure_dir(&self.layout.species_dir(species))?;

        let skip_metadata = self.config.forced_layout.is_some() && plan.mode == BatchMode::Run;
        let (table, metadata_failures) = if skip_metadata {
            info!("layout forced for run accessions, skipping metadata fetch");
            (RunInfoTable::default(), 0)
        } else {
            let summary = fetch_species_metadata(
                &self.metadata,
                &plan.batch.accessions,
                &self.config,
                &self.layout.runinfo_path(species),
                &self.layout.error_log_path(species),
            )?;
            if summary.failures > 0 {
                warn!(
                    "{} of {} metadata chunks failed, see {}",
                    summary.failures,
                    summary.chunks,
                    self.layout.error_log_path(species)
                );
            }
            (summary.table, summary.failures)
        };

        let mut units = Vec::new();
        let mut unmatched_experiments = Vec::new();
        match plan.mode {
            BatchMode::Run => {
                for run in &plan.batch.accessions {
                    let layout = resolve_run_layout(run, &table, self.config.forced_layout);
                    units.push(self.dispatch(run, layout, species, None)?);
                }
            }
            BatchMode::Experiment => {
                for experiment in &plan.batch.accessions {
                    let runs = expand_experiment(experiment, &table, self.config.forced_layout);
                    if runs.is_empty() {
                        warn!("{experiment}: no runs found in metadata, skipping");
                        unmatched_experiments.push(experiment.to_string());
                        continue;
                    }
                    info!("{experiment}: {} run(s)", runs.len());
                    for (run, layout) in &runs {
                        units.push(self.dispatch(run, *layout, species, Some(experiment))?);
                    }
                }
            }
        }

        info!("species {} done", plan.batch.name);
        Ok(SpeciesReport {
            species: plan.batch.name.clone(),
            sanitized: species.clone(),
            mode: plan.mode,
            metadata_skipped: skip_metadata,
            metadata_rows: table.len(),
            metadata_failures,
            unmatched_experiments,
            units,
        })
    }

    fn dispatch(
        &self,
        run: &Accession,
        resolved: Layout,
        species: &str,
        experiment: Option<&Accession>,
    ) -> Result<UnitReport, KiraError> {
        let mut unit = DownloadUnit {
            run: run.clone(),
            layout: resolved,
            species: species.to_string(),
            experiment: experiment.cloned(),
        };
        match apply_unknown_policy(run, resolved, self.config.unknown_layout) {
            Ok(layout) => {
                if resolved == Layout::Unknown {
                    warn!("{run}: layout unknown, assuming {layout}");
                }
                unit.layout = layout;
            }
            Err(err) if !err.is_fatal() => {
                warn!("{err}; skipping run");
                return Ok(UnitReport::skipped(&unit, err.to_string()));
            }
            Err(err) => return Err(err),
        }
        download_run(&self.toolkit, &self.layout, &unit, &self.config)
    }
}
