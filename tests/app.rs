use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_sra_batch::app::App;
use kira_sra_batch::config::PipelineConfig;
use kira_sra_batch::domain::{Accession, Layout, SpeciesBatch, UnknownLayoutPolicy};
use kira_sra_batch::download::UnitStatus;
use kira_sra_batch::error::KiraError;
use kira_sra_batch::input::parse_line;
use kira_sra_batch::metadata::MetadataClient;
use kira_sra_batch::output::JsonOutput;
use kira_sra_batch::sra::{SraToolkit, ToolInfo, ToolOutput};

const HEADER: &str = "Run,ReleaseDate,LoadDate,spots,bases,spots_with_mates,avgLength,size_MB,AssemblyName,download_path,Experiment,LibraryName,LibraryStrategy,LibrarySelection,LibrarySource,LibraryLayout,Platform";

fn row(run: &str, experiment: &str, layout: &str) -> String {
    format!(
        "{run},2020-01-01,2020-01-02,100,10000,0,100,1,,https://sra.example/{run},{experiment},lib,WGS,RANDOM,GENOMIC,{layout},ILLUMINA"
    )
}

/// Answers each query with the header plus rows whose Run or Experiment is in the chunk.
#[derive(Default)]
struct MockMetadata {
    rows: Vec<String>,
    fail: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockMetadata {
    fn with_rows(rows: Vec<String>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl MetadataClient for MockMetadata {
    fn query_runinfo(&self, accessions: &[Accession]) -> Result<String, KiraError> {
        let ids: Vec<String> = accessions.iter().map(ToString::to_string).collect();
        self.calls.lock().unwrap().push(ids.clone());
        if self.fail {
            return Err(KiraError::NcbiHttp("connection reset".to_string()));
        }
        let mut out = vec![HEADER.to_string()];
        for line in &self.rows {
            let fields: Vec<&str> = line.split(',').collect();
            if ids.iter().any(|id| id == fields[0] || id == fields[10]) {
                out.push(line.clone());
            }
        }
        Ok(out.join("\n"))
    }
}

/// Creates fake archives and FASTQ files the way prefetch/fasterq-dump lay them out.
#[derive(Default)]
struct MockToolkit {
    fail_runs: Vec<String>,
    no_archive_runs: Vec<String>,
    dump_fail_runs: Vec<String>,
    empty_dump_runs: Vec<String>,
    first_mate_only_runs: Vec<String>,
    prefetch_calls: Mutex<Vec<String>>,
    dump_calls: Mutex<Vec<(String, bool)>>,
}

impl MockToolkit {
    fn failing(runs: &[&str]) -> Self {
        Self {
            fail_runs: ids(runs),
            ..Self::default()
        }
    }

    fn prefetch_count(&self) -> usize {
        self.prefetch_calls.lock().unwrap().len()
    }

    fn dumps(&self) -> Vec<(String, bool)> {
        self.dump_calls.lock().unwrap().clone()
    }
}

fn ids(runs: &[&str]) -> Vec<String> {
    runs.iter().map(ToString::to_string).collect()
}

fn listed(runs: &[String], run: &str) -> bool {
    runs.iter().any(|id| id == run)
}

impl SraToolkit for MockToolkit {
    fn prefetch(&self, run: &Accession, out_dir: &Path) -> Result<ToolOutput, KiraError> {
        self.prefetch_calls.lock().unwrap().push(run.to_string());
        if listed(&self.fail_runs, run.as_str()) {
            return Err(KiraError::ToolFailed {
                tool: "prefetch".to_string(),
                message: format!("{run} is not a valid accession"),
            });
        }
        if listed(&self.no_archive_runs, run.as_str()) {
            return Ok(ToolOutput {
                success: true,
                ..ToolOutput::default()
            });
        }
        let archive = out_dir.join(run.as_str());
        fs::create_dir_all(&archive).unwrap();
        fs::write(archive.join(format!("{run}.sra")), b"sra").unwrap();
        Ok(ToolOutput {
            success: true,
            ..ToolOutput::default()
        })
    }

    fn fasterq_dump(
        &self,
        archive: &Path,
        out_dir: &Path,
        split: bool,
    ) -> Result<ToolOutput, KiraError> {
        let run = archive.file_name().unwrap().to_string_lossy().to_string();
        self.dump_calls.lock().unwrap().push((run.clone(), split));
        if listed(&self.dump_fail_runs, &run) {
            return Err(KiraError::ToolFailed {
                tool: "fasterq-dump".to_string(),
                message: "disk quota exceeded".to_string(),
            });
        }
        let names = if listed(&self.empty_dump_runs, &run) {
            Vec::new()
        } else if split && listed(&self.first_mate_only_runs, &run) {
            vec![format!("{run}_1.fastq")]
        } else if split {
            vec![format!("{run}_1.fastq"), format!("{run}_2.fastq")]
        } else {
            vec![format!("{run}.fastq")]
        };
        for name in names {
            fs::write(out_dir.join(name), b"@r\nACGT\n+\nIIII\n").unwrap();
        }
        Ok(ToolOutput {
            success: true,
            ..ToolOutput::default()
        })
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            prefetch: None,
            fasterq_dump: None,
        }
    }
}

fn config(outdir: &Path) -> PipelineConfig {
    PipelineConfig {
        outdir: Utf8PathBuf::from_path_buf(outdir.to_path_buf()).unwrap(),
        sleep: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

fn batches(lines: &[&str]) -> Vec<SpeciesBatch> {
    lines.iter().map(|line| parse_line(line).unwrap()).collect()
}

fn exists(dir: &Path, name: &str) -> bool {
    dir.join(name).is_file()
}

#[test]
fn run_batch_uses_metadata_layouts() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![
        row("SRR111", "SRX1", "SINGLE"),
        row("SRR222", "SRX2", "PAIRED"),
    ]);
    let app = App::new(config(temp.path()), metadata, MockToolkit::default());

    let report = app.run(batches(&["Mouse,SRR111,SRR222"])).unwrap();

    assert!(exists(temp.path(), "Mouse_SRR111.fastq"));
    assert!(exists(temp.path(), "Mouse_SRR222_1.fastq"));
    assert!(exists(temp.path(), "Mouse_SRR222_2.fastq"));
    assert!(!exists(temp.path(), "Mouse_SRR111_1.fastq"));
    assert!(exists(&temp.path().join("Mouse"), "Mouse_runinfo.csv"));
    assert_eq!(report.count(UnitStatus::Converted), 2);
    assert_eq!(report.species[0].metadata_rows, 2);
    assert_eq!(
        app.toolkit().dumps(),
        vec![("SRR111".to_string(), false), ("SRR222".to_string(), true)]
    );
}

#[test]
fn experiment_batch_expands_to_runs() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![
        row("SRR501", "SRX9", "SINGLE"),
        row("SRR502", "SRX9", "PAIRED"),
        row("SRR600", "SRX99", "SINGLE"),
    ]);
    let app = App::new(config(temp.path()), metadata, MockToolkit::default());

    let report = app.run(batches(&["Fly,SRX9"])).unwrap();

    assert!(exists(temp.path(), "Fly_SRX9_SRR501.fastq"));
    assert!(exists(temp.path(), "Fly_SRX9_SRR502_1.fastq"));
    assert!(exists(temp.path(), "Fly_SRX9_SRR502_2.fastq"));
    assert!(!exists(temp.path(), "Fly_SRX9_SRR600.fastq"));
    let units = &report.species[0].units;
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].run, "SRR501");
    assert_eq!(units[1].layout, Layout::Paired);
    assert_eq!(units[1].experiment.as_deref(), Some("SRX9"));
}

#[test]
fn forced_layout_skips_metadata_for_runs() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = config(temp.path());
    cfg.forced_layout = Some(Layout::Paired);
    let metadata = MockMetadata::with_rows(vec![row("SRR111", "SRX1", "SINGLE")]);
    let app = App::new(cfg, metadata, MockToolkit::default());

    let report = app.run(batches(&["Mouse,SRR111,SRR222"])).unwrap();

    assert_eq!(app.metadata_client().call_count(), 0);
    assert!(report.species[0].metadata_skipped);
    assert!(app.toolkit().dumps().iter().all(|(_, split)| *split));
    assert!(exists(temp.path(), "Mouse_SRR111_1.fastq"));
    assert!(exists(temp.path(), "Mouse_SRR222_2.fastq"));
}

#[test]
fn forced_layout_still_queries_metadata_for_experiments() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = config(temp.path());
    cfg.forced_layout = Some(Layout::Single);
    let metadata = MockMetadata::with_rows(vec![row("SRR502", "SRX9", "PAIRED")]);
    let app = App::new(cfg, metadata, MockToolkit::default());

    app.run(batches(&["Fly,SRX9"])).unwrap();

    assert_eq!(app.metadata_client().call_count(), 1);
    assert_eq!(app.toolkit().dumps(), vec![("SRR502".to_string(), false)]);
    assert!(exists(temp.path(), "Fly_SRX9_SRR502.fastq"));
}

#[test]
fn failed_fetch_skips_only_that_run() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![
        row("SRR111", "SRX1", "SINGLE"),
        row("SRR222", "SRX2", "SINGLE"),
        row("SRR333", "SRX3", "SINGLE"),
    ]);
    let app = App::new(
        config(temp.path()),
        metadata,
        MockToolkit::failing(&["SRR222"]),
    );

    let report = app.run(batches(&["Mouse,SRR111,SRR222,SRR333"])).unwrap();

    assert!(exists(temp.path(), "Mouse_SRR111.fastq"));
    assert!(exists(temp.path(), "Mouse_SRR333.fastq"));
    assert!(!exists(temp.path(), "Mouse_SRR222.fastq"));
    assert_eq!(report.count(UnitStatus::Converted), 2);
    assert_eq!(report.count(UnitStatus::Skipped), 1);
    let skipped = &report.species[0].units[1];
    assert_eq!(skipped.status, UnitStatus::Skipped);
    assert!(skipped.outputs.is_empty());
}

#[test]
fn missing_archive_after_prefetch_skips_run() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![
        row("SRR111", "SRX1", "SINGLE"),
        row("SRR222", "SRX2", "SINGLE"),
    ]);
    let toolkit = MockToolkit {
        no_archive_runs: ids(&["SRR111"]),
        ..MockToolkit::default()
    };
    let app = App::new(config(temp.path()), metadata, toolkit);

    let report = app.run(batches(&["Mouse,SRR111,SRR222"])).unwrap();

    let unit = &report.species[0].units[0];
    assert_eq!(unit.status, UnitStatus::Skipped);
    assert!(unit
        .reason
        .as_deref()
        .unwrap()
        .contains("archive directory missing"));
    assert!(unit.outputs.is_empty());
    assert!(!exists(temp.path(), "Mouse_SRR111.fastq"));
    assert_eq!(app.toolkit().dumps(), vec![("SRR222".to_string(), false)]);
    assert!(exists(temp.path(), "Mouse_SRR222.fastq"));
}

#[test]
fn failed_conversion_skips_run() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![
        row("SRR222", "SRX2", "PAIRED"),
        row("SRR333", "SRX3", "SINGLE"),
    ]);
    let toolkit = MockToolkit {
        dump_fail_runs: ids(&["SRR222"]),
        ..MockToolkit::default()
    };
    let app = App::new(config(temp.path()), metadata, toolkit);

    let report = app.run(batches(&["Mouse,SRR222,SRR333"])).unwrap();

    let unit = &report.species[0].units[0];
    assert_eq!(unit.status, UnitStatus::Skipped);
    assert!(unit.reason.as_deref().unwrap().contains("fasterq-dump failed"));
    assert!(unit.outputs.is_empty());
    assert!(!exists(temp.path(), "Mouse_SRR222_1.fastq"));
    assert!(!exists(temp.path(), "Mouse_SRR222_2.fastq"));
    assert_eq!(report.species[0].units[1].status, UnitStatus::Converted);
    assert!(exists(temp.path(), "Mouse_SRR333.fastq"));
}

#[test]
fn conversion_without_files_is_not_converted() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![row("SRR111", "SRX1", "SINGLE")]);
    let toolkit = MockToolkit {
        empty_dump_runs: ids(&["SRR111"]),
        ..MockToolkit::default()
    };
    let app = App::new(config(temp.path()), metadata, toolkit);

    let report = app.run(batches(&["Mouse,SRR111"])).unwrap();

    let unit = &report.species[0].units[0];
    assert_eq!(unit.status, UnitStatus::Skipped);
    assert_eq!(
        unit.reason.as_deref(),
        Some("conversion produced no output files")
    );
    assert!(unit.outputs.is_empty());
    assert_eq!(report.count(UnitStatus::Converted), 0);
    assert!(!exists(temp.path(), "Mouse_SRR111.fastq"));
}

#[test]
fn paired_run_with_one_mate_keeps_what_moved() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![row("SRR222", "SRX2", "PAIRED")]);
    let toolkit = MockToolkit {
        first_mate_only_runs: ids(&["SRR222"]),
        ..MockToolkit::default()
    };
    let app = App::new(config(temp.path()), metadata, toolkit);

    let report = app.run(batches(&["Mouse,SRR222"])).unwrap();

    let unit = &report.species[0].units[0];
    assert_eq!(unit.status, UnitStatus::Converted);
    assert_eq!(unit.outputs.len(), 1);
    assert!(unit.outputs[0].ends_with("Mouse_SRR222_1.fastq"));
    assert!(exists(temp.path(), "Mouse_SRR222_1.fastq"));
    assert!(!exists(temp.path(), "Mouse_SRR222_2.fastq"));
}

#[test]
fn rerun_downloads_everything_again() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![row("SRR111", "SRX1", "SINGLE")]);
    let app = App::new(config(temp.path()), metadata, MockToolkit::default());

    app.run(batches(&["Mouse,SRR111"])).unwrap();
    app.run(batches(&["Mouse,SRR111"])).unwrap();

    assert_eq!(app.toolkit().prefetch_count(), 2);
    assert_eq!(app.toolkit().dumps().len(), 2);
    assert!(exists(temp.path(), "Mouse_SRR111.fastq"));
}

#[test]
fn skip_existing_avoids_second_download() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = config(temp.path());
    cfg.skip_existing = true;
    let metadata = MockMetadata::with_rows(vec![row("SRR111", "SRX1", "SINGLE")]);
    let app = App::new(cfg, metadata, MockToolkit::default());

    app.run(batches(&["Mouse,SRR111"])).unwrap();
    let report = app.run(batches(&["Mouse,SRR111"])).unwrap();

    assert_eq!(app.toolkit().prefetch_count(), 1);
    assert_eq!(report.count(UnitStatus::Skipped), 1);
}

#[test]
fn mixed_batch_aborts_before_any_download() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        config(temp.path()),
        MockMetadata::default(),
        MockToolkit::default(),
    );

    let err = app
        .run(batches(&["Mouse,SRR111", "Fly,SRR1,SRX2"]))
        .unwrap_err();

    assert_matches!(err, KiraError::MixedAccessions { .. });
    assert_eq!(app.toolkit().prefetch_count(), 0);
    assert_eq!(app.metadata_client().call_count(), 0);
}

#[test]
fn unknown_prefix_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        config(temp.path()),
        MockMetadata::default(),
        MockToolkit::default(),
    );
    let err = app.run(batches(&["Mouse,XYZ1"])).unwrap_err();
    assert_matches!(err, KiraError::UnknownAccessionPrefix(_));
}

#[test]
fn metadata_failure_degrades_to_unknown_layout() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata {
        fail: true,
        ..MockMetadata::default()
    };
    let app = App::new(config(temp.path()), metadata, MockToolkit::default());

    let report = app.run(batches(&["Mouse,SRR111"])).unwrap();

    assert_eq!(report.species[0].metadata_failures, 1);
    assert_eq!(report.species[0].units[0].layout, Layout::Single);
    assert!(exists(temp.path(), "Mouse_SRR111.fastq"));
    let log = fs::read_to_string(temp.path().join("Mouse").join("Mouse_runinfo.err")).unwrap();
    assert!(log.contains("connection reset"));
}

#[test]
fn fail_policy_skips_unresolved_runs() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = config(temp.path());
    cfg.unknown_layout = UnknownLayoutPolicy::Fail;
    let metadata = MockMetadata::with_rows(vec![row("SRR111", "SRX1", "SINGLE")]);
    let app = App::new(cfg, metadata, MockToolkit::default());

    let report = app.run(batches(&["Mouse,SRR111,SRR999"])).unwrap();

    assert_eq!(app.toolkit().prefetch_calls.lock().unwrap().clone(), vec!["SRR111"]);
    assert_eq!(report.species[0].units[1].status, UnitStatus::Skipped);
}

#[test]
fn assume_paired_policy_splits_unknown_runs() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = config(temp.path());
    cfg.unknown_layout = UnknownLayoutPolicy::AssumePaired;
    let metadata = MockMetadata::with_rows(vec![row("SRR111", "SRX1", "other")]);
    let app = App::new(cfg, metadata, MockToolkit::default());

    app.run(batches(&["Mouse,SRR111"])).unwrap();

    assert_eq!(app.toolkit().dumps(), vec![("SRR111".to_string(), true)]);
    assert!(exists(temp.path(), "Mouse_SRR111_1.fastq"));
}

#[test]
fn unmatched_experiment_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![row("SRR501", "SRX9", "SINGLE")]);
    let app = App::new(config(temp.path()), metadata, MockToolkit::default());

    let report = app.run(batches(&["Fly,SRX404,SRX9"])).unwrap();

    assert_eq!(report.species[0].unmatched_experiments, vec!["SRX404"]);
    assert!(exists(temp.path(), "Fly_SRX9_SRR501.fastq"));
}

#[test]
fn metadata_is_queried_per_chunk() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = config(temp.path());
    cfg.chunk_size = 2;
    let app = App::new(cfg, MockMetadata::default(), MockToolkit::default());

    app.run(batches(&["Mouse,SRR1,SRR2,SRR3,SRR4,SRR5"])).unwrap();

    let calls = app.metadata_client().calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2], vec!["SRR5"]);
}

#[test]
fn dry_run_plans_without_downloading() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = config(temp.path());
    cfg.dry_run = true;
    let metadata = MockMetadata::with_rows(vec![row("SRR222", "SRX2", "PAIRED")]);
    let app = App::new(cfg, metadata, MockToolkit::default());

    let report = app.run(batches(&["Mouse,SRR222"])).unwrap();

    assert_eq!(app.toolkit().prefetch_count(), 0);
    let unit = &report.species[0].units[0];
    assert_eq!(unit.status, UnitStatus::Planned);
    assert_eq!(unit.outputs.len(), 2);
    assert!(unit.outputs[0].ends_with("Mouse_SRR222_1.fastq"));
}

#[test]
fn species_are_processed_in_input_order() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![
        row("SRR1", "SRX1", "SINGLE"),
        row("SRR2", "SRX2", "SINGLE"),
    ]);
    let app = App::new(config(temp.path()), metadata, MockToolkit::default());

    let report = app
        .run(batches(&["Homo sapiens,SRR2", "Mouse,SRR1"]))
        .unwrap();

    assert_eq!(report.species[0].sanitized, "Homosapiens");
    assert_eq!(
        app.toolkit().prefetch_calls.lock().unwrap().clone(),
        vec!["SRR2", "SRR1"]
    );
    assert!(exists(temp.path(), "Homosapiens_SRR2.fastq"));
}

#[test]
fn missing_input_file_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        config(temp.path()),
        MockMetadata::default(),
        MockToolkit::default(),
    );
    let err = app.run_file(&temp.path().join("missing.txt")).unwrap_err();
    assert_matches!(err, KiraError::InputNotFound(_));
}

#[test]
fn report_renders_as_json() {
    let temp = tempfile::tempdir().unwrap();
    let metadata = MockMetadata::with_rows(vec![row("SRR222", "SRX2", "PAIRED")]);
    let app = App::new(config(temp.path()), metadata, MockToolkit::default());

    let report = app.run(batches(&["Mouse,SRR222"])).unwrap();
    let json = JsonOutput::render(&report).unwrap();

    assert!(json.contains("\"status\": \"converted\""));
    assert!(json.contains("\"layout\": \"PAIRED\""));
    assert!(json.contains("\"mode\": \"run\""));
}
