use std::fs::{self, OpenOptions};
use std::io::Write;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::domain::Accession;
use crate::error::KiraError;

pub const RUN_COLUMN: usize = 0;
pub const EXPERIMENT_COLUMN: usize = 10;
pub const LAYOUT_COLUMN: usize = 15;

const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const EFETCH_MAX_RECORDS: usize = 10_000;

pub trait MetadataClient: Send + Sync {
    fn query_runinfo(&self, accessions: &[Accession]) -> Result<String, KiraError>;
}

pub fn chunk_accessions<T>(items: &[T], size: usize) -> Result<std::slice::Chunks<'_, T>, KiraError> {
    if size == 0 {
        return Err(KiraError::InvalidConfig(
            "chunk size must be positive".to_string(),
        ));
    }
    Ok(items.chunks(size))
}

pub fn or_query(accessions: &[Accession]) -> String {
    accessions
        .iter()
        .map(Accession::as_str)
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfoRow {
    pub run: String,
    pub experiment: String,
    pub layout: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunInfoTable {
    rows: Vec<RunInfoRow>,
}

impl RunInfoTable {
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();
        table.append_text(text);
        table
    }

    pub fn append_text(&mut self, text: &str) {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    debug!("skipping malformed runinfo line: {err}");
                    continue;
                }
            };
            if record.len() <= LAYOUT_COLUMN {
                continue;
            }
            let run = record[RUN_COLUMN].trim();
            if run.is_empty() || run == "Run" {
                continue;
            }
            self.rows.push(RunInfoRow {
                run: run.to_string(),
                experiment: record[EXPERIMENT_COLUMN].trim().to_string(),
                layout: record[LAYOUT_COLUMN].trim().to_string(),
            });
        }
    }

    pub fn rows(&self) -> &[RunInfoRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn find_run(&self, run: &Accession) -> Option<&RunInfoRow> {
        self.rows.iter().find(|row| row.run == run.as_str())
    }

    pub fn experiment_rows<'a>(
        &'a self,
        experiment: &'a Accession,
    ) -> impl Iterator<Item = &'a RunInfoRow> + 'a {
        self.rows
            .iter()
            .filter(move |row| row.experiment == experiment.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MetadataSummary {
    pub table: RunInfoTable,
    pub chunks: usize,
    pub failures: usize,
}

pub fn fetch_species_metadata<M: MetadataClient + ?Sized>(
    client: &M,
    accessions: &[Accession],
    config: &PipelineConfig,
    table_path: &Utf8Path,
    error_log: &Utf8Path,
) -> Result<MetadataSummary, KiraError> {
    fs::write(table_path.as_std_path(), b"")
        .map_err(|err| KiraError::Filesystem(format!("create {table_path}: {err}")))?;

    let chunks: Vec<&[Accession]> = chunk_accessions(accessions, config.chunk_size)?.collect();
    let total = chunks.len();
    let mut table = RunInfoTable::default();
    let mut failures = 0usize;

    for (index, chunk) in chunks.iter().enumerate() {
        info!(
            "metadata chunk {}/{} ({} accessions)",
            index + 1,
            total,
            chunk.len()
        );
        match client.query_runinfo(chunk) {
            Ok(text) => {
                append_file(table_path, &text)?;
                table.append_text(&text);
            }
            Err(err) => {
                failures += 1;
                error!("metadata chunk {}/{} failed: {err}", index + 1, total);
                append_file(
                    error_log,
                    &format!("chunk {}/{} [{}]: {err}\n", index + 1, total, or_query(chunk)),
                )?;
            }
        }
        if index + 1 < total && !config.sleep.is_zero() {
            thread::sleep(config.sleep);
        }
    }

    Ok(MetadataSummary {
        table,
        chunks: total,
        failures,
    })
}

fn append_file(path: &Utf8Path, text: &str) -> Result<(), KiraError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
    file.write_all(text.as_bytes())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    if !text.is_empty() && !text.ends_with('\n') {
        file.write_all(b"\n")
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchHistory {
    webenv: String,
    query_key: String,
    count: usize,
}

fn efetch_params(history: SearchHistory) -> Vec<(&'static str, String)> {
    vec![
        ("db", "sra".to_string()),
        ("query_key", history.query_key),
        ("WebEnv", history.webenv),
        ("retstart", "0".to_string()),
        ("retmax", history.count.min(EFETCH_MAX_RECORDS).to_string()),
        ("rettype", "runinfo".to_string()),
        ("retmode", "text".to_string()),
    ]
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    querykey: Option<String>,
    #[serde(default)]
    webenv: Option<String>,
}

#[derive(Clone)]
pub struct EutilsHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl EutilsHttpClient {
    pub fn new(api_key: Option<String>) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-sra/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::NcbiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;

        let api_key = api_key
            .or_else(|| std::env::var("NCBI_API_KEY").ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            base_url: EUTILS_BASE_URL.to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn post(
        &self,
        endpoint: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(url)
            .form(&params)
            .send()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "NCBI request failed".to_string());
            return Err(KiraError::NcbiStatus { status, message });
        }
        Ok(response)
    }

    fn search(&self, term: String) -> Result<Option<SearchHistory>, KiraError> {
        let response = self.post(
            "esearch.fcgi",
            vec![
                ("db", "sra".to_string()),
                ("term", term),
                ("usehistory", "y".to_string()),
                ("retmode", "json".to_string()),
            ],
        )?;
        let body: ESearchResponse = response
            .json()
            .map_err(|err| KiraError::NcbiResponse(err.to_string()))?;
        let result = body.esearchresult;
        let count: usize = result
            .count
            .as_deref()
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        if count == 0 {
            return Ok(None);
        }
        match (result.webenv, result.querykey) {
            (Some(webenv), Some(query_key)) => Ok(Some(SearchHistory {
                webenv,
                query_key,
                count,
            })),
            _ => Err(KiraError::NcbiResponse(
                "esearch returned hits without a history key".to_string(),
            )),
        }
    }
}

impl MetadataClient for EutilsHttpClient {
    fn query_runinfo(&self, accessions: &[Accession]) -> Result<String, KiraError> {
        let Some(history) = self.search(or_query(accessions))? else {
            return Ok(String::new());
        };
        let response = self.post("efetch.fcgi", efetch_params(history))?;
        response
            .text()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))
    }
}
