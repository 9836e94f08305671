use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use crate::domain::{Accession, SpeciesBatch};
use crate::error::KiraError;

#[derive(Debug)]
pub struct BatchReader<R: BufRead> {
    path: PathBuf,
    lines: Lines<R>,
}

impl BatchReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, KiraError> {
        if !path.is_file() {
            return Err(KiraError::InputNotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|err| KiraError::InputRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Ok(Self::new(path, BufReader::new(file)))
    }
}

impl<R: BufRead> BatchReader<R> {
    pub fn new(path: &Path, reader: R) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for BatchReader<R> {
    type Item = Result<SpeciesBatch, KiraError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    return Some(Err(KiraError::InputRead {
                        path: self.path.clone(),
                        message: err.to_string(),
                    }));
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(parse_line(trimmed));
        }
    }
}

pub fn parse_line(line: &str) -> Result<SpeciesBatch, KiraError> {
    let mut fields = line.split(',');
    let name = fields.next().unwrap_or_default().trim().to_string();
    let accessions = fields
        .filter(|field| !field.trim().is_empty())
        .map(str::parse::<Accession>)
        .collect::<Result<Vec<_>, KiraError>>()?;
    if accessions.is_empty() {
        return Err(KiraError::EmptyBatch(name));
    }
    Ok(SpeciesBatch { name, accessions })
}
