use std::io::{self, Write};

use serde::Serialize;

use crate::app::BatchReport;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &BatchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn render<T: Serialize>(value: &T) -> io::Result<String> {
        serde_json::to_string_pretty(value).map_err(io::Error::other)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = Self::render(value)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
