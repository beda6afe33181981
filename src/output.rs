use std::io::{self, Write};

use serde::Serialize;

use crate::app::{OutcomeReport, QueryResult, StatusReport};

/// Stdout carries exactly one JSON document per invocation; logs go to stderr.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_query(result: &QueryResult) -> io::Result<()> {
        Self::print_json(result, false)
    }

    pub fn print_outcome(result: &OutcomeReport) -> io::Result<()> {
        Self::print_json(result, false)
    }

    pub fn print_status(result: &StatusReport) -> io::Result<()> {
        Self::print_json(result, true)
    }

    fn print_json<T: Serialize>(value: &T, pretty: bool) -> io::Result<()> {
        let json = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        stdout.flush()
    }
}
