use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;

pub const REQUIRED_COLUMNS: [&str; 6] = [
    "company",
    "product",
    "issue",
    "state",
    "consumer_complaint_narrative",
    "date_received",
];

/// One row of the complaints CSV after cleaning. Immutable once loaded;
/// identity is the 0-based row index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComplaintRecord {
    pub id: usize,
    pub company: String,
    pub product: String,
    pub issue: String,
    pub state: String,
    pub narrative: String,
    pub date_received: String,
}

#[derive(Deserialize)]
struct RawRow {
    company: String,
    product: String,
    issue: String,
    state: String,
    consumer_complaint_narrative: String,
    date_received: String,
}

/// Load and clean the complaints CSV. Any missing column or empty required
/// field fails the whole load; there is no partial result.
pub fn load_complaints(path: impl AsRef<Path>) -> Result<Vec<ComplaintRecord>, PipelineError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| match e.kind() {
            csv::ErrorKind::Io(_) => {
                PipelineError::Validation(format!("cannot open '{}': {e}", path.display()))
            }
            _ => PipelineError::Validation(format!("malformed CSV '{}': {e}", path.display())),
        })?;

    validate_headers(&mut reader)?;

    let mut records = Vec::new();
    for (i, row) in reader.deserialize::<RawRow>().enumerate() {
        let row_number = i + 2; // 1-based, after the header line
        let raw = row.map_err(|e| {
            PipelineError::Validation(format!("malformed CSV row {row_number}: {e}"))
        })?;
        records.push(clean_row(records.len(), row_number, raw)?);
    }

    info!(count = records.len(), path = %path.display(), "loaded complaints");
    Ok(records)
}

fn validate_headers<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
) -> Result<(), PipelineError> {
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::Validation(format!("cannot read CSV header: {e}")))?;
    for required in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == required) {
            return Err(PipelineError::Validation(format!(
                "missing required column '{required}'"
            )));
        }
    }
    Ok(())
}

fn clean_row(id: usize, row_number: usize, raw: RawRow) -> Result<ComplaintRecord, PipelineError> {
    let require = |field: &str, value: &str| -> Result<String, PipelineError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Validation(format!(
                "row {row_number}: missing value for '{field}'"
            )));
        }
        Ok(trimmed.to_string())
    };

    Ok(ComplaintRecord {
        id,
        company: require("company", &raw.company)?,
        product: require("product", &raw.product)?,
        issue: require("issue", &raw.issue)?,
        state: require("state", &raw.state)?,
        narrative: normalize_narrative(&require(
            "consumer_complaint_narrative",
            &raw.consumer_complaint_narrative,
        )?),
        date_received: require("date_received", &raw.date_received)?,
    })
}

/// Lowercase and collapse whitespace runs so chunk boundaries and token
/// hashing see a canonical form.
fn normalize_narrative(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.extend(c.to_lowercase());
        }
    }
    out
}
