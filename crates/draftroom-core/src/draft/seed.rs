// Candidate pool seeding from CSV.
//
// Expected header: `id,name`. The `id` column may be omitted or left blank,
// in which case `c{row}` (1-based) is used.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::candidate::Candidate;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    id: Option<String>,
    name: String,
}

fn load_from_reader<R: Read>(rdr: R) -> Result<Vec<Candidate>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for (row, result) in reader.deserialize::<RawCandidate>().enumerate() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed candidate row: {}", e);
                continue;
            }
        };
        let name = raw.name.trim();
        if name.is_empty() {
            warn!("skipping candidate row {}: empty name", row + 1);
            continue;
        }
        let id = raw
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("c{}", row + 1));
        if !seen.insert(id.clone()) {
            warn!("skipping candidate '{}': duplicate id '{}'", name, id);
            continue;
        }
        candidates.push(Candidate::new(id, name));
    }
    Ok(candidates)
}

/// Load the candidate list from a CSV file.
pub fn load_candidates(path: &Path) -> Result<Vec<Candidate>, SeedError> {
    let display = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|source| SeedError::Io {
        path: display.clone(),
        source,
    })?;
    load_from_reader(file).map_err(|source| SeedError::Csv {
        path: display,
        source,
    })
}
