//! Loading historical exchanges from CSV.

use std::io::Read;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use replygen_embeddings::Record;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::DatasetConfig;
use crate::error::{Result, RetrievalError};

/// One CSV row. Unknown columns are ignored.
#[derive(Debug, Deserialize)]
struct Row {
    #[serde(alias = "customer_message")]
    customer_tweet: Option<String>,

    #[serde(alias = "company_reply")]
    company_tweet: Option<String>,

    #[serde(default)]
    company: Option<String>,
}

/// Read records from CSV data with a header row.
///
/// Rows without a customer message are skipped; the remaining rows are
/// numbered 0..n in file order.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<Record>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let has = |names: &[&str]| headers.iter().any(|h| names.contains(&h.trim()));
    if !has(&["customer_tweet", "customer_message"]) {
        return Err(RetrievalError::Dataset(
            "missing customer_tweet column".to_string(),
        ));
    }
    if !has(&["company_tweet", "company_reply"]) {
        return Err(RetrievalError::Dataset(
            "missing company_tweet column".to_string(),
        ));
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in csv_reader.deserialize::<Row>() {
        let row = row?;
        let customer_message = row.customer_tweet.unwrap_or_default();
        if customer_message.trim().is_empty() {
            skipped += 1;
            continue;
        }
        records.push(Record::new(
            records.len(),
            customer_message,
            row.company_tweet.unwrap_or_default(),
            row.company.unwrap_or_default(),
        ));
    }

    if skipped > 0 {
        warn!("Skipped {skipped} rows without a customer message");
    }
    Ok(records)
}

/// Read records from a CSV file.
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| RetrievalError::Dataset(format!("{}: {e}", path.display())))?;
    let records = read_records(file)?;
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Keep a deterministic `fraction` of `records`, in their original order,
/// renumbered 0..n.
pub fn sample_records(records: Vec<Record>, fraction: f64, seed: u64) -> Vec<Record> {
    let total = records.len();
    if total == 0 || fraction >= 1.0 {
        return records;
    }

    let amount = ((total as f64) * fraction).round().clamp(1.0, total as f64) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, total, amount).into_vec();
    picked.sort_unstable();

    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    picked
        .into_iter()
        .enumerate()
        .filter_map(|(row, position)| {
            slots[position].take().map(|mut record| {
                record.row = row;
                record
            })
        })
        .collect()
}

/// Load the configured dataset, sampled if requested.
pub fn load_dataset(config: &DatasetConfig) -> Result<Vec<Record>> {
    let records = load_records(&config.path)?;
    Ok(match config.sample_fraction {
        Some(fraction) => {
            let sampled = sample_records(records, fraction, config.sample_seed);
            info!(
                "Sampled {} records (fraction {fraction}, seed {})",
                sampled.len(),
                config.sample_seed
            );
            sampled
        }
        None => records,
    })
}
