use crate::error::{Result, ScraperError};
use crate::types::{ProductKey, ProductRef, RawRecord};
use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Destination for batches of raw records fetched from the API.
#[async_trait]
pub trait RecordSink: Send {
    async fn write_batch(&mut self, records: &[RawRecord]) -> Result<()>;
}

/// CSV sink that flattens JSON objects into rows.
///
/// The column set is fixed by the first non-empty batch (or by the header of
/// an existing file when appending): the union of its objects' keys, sorted.
/// Later records with unknown keys have those keys dropped; missing keys
/// become empty cells.
pub struct CsvRecordSink {
    writer: csv::Writer<File>,
    columns: Option<Vec<String>>,
    header_written: bool,
    path: PathBuf,
}

impl CsvRecordSink {
    /// Opens `path` for appending. An existing non-empty file keeps its
    /// header row and new records are flattened against it.
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut columns = None;
        let mut header_written = false;
        let existing_len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if existing_len > 0 {
            let mut reader = csv::Reader::from_path(path)?;
            let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
            if !headers.is_empty() {
                debug!(
                    path = %path.display(),
                    columns = headers.len(),
                    "adopting header of existing output file"
                );
                columns = Some(headers);
                header_written = true;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: csv::Writer::from_writer(file),
            columns,
            header_written,
            path: path.to_path_buf(),
        })
    }

    /// Creates `path`, truncating any previous contents.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: csv::Writer::from_writer(file),
            columns: None,
            header_written: false,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn establish_columns(&mut self, records: &[RawRecord]) {
        let mut keys = BTreeSet::new();
        for record in records {
            if let Some(object) = record.as_object() {
                keys.extend(object.keys().cloned());
            }
        }
        if keys.is_empty() {
            warn!(
                path = %self.path.display(),
                "batch contains no object fields; cannot establish columns yet"
            );
            return;
        }
        self.columns = Some(keys.into_iter().collect());
    }

    fn cell_value(record: &RawRecord, column: &str) -> String {
        match record.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            // Numbers, booleans, arrays and objects keep their compact JSON form
            Some(other) => other.to_string(),
        }
    }
}

#[async_trait]
impl RecordSink for CsvRecordSink {
    async fn write_batch(&mut self, records: &[RawRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if self.columns.is_none() {
            self.establish_columns(records);
        }
        let Some(columns) = self.columns.as_deref() else {
            return Ok(());
        };

        if !self.header_written {
            self.writer.write_record(columns)?;
            self.header_written = true;
        }

        let mut dropped = BTreeSet::new();
        for record in records {
            let row: Vec<String> = columns
                .iter()
                .map(|column| Self::cell_value(record, column))
                .collect();
            self.writer.write_record(&row)?;

            if let Some(object) = record.as_object() {
                for key in object.keys() {
                    if !columns.iter().any(|c| c == key) {
                        dropped.insert(key.clone());
                    }
                }
            }
        }
        if !dropped.is_empty() {
            debug!(
                path = %self.path.display(),
                fields = ?dropped,
                "dropping fields absent from the header"
            );
        }

        self.writer.flush()?;
        counter!("scraper_records_written_total").increment(records.len() as u64);
        Ok(())
    }
}

/// In-memory sink that records every batch it receives.
#[derive(Clone, Default)]
pub struct InMemorySink {
    batches: Arc<Mutex<Vec<Vec<RawRecord>>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<RawRecord>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<RawRecord> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn write_batch(&mut self, records: &[RawRecord]) -> Result<()> {
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

/// Reads a listings CSV back and returns the products worth fetching reviews
/// for: duplicates collapse to their first occurrence, then products with no
/// reviews are excluded.
pub fn load_products(path: &Path) -> Result<Vec<ProductRef>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let position = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ScraperError::MissingField(format!("column '{name}' not found")))
    };
    let id_idx = position("id")?;
    let seller_idx = position("seller_id")?;
    let spid_idx = position("seller_product_id")?;
    let reviews_idx = position("review_count")?;

    let mut seen: HashSet<ProductKey> = HashSet::new();
    let mut products = Vec::new();
    let mut skipped_duplicates = 0usize;
    let mut skipped_unreviewed = 0usize;

    for row in reader.records() {
        let row = row?;
        let field = |idx: usize| row.get(idx).unwrap_or("").trim().to_string();
        let product = ProductRef {
            id: field(id_idx),
            seller_id: field(seller_idx),
            seller_product_id: field(spid_idx),
            review_count: field(reviews_idx).parse().map_err(|e| ScraperError::Api {
                message: format!("invalid review_count for product {}: {e}", field(id_idx)),
            })?,
        };

        if !seen.insert(product.key()) {
            skipped_duplicates += 1;
            continue;
        }
        if product.review_count == 0 {
            skipped_unreviewed += 1;
            continue;
        }
        products.push(product);
    }

    info!(
        products = products.len(),
        skipped_duplicates, skipped_unreviewed, "loaded product list"
    );
    Ok(products)
}
