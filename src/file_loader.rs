//! Uploaded file access.
//!
//! Loads CSV and Parquet uploads into `TableData`. The byte limit is
//! enforced against filesystem metadata before any parsing starts, so an
//! oversized upload never costs a parse. Content hashes are streamed, not
//! slurped.

use crate::error::{DatasightError, Result};
use crate::providers::{FileHandle, FileProvider};
use crate::table::TableData;
use async_trait::async_trait;
use polars::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use tracing::info;

const HASH_BUF_SIZE: usize = 8 * 1024;

pub struct LocalFileProvider {
    max_bytes: u64,
}

impl LocalFileProvider {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    fn check_size(&self, handle: &FileHandle) -> Result<u64> {
        let metadata = std::fs::metadata(&handle.path)?;
        let size = metadata.len();
        if size > self.max_bytes {
            return Err(DatasightError::PayloadTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        if size == 0 {
            return Err(DatasightError::Analysis(format!(
                "file is empty: {}",
                handle.path.display()
            )));
        }
        Ok(size)
    }
}

#[async_trait]
impl FileProvider for LocalFileProvider {
    fn content_hash(&self, handle: &FileHandle) -> Result<String> {
        self.check_size(handle)?;
        let mut file = File::open(&handle.path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; HASH_BUF_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(crate::fingerprint::hex_encode(&hasher.finalize()))
    }

    async fn load(&self, handle: &FileHandle) -> Result<TableData> {
        let size = self.check_size(handle)?;

        let extension = handle
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let df = match extension.as_str() {
            "csv" => LazyCsvReader::new(&handle.path)
                .with_try_parse_dates(true)
                .with_infer_schema_length(Some(1000))
                .finish()?
                .collect()?,
            "parquet" => LazyFrame::scan_parquet(&handle.path, ScanArgsParquet::default())?
                .collect()?,
            other => {
                return Err(DatasightError::Analysis(format!(
                    "unsupported file format: '{}' (expected csv or parquet)",
                    other
                )))
            }
        };

        info!(
            path = %handle.path.display(),
            bytes = size,
            rows = df.height(),
            "loaded uploaded file"
        );
        TableData::from_dataframe(&df)
    }
}
