//! Table and text exports of the accumulated records.
//!
//! Output files are named after the contract's symbol and always opened in
//! append mode, so repeated exports of the same collection accumulate in one
//! file.

use crate::collection::{Collection, CollectionError};
use crate::schemas::{AttributeRecord, TransactionRecord};
use polars::prelude::*;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

const ATTRIBUTES: &str = "attributes";
const TRANSACTIONS: &str = "transactions";

impl Collection {
    /// Attribute records as a table, one column per trait seen in any record.
    /// With `write_file`, the table is also appended to
    /// `<folder>attributes_<SYMBOL>.csv`.
    pub async fn attributes_to_table(
        &self,
        write_file: bool,
        folder: &str,
    ) -> Result<DataFrame, CollectionError> {
        if self.attributes.is_empty() {
            return Err(CollectionError::EmptyState(ATTRIBUTES));
        }

        let rows: Vec<Vec<(&str, String)>> = self
            .attributes
            .iter()
            .map(|record: &AttributeRecord| {
                record.iter().map(|(k, v)| (k, v.to_string())).collect()
            })
            .collect();
        let mut df = rows_to_frame(&rows)?;

        if write_file {
            let path = self.export_path(folder, ATTRIBUTES, "csv").await?;
            append_csv(&mut df, &path)?;
        }
        Ok(df)
    }

    /// Append all attribute records to `<folder>attributes_<SYMBOL>.txt` as a
    /// JSON list in which every token is a one-element list.
    pub async fn attributes_to_text_file(&self, folder: &str) -> Result<PathBuf, CollectionError> {
        if self.attributes.is_empty() {
            return Err(CollectionError::EmptyState(ATTRIBUTES));
        }

        let nested: Vec<[&AttributeRecord; 1]> =
            self.attributes.iter().map(|record| [record]).collect();
        let path = self.export_path(folder, ATTRIBUTES, "txt").await?;
        append_text(&path, &serde_json::to_string(&nested)?)?;
        Ok(path)
    }

    /// Transaction records as a table, one column per explorer field seen.
    /// With `write_file`, the table is also appended to
    /// `<folder>transactions_<SYMBOL>.csv`.
    pub async fn transactions_to_table(
        &self,
        write_file: bool,
        folder: &str,
    ) -> Result<DataFrame, CollectionError> {
        if self.transactions.is_empty() {
            return Err(CollectionError::EmptyState(TRANSACTIONS));
        }

        let rows: Vec<Vec<(&str, String)>> = self
            .transactions
            .iter()
            .map(|record: &TransactionRecord| record.iter().collect())
            .collect();
        let mut df = rows_to_frame(&rows)?;

        if write_file {
            let path = self.export_path(folder, TRANSACTIONS, "csv").await?;
            append_csv(&mut df, &path)?;
        }
        Ok(df)
    }

    /// Append all transaction records to `<folder>transactions_<SYMBOL>.txt`
    /// as a JSON list of objects.
    pub async fn transactions_to_text_file(
        &self,
        folder: &str,
    ) -> Result<PathBuf, CollectionError> {
        if self.transactions.is_empty() {
            return Err(CollectionError::EmptyState(TRANSACTIONS));
        }

        let path = self.export_path(folder, TRANSACTIONS, "txt").await?;
        append_text(&path, &serde_json::to_string(&self.transactions)?)?;
        Ok(path)
    }

    async fn export_path(
        &self,
        folder: &str,
        kind: &str,
        extension: &str,
    ) -> Result<PathBuf, CollectionError> {
        let symbol = self.contract().symbol().await?;
        Ok(export_file_path(folder, kind, &symbol, extension))
    }
}

/// `<folder>/<kind>_<SYMBOL>.<extension>`, e.g. `data/attributes_BAYC.csv`.
pub fn export_file_path(folder: &str, kind: &str, symbol: &str, extension: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}{}_{}.{}",
        normalize_folder(folder),
        kind,
        file_safe(symbol),
        extension
    ))
}

/// Append a trailing `/` to a non-empty folder; empty means the current
/// directory.
pub fn normalize_folder(folder: &str) -> String {
    if folder.is_empty() || folder.ends_with('/') || folder.ends_with(std::path::MAIN_SEPARATOR) {
        folder.to_string()
    } else {
        format!("{}/", folder)
    }
}

fn file_safe(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// Build a string-typed frame whose columns are the union of row keys in
/// first-seen order. Keys absent from a row are null.
fn rows_to_frame(rows: &[Vec<(&str, String)>]) -> Result<DataFrame, CollectionError> {
    let mut names: Vec<&str> = Vec::new();
    for row in rows {
        for (key, _) in row {
            if !names.contains(key) {
                names.push(*key);
            }
        }
    }

    let columns: Vec<Column> = names
        .iter()
        .map(|name| {
            let values: Vec<Option<&str>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| value.as_str())
                })
                .collect();
            Column::new((*name).into(), values)
        })
        .collect();

    Ok(DataFrame::new(columns)?)
}

fn open_append(path: &PathBuf) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn append_csv(df: &mut DataFrame, path: &PathBuf) -> Result<(), CollectionError> {
    let mut file = open_append(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    info!("Appended {} rows to {:?}", df.height(), path);
    Ok(())
}

fn append_text(path: &PathBuf, document: &str) -> Result<(), CollectionError> {
    let mut file = open_append(path)?;
    file.write_all(document.as_bytes())?;
    info!("Appended {} bytes to {:?}", document.len(), path);
    Ok(())
}

/// Parse a text export back into JSON; each export call appends one document.
pub fn read_text_documents(contents: &str) -> Result<Vec<Value>, serde_json::Error> {
    serde_json::Deserializer::from_str(contents)
        .into_iter::<Value>()
        .collect()
}
