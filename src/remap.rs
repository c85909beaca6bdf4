//! Lookup from (laterality, parcel) label pairs to the combined label space.
use serde::Deserialize;
use snafu::ResultExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

use crate::errors::table::{IOSnafu, ReadCsvSnafu};
use crate::errors::TableError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
struct RemapRecord {
    laterality: u8,
    parcel: u8,
    label: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    entries: HashMap<(u8, u8), u16>,
}

impl RemapTable {
    /// Build a table from `((laterality, parcel), label)` entries. Keys must be unique.
    pub fn from_entries<I>(entries: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = ((u8, u8), u16)>,
    {
        let mut table = HashMap::new();
        for ((laterality, parcel), label) in entries {
            if table.insert((laterality, parcel), label).is_some() {
                return Err(TableError::DuplicateKey { laterality, parcel });
            }
        }
        Ok(RemapTable { entries: table })
    }

    /// Read a CSV table with the header `laterality,parcel,label`.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = File::open(path).context(IOSnafu { path })?;
        let table = Self::from_reader(BufReader::new(file), path)?;
        info!("Loaded {} remap entries from {}", table.len(), path.display());
        Ok(table)
    }

    /// Read CSV records from `reader`; `path` is only used to describe errors.
    pub fn from_reader<R: Read>(reader: R, path: &Path) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);
        let records = reader
            .deserialize::<RemapRecord>()
            .map(|record| {
                record
                    .map(|r| ((r.laterality, r.parcel), r.label))
                    .context(ReadCsvSnafu { path })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_entries(records)
    }

    pub fn get(&self, laterality: u8, parcel: u8) -> Option<u16> {
        self.entries.get(&(laterality, parcel)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((u8, u8), u16)> + '_ {
        self.entries.iter().map(|(&key, &label)| (key, label))
    }
}
