use rtstudy_core::{StudyError, StudyResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-only CSV table with a fixed header row.
///
/// Rows already on disk are loaded on open; every append goes straight to the
/// file and is synced before the call returns.
#[derive(Debug)]
pub struct CsvStore<R> {
    path: PathBuf,
    records: Vec<R>,
}

impl<R: Serialize + DeserializeOwned> CsvStore<R> {
    pub fn open<P: AsRef<Path>>(path: P, headers: &[&str]) -> StudyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() && !is_empty_file(&path)? {
            load_existing(&path, headers)?
        } else {
            write_header(&path, headers)?;
            info!("Created {}", path.display());
            Vec::new()
        };
        Ok(Self { path, records })
    }

    pub fn append(&mut self, record: R) -> StudyResult<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| StudyError::storage(&self.path, e))?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        wtr.serialize(&record)
            .map_err(|e| StudyError::storage(&self.path, e))?;
        wtr.flush().map_err(|e| StudyError::storage(&self.path, e))?;
        let file = wtr
            .into_inner()
            .map_err(|e| StudyError::storage(&self.path, e.into_error()))?;
        file.sync_data()
            .map_err(|e| StudyError::storage(&self.path, e))?;

        self.records.push(record);
        debug!("{}: {} rows", self.path.display(), self.records.len());
        Ok(())
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

}

fn is_empty_file(path: &Path) -> StudyResult<bool> {
    let meta = std::fs::metadata(path).map_err(|e| StudyError::storage(path, e))?;
    Ok(meta.len() == 0)
}

/// Reads every row of an existing store, refusing files with a foreign header.
pub fn load_existing<R: DeserializeOwned>(
    path: &Path,
    headers: &[&str],
) -> StudyResult<Vec<R>> {
    let file = File::open(path).map_err(|e| StudyError::storage(path, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(file);

    let found = rdr
        .headers()
        .map_err(|e| StudyError::storage(path, e))?
        .clone();
    if !found.iter().eq(headers.iter().copied()) {
        return Err(StudyError::storage(
            path,
            format!(
                "unexpected header [{}], expected [{}]",
                found.iter().collect::<Vec<_>>().join(","),
                headers.join(",")
            ),
        ));
    }

    let mut records = Vec::new();
    for row in rdr.deserialize() {
        records.push(row.map_err(|e| StudyError::storage(path, e))?);
    }
    info!("Loaded {} rows from {}", records.len(), path.display());
    Ok(records)
}

fn write_header(path: &Path, headers: &[&str]) -> StudyResult<()> {
    let file = File::create(path).map_err(|e| StudyError::storage(path, e))?;
    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record(headers)
        .map_err(|e| StudyError::storage(path, e))?;
    wtr.flush().map_err(|e| StudyError::storage(path, e))?;
    let file = wtr
        .into_inner()
        .map_err(|e| StudyError::storage(path, e.into_error()))?;
    file.sync_data().map_err(|e| StudyError::storage(path, e))
}
