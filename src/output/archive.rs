use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::OutputSink;
use crate::compositor::CompositeResult;
use crate::error::{PipelineError, Result};

/// Packs finished results into a single zip archive mapping file name to
/// encoded bytes
#[derive(Default)]
pub struct BatchArchive {
    entries: Vec<(String, Vec<u8>)>,
    used: HashSet<String>,
    destination: Option<PathBuf>,
}

impl BatchArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive that is written to `path` on [`OutputSink::finish`]
    pub fn to_file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            destination: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Add raw bytes under `file_name`; clashing names get a numeric suffix
    pub fn add(&mut self, file_name: &str, bytes: Vec<u8>) -> String {
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() => (stem, extension),
            _ => (file_name, ""),
        };
        let name = unique_name(&mut self.used, stem, extension);
        self.entries.push((name.clone(), bytes));
        name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the archive in memory
    pub fn to_zip(&self) -> Result<Vec<u8>> {
        let _span = tracing::debug_span!("zip_archive").entered();

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        // Encoded images are already compressed
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for (name, bytes) in &self.entries {
            writer.start_file(name.as_str(), options)?;
            writer
                .write_all(bytes)
                .map_err(|e| PipelineError::Archive(e.into()))?;
        }

        let cursor = writer.finish()?;
        tracing::debug!("Archived {} files", self.entries.len());
        Ok(cursor.into_inner())
    }
}

impl OutputSink for BatchArchive {
    fn write_result(&mut self, name: &str, result: &CompositeResult) -> Result<String> {
        let name = unique_name(&mut self.used, name, result.format.extension());
        self.entries.push((name.clone(), result.encoded.clone()));
        Ok(name)
    }

    fn finish(&mut self) -> Result<()> {
        let Some(path) = self.destination.clone() else {
            return Ok(());
        };
        let bytes = self.to_zip()?;
        fs::write(&path, bytes).map_err(|source| PipelineError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!("Wrote archive {} ({} files)", path.display(), self.entries.len());
        Ok(())
    }
}

/// `stem.ext`, or `stem-N.ext` for the first free N if already taken
pub(super) fn unique_name(used: &mut HashSet<String>, stem: &str, extension: &str) -> String {
    let with_extension = |base: String| {
        if extension.is_empty() {
            base
        } else {
            format!("{base}.{extension}")
        }
    };

    let mut candidate = with_extension(stem.to_string());
    let mut counter = 1;
    while used.contains(&candidate) {
        candidate = with_extension(format!("{stem}-{counter}"));
        counter += 1;
    }
    used.insert(candidate.clone());
    candidate
}
