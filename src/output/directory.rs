use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::OutputSink;
use crate::compositor::CompositeResult;
use crate::error::{PipelineError, Result};

/// Writes each result as a file in a directory
pub struct DirectorySink {
    dir: PathBuf,
    used: HashSet<String>,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| PipelineError::Write {
            path: dir.clone(),
            source,
        })?;
        tracing::info!("Writing results to {}", dir.display());
        Ok(Self {
            dir,
            used: HashSet::new(),
        })
    }
}

impl OutputSink for DirectorySink {
    fn write_result(&mut self, name: &str, result: &CompositeResult) -> Result<String> {
        let file_name = super::archive::unique_name(&mut self.used, name, result.format.extension());
        let path = self.dir.join(&file_name);
        fs::write(&path, &result.encoded).map_err(|source| PipelineError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!("Wrote {}", path.display());
        Ok(file_name)
    }
}
