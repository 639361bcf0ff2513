mod archive;
mod directory;
mod encode;

pub use archive::BatchArchive;
pub use directory::DirectorySink;
pub use encode::encode;

use crate::compositor::CompositeResult;
use crate::error::Result;

/// Trait for destinations of finished composites
pub trait OutputSink {
    /// Store one result under `name` (a file stem; the sink adds the
    /// extension of the result's format). Returns the name actually used.
    fn write_result(&mut self, name: &str, result: &CompositeResult) -> Result<String>;

    /// Flush anything buffered
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
