use std::path::PathBuf;

use thiserror::Error;

use crate::config::OutputKind;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse classification used by hosts to decide how to surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unreadable or unusable source image
    Input,
    /// Classifier failed to initialize or to run
    Oracle,
    /// Custom background unusable; retriable, matte cache is kept
    Compositing,
    /// Encoding or packaging of finished results failed
    Export,
    /// The job was abandoned before it finished
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not decode source image")]
    Input(#[source] image::ImageError),

    #[error("source image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("no image is loaded")]
    NoImage,

    #[error("segmentation failed: {0}")]
    Oracle(String),

    #[error("segmentation worker is no longer running")]
    WorkerGone,

    #[error("could not decode custom background")]
    Compositing(#[source] image::ImageError),

    #[error("failed to encode {format:?} output")]
    Encode {
        format: OutputKind,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to build archive")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("job was cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Input(_) | Self::EmptyImage { .. } | Self::NoImage => ErrorCategory::Input,
            Self::Oracle(_) | Self::WorkerGone => ErrorCategory::Oracle,
            Self::Compositing(_) => ErrorCategory::Compositing,
            Self::Encode { .. } | Self::Archive(_) | Self::Write { .. } => ErrorCategory::Export,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Human-readable message including the source chain
    pub fn user_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(PipelineError::NoImage.category(), ErrorCategory::Input);
        assert_eq!(
            PipelineError::Oracle("boom".into()).category(),
            ErrorCategory::Oracle
        );
        assert_eq!(PipelineError::WorkerGone.category(), ErrorCategory::Oracle);
        assert_eq!(PipelineError::Cancelled.category(), ErrorCategory::Cancelled);
        let write = PipelineError::Write {
            path: PathBuf::from("out.png"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(write.category(), ErrorCategory::Export);
    }

    #[test]
    fn user_message_includes_cause() {
        let err = PipelineError::Write {
            path: PathBuf::from("out.png"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(err.user_message(), "failed to write out.png: disk full");
    }
}
