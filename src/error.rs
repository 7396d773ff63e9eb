use std::path::PathBuf;

/// Result alias for `gmmsig`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by sample I/O, training, splitting and classification.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input row, token or parameter-file field.
    #[error("format error at line {line}: {message}")]
    Format {
        /// 1-based line number (0 when not tied to a line).
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// File access failure.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Too few samples for the requested model complexity.
    #[error("class {class}: {samples} samples, at least {required} required")]
    InsufficientData {
        /// Class index.
        class: usize,
        /// Samples available.
        samples: usize,
        /// Samples required.
        required: usize,
    },

    /// Covariance could not be factorised even after regularisation.
    #[error("class {class}: numerical failure: {message}")]
    Numerical {
        /// Class index.
        class: usize,
        /// Error message.
        message: String,
    },

    /// Input was empty.
    #[error("empty input provided")]
    EmptyInput,

    /// Vector dimension mismatch.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: String,
    },

    /// Class index outside the signature set.
    #[error("class {index} does not exist ({n_classes} classes)")]
    UnknownClass {
        /// Requested index.
        index: usize,
        /// Number of classes available.
        n_classes: usize,
    },
}

impl Error {
    pub(crate) fn format(line: usize, message: impl Into<String>) -> Self {
        Error::Format {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn numerical(class: usize, message: impl Into<String>) -> Self {
        Error::Numerical {
            class,
            message: message.into(),
        }
    }

    /// Rebind a per-class error to `class`.
    ///
    /// Single-class routines report class 0; the multi-class engine relabels.
    pub(crate) fn for_class(self, class: usize) -> Self {
        match self {
            Error::Numerical { message, .. } => Error::Numerical { class, message },
            Error::InsufficientData {
                samples, required, ..
            } => Error::InsufficientData {
                class,
                samples,
                required,
            },
            other => other,
        }
    }

    /// True for failures confined to one class's fit.
    pub fn is_per_class(&self) -> bool {
        matches!(
            self,
            Error::Numerical { .. } | Error::InsufficientData { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = Error::format(7, "expected 2 values, found 3");
        let s = e.to_string();
        assert!(s.contains("line 7"));
        assert!(s.contains("found 3"));

        let e = Error::io(
            "/nope/samples.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(e.to_string().contains("/nope/samples.txt"));
    }

    #[test]
    fn for_class_relabels_per_class_errors() {
        let e = Error::numerical(0, "not positive definite").for_class(3);
        assert!(matches!(e, Error::Numerical { class: 3, .. }));
        assert!(e.is_per_class());

        let e = Error::EmptyInput.for_class(3);
        assert!(matches!(e, Error::EmptyInput));
        assert!(!e.is_per_class());
    }
}
