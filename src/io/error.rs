//! Errors that can occur in the io module

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
/// All the errors that can occur in file io operations
pub enum IOError {
    /// A required attribute was not given a path to read from.
    #[error("You must supply a path to a numpy loadable {attr} file for read_paths entry")]
    MissingReadPath {
        /// The attribute name, e.g. "freq_array"
        attr: String,
    },

    /// Error when reading or writing a file on disk.
    #[error("{path}: {source}")]
    FileIO {
        /// The [`std::io::Error`]
        source: std::io::Error,
        /// The path being accessed
        path: PathBuf,
    },

    /// A pickled blob could not be written or read.
    #[error("{path}: {source}")]
    Pickle {
        /// The [`serde_pickle::Error`]
        source: serde_pickle::Error,
        /// The path being accessed
        path: PathBuf,
    },

    #[error("{path}: {source}")]
    /// Error derived from [`ndarray_npy::ReadNpyError`]
    ReadNpy {
        /// The [`ndarray_npy::ReadNpyError`]
        source: ndarray_npy::ReadNpyError,
        /// The path being read
        path: PathBuf,
    },

    #[error("{path}: {source}")]
    /// Error derived from [`ndarray_npy::WriteNpyError`]
    WriteNpy {
        /// The [`ndarray_npy::WriteNpyError`]
        source: ndarray_npy::WriteNpyError,
        /// The path being written
        path: PathBuf,
    },

    /// The bytes of a string attribute were not valid UTF-8.
    #[error("{path}: contents are not valid UTF-8")]
    InvalidUtf8 {
        /// The path being read
        path: PathBuf,
    },
}
