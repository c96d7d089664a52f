//! Errors that can occur in ssins

use crate::io::error::IOError;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
/// An array was supplied with a shape inconsistent with the other arguments.
pub struct BadArrayShape {
    /// The argument name within the function
    pub argument: &'static str,
    /// The function name
    pub function: &'static str,
    /// The expected shape
    pub expected: String,
    /// The shape that was received instead
    pub received: String,
}

#[derive(Error, Debug)]
/// Errors relating to CLI argument validation
pub enum CLIError {
    #[error("Invalid command line argument {option}\nexpected: {expected}\nreceived: {received}")]
    /// When a bad CLI argument is provided
    InvalidCommandLineArgument {
        /// The argument name, e.g. "--order"
        option: String,
        /// Description of what was expected
        expected: String,
        /// What was received instead
        received: String,
    },
}

#[derive(Error, Debug)]
/// All the errors that can occur in ssins
pub enum SsinsError {
    #[error(transparent)]
    /// Error derived from [`BadArrayShape`]
    BadArrayShape(#[from] BadArrayShape),

    #[error(transparent)]
    /// Error derived from [`IOError`]
    IOError(#[from] IOError),

    #[error(transparent)]
    /// Error derived from [`CLIError`]
    CLIError(#[from] CLIError),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`clap::Error`]
    ClapError(#[from] clap::Error),

    #[error("Dry run")]
    /// Arguments were parsed but no work should be done
    DryRun {},
}
