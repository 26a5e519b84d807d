//! Typed errors and the stderr report channel.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Errors the job-control builtins share.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShellError {
    #[error("no such job: {0}")]
    NoSuchJob(String),
    #[error("ambiguous job specification: %{0}")]
    AmbiguousJobSpec(String),
    #[error("invalid job specification: {0}")]
    InvalidJobSpec(String),
    #[error("no current job")]
    NoCurrentJob,
    #[error("no previous job")]
    NoPreviousJob,
    #[error("job [{0}] is not stopped")]
    JobNotStopped(usize),
}

static ERROR_REPORTED: AtomicBool = AtomicBool::new(false);

/// Reports a recoverable runtime error on stderr and latches the error
/// flag. Used where the caller carries on with unchanged state, e.g. an
/// unexpected `waitpid` failure in the reaper.
pub fn report(message: impl Display) {
    eprintln!("jobsh: {message}");
    ERROR_REPORTED.store(true, Ordering::Relaxed);
}

/// True if `report` has been called since the last `clear_error`. The shell
/// front end folds this into its own exit status.
pub fn error_reported() -> bool {
    ERROR_REPORTED.load(Ordering::Relaxed)
}

pub fn clear_error() {
    ERROR_REPORTED.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ShellError::NoSuchJob("%7".to_string()).to_string(),
            "no such job: %7"
        );
        assert_eq!(
            ShellError::AmbiguousJobSpec("sl".to_string()).to_string(),
            "ambiguous job specification: %sl"
        );
        assert_eq!(ShellError::NoCurrentJob.to_string(), "no current job");
        assert_eq!(
            ShellError::JobNotStopped(3).to_string(),
            "job [3] is not stopped"
        );
    }

    #[test]
    fn test_report_latches_flag() {
        clear_error();
        assert!(!error_reported());
        report("something went sideways");
        assert!(error_reported());
        clear_error();
        assert!(!error_reported());
    }
}
