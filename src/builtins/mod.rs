use crate::error::ShellError;
use crate::jobs::{Job, JobList};
use crate::runtime::Runtime;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::LazyLock;

mod jobs;
mod wait;

type BuiltinFn = fn(&[String], &mut Runtime) -> Result<ExecutionResult>;

/// Process-global builtin table. Initialized once on first access via LazyLock.
/// Uses &'static str keys to avoid per-call String allocations.
static BUILTIN_MAP: LazyLock<HashMap<&'static str, BuiltinFn>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, BuiltinFn> = HashMap::with_capacity(5);
    m.insert("jobs", jobs::builtin_jobs as BuiltinFn);
    m.insert("fg", jobs::builtin_fg);
    m.insert("bg", jobs::builtin_bg);
    m.insert("disown", jobs::builtin_disown);
    m.insert("wait", wait::builtin_wait);
    m
});

/// Result of executing a builtin.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecutionResult {
    pub fn success(stdout: String) -> Self {
        Self {
            stdout,
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code,
        }
    }
}

/// Zero-cost wrapper around the process-global builtin table.
#[derive(Clone, Default)]
pub struct Builtins;

impl Builtins {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    pub fn is_builtin(&self, name: &str) -> bool {
        BUILTIN_MAP.contains_key(name)
    }

    pub fn execute(
        &self,
        name: &str,
        args: Vec<String>,
        runtime: &mut Runtime,
    ) -> Result<ExecutionResult> {
        if let Some(func) = BUILTIN_MAP.get(name) {
            func(&args, runtime)
        } else {
            Err(anyhow!("Builtin '{}' not found", name))
        }
    }
}

/// Resolves a POSIX job specification to a job number.
///
/// Supports `%n`, `%%` and `%+` (current job), `%-` (previous job),
/// `%string` (command prefix), `%?string` (command substring), and a bare
/// job number.
pub fn parse_job_spec(jobs: &JobList, spec: &str) -> Result<usize, ShellError> {
    let Some(body) = spec.strip_prefix('%') else {
        return match spec.parse::<usize>() {
            Ok(n) if n > 0 && jobs.get_job(n).is_some() => Ok(n),
            Ok(_) => Err(ShellError::NoSuchJob(spec.to_string())),
            Err(_) => Err(ShellError::InvalidJobSpec(spec.to_string())),
        };
    };

    match body {
        "" | "%" | "+" => match jobs.current_job_number() {
            0 => Err(ShellError::NoCurrentJob),
            n => Ok(n),
        },
        "-" => match jobs.previous_job_number() {
            0 => Err(ShellError::NoPreviousJob),
            n => Ok(n),
        },
        _ => {
            if let Some(needle) = body.strip_prefix('?') {
                if needle.is_empty() {
                    return Err(ShellError::InvalidJobSpec(spec.to_string()));
                }
                return match_one_job(jobs, body, |job| job.name().contains(needle));
            }
            if let Ok(n) = body.parse::<usize>() {
                return if n > 0 && jobs.get_job(n).is_some() {
                    Ok(n)
                } else {
                    Err(ShellError::NoSuchJob(spec.to_string()))
                };
            }
            match_one_job(jobs, body, |job| job.name().starts_with(body))
        }
    }
}

fn match_one_job(
    jobs: &JobList,
    body: &str,
    pred: impl Fn(&Job) -> bool,
) -> Result<usize, ShellError> {
    let mut found = None;
    for (n, job) in jobs.iter() {
        if pred(job) {
            if found.is_some() {
                return Err(ShellError::AmbiguousJobSpec(body.to_string()));
            }
            found = Some(n);
        }
    }
    found.ok_or_else(|| ShellError::NoSuchJob(format!("%{body}")))
}
