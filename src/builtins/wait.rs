use super::{parse_job_spec, ExecutionResult};
use crate::jobs::JobState;
use crate::runtime::Runtime;
use anyhow::{anyhow, Result};
use nix::unistd::Pid;

/// Waits for background jobs.
///
/// Usage:
///   wait           - wait for every job in the table
///   wait %1        - wait for job 1
///   wait 1234      - wait for the job containing pid 1234
///
/// Returns the exit status of the last job waited for; 127 when an operand
/// names no known job. Waiting leaves the current/previous designations
/// alone except where consuming a finished job forces a repick.
pub fn builtin_wait(args: &[String], runtime: &mut Runtime) -> Result<ExecutionResult> {
    runtime.jobs_mut().reap();

    if args.is_empty() {
        loop {
            let next = runtime
                .jobs()
                .iter()
                .find(|(_, job)| job.state == JobState::Running)
                .map(|(n, _)| n);
            match next {
                Some(n) => runtime.jobs_mut().wait_for_job(n, false)?,
                None => break,
            }
        }
        // finished jobs are consumed by wait instead of lingering until the
        // next report; stopped ones stay listed
        let done: Vec<usize> = runtime
            .jobs()
            .iter()
            .filter(|(_, job)| job.state == JobState::Done)
            .map(|(n, _)| n)
            .collect();
        for n in done {
            runtime.jobs_mut().remove_job(n);
        }
        return Ok(ExecutionResult::default());
    }

    let mut exit_code = 0;
    for arg in args {
        let n = if arg.starts_with('%') {
            match parse_job_spec(runtime.jobs(), arg) {
                Ok(n) => n,
                Err(_) => {
                    exit_code = 127;
                    continue;
                }
            }
        } else {
            let pid = arg
                .parse::<i32>()
                .map_err(|_| anyhow!("wait: '{arg}': not a pid or valid job spec"))?;
            match runtime.jobs().job_of_pid(Pid::from_raw(pid)) {
                Some(n) => n,
                None => {
                    exit_code = 127;
                    continue;
                }
            }
        };
        runtime.jobs_mut().wait_for_job(n, false)?;
        exit_code = runtime
            .jobs()
            .get_job(n)
            .map(|job| job.exit_status())
            .unwrap_or(127);
        runtime.jobs_mut().remove_job(n);
    }
    runtime.set_last_exit_code(exit_code);
    Ok(ExecutionResult::with_exit_code(exit_code))
}
