use super::{parse_job_spec, ExecutionResult};
use crate::error::ShellError;
use crate::jobs::JobState;
use crate::runtime::Runtime;
use anyhow::{anyhow, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getpgrp, Pid};

/// List jobs. `-l` selects the process-wise listing with pids.
pub fn builtin_jobs(args: &[String], runtime: &mut Runtime) -> Result<ExecutionResult> {
    let mut verbose = false;
    let mut operands = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-l" => verbose = true,
            _ if arg.starts_with('-') => return Err(anyhow!("jobs: invalid option: {arg}")),
            _ => operands.push(arg.as_str()),
        }
    }

    runtime.jobs_mut().reap();

    let posix = runtime.options.posixly_correct;
    let mut out = Vec::new();
    if operands.is_empty() {
        runtime
            .jobs_mut()
            .print_job_status(None, false, verbose, posix, &mut out)?;
    } else {
        for operand in operands {
            let n = parse_job_spec(runtime.jobs(), operand)?;
            runtime
                .jobs_mut()
                .print_job_status(Some(n), false, verbose, posix, &mut out)?;
        }
    }
    Ok(ExecutionResult::success(
        String::from_utf8_lossy(&out).into_owned(),
    ))
}

/// Brings a job to the foreground, continuing it if stopped, and waits for
/// it to finish or stop again. The job becomes the current job.
pub fn builtin_fg(args: &[String], runtime: &mut Runtime) -> Result<ExecutionResult> {
    runtime.jobs_mut().reap();

    let n = match args {
        [] => match runtime.jobs().current_job_number() {
            0 => return Err(ShellError::NoCurrentJob.into()),
            n => n,
        },
        [spec] => parse_job_spec(runtime.jobs(), spec)?,
        _ => return Err(anyhow!("fg: too many arguments")),
    };

    let (pgid, stopped, name) = {
        let job = runtime
            .jobs()
            .get_job(n)
            .ok_or_else(|| ShellError::NoSuchJob(format!("%{n}")))?;
        (job.pgid, job.state == JobState::Stopped, job.name().into_owned())
    };
    let mut stdout = format!("{name}\n");

    // hand the terminal's foreground slot to the job's process group; this
    // fails harmlessly when stdin is not a terminal
    unsafe {
        libc::tcsetpgrp(libc::STDIN_FILENO, pgid.as_raw());
    }

    if stopped {
        kill(Pid::from_raw(-pgid.as_raw()), Signal::SIGCONT)
            .map_err(|errno| anyhow!("fg: cannot continue job [{n}]: {errno}"))?;
        runtime.jobs_mut().mark_job_running(n);
    }
    runtime.jobs_mut().set_current_job(n);

    let wait_result = runtime.jobs_mut().wait_for_job(n, true);

    // take the terminal back before touching the job table again
    unsafe {
        libc::tcsetpgrp(libc::STDIN_FILENO, getpgrp().as_raw());
    }
    wait_result?;

    let (state, code) = {
        let job = runtime
            .jobs()
            .get_job(n)
            .ok_or_else(|| anyhow!("fg: job [{n}] vanished"))?;
        (job.state, job.exit_status())
    };
    if state == JobState::Stopped {
        // stopped again: report it the way the jobs builtin would
        let posix = runtime.options.posixly_correct;
        let mut out = Vec::new();
        runtime
            .jobs_mut()
            .print_job_status(Some(n), false, false, posix, &mut out)?;
        stdout.push_str(&String::from_utf8_lossy(&out));
    } else {
        runtime.jobs_mut().remove_job(n);
    }
    runtime.set_last_exit_code(code);
    Ok(ExecutionResult {
        stdout,
        stderr: String::new(),
        exit_code: code,
    })
}

/// Resumes stopped jobs in the background.
pub fn builtin_bg(args: &[String], runtime: &mut Runtime) -> Result<ExecutionResult> {
    runtime.jobs_mut().reap();

    let numbers: Vec<usize> = if args.is_empty() {
        match runtime.jobs().current_job_number() {
            0 => return Err(ShellError::NoCurrentJob.into()),
            n => vec![n],
        }
    } else {
        args.iter()
            .map(|spec| parse_job_spec(runtime.jobs(), spec))
            .collect::<Result<_, _>>()?
    };

    let mut stdout = String::new();
    for n in numbers {
        let (pgid, state, name) = {
            let job = runtime
                .jobs()
                .get_job(n)
                .ok_or_else(|| ShellError::NoSuchJob(format!("%{n}")))?;
            (job.pgid, job.state, job.name().into_owned())
        };
        if state != JobState::Stopped {
            return Err(ShellError::JobNotStopped(n).into());
        }
        kill(Pid::from_raw(-pgid.as_raw()), Signal::SIGCONT)
            .map_err(|errno| anyhow!("bg: cannot continue job [{n}]: {errno}"))?;
        runtime.jobs_mut().mark_job_running(n);
        stdout.push_str(&format!("[{n}] {name} &\n"));
    }
    Ok(ExecutionResult::success(stdout))
}

/// Removes jobs from the table without signalling them. With no operands
/// the current job is disowned; `-a` disowns everything.
pub fn builtin_disown(args: &[String], runtime: &mut Runtime) -> Result<ExecutionResult> {
    if args.is_empty() {
        match runtime.jobs().current_job_number() {
            0 => return Err(ShellError::NoCurrentJob.into()),
            n => runtime.jobs_mut().remove_job(n),
        }
        return Ok(ExecutionResult::default());
    }
    for arg in args {
        if arg == "-a" {
            runtime.jobs_mut().remove_all_jobs();
            continue;
        }
        let n = parse_job_spec(runtime.jobs(), arg)?;
        runtime.jobs_mut().remove_job(n);
    }
    Ok(ExecutionResult::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Job, Process};

    fn add_fake_job(runtime: &mut Runtime, pid: i32, name: &str, current: bool) -> usize {
        runtime.jobs_mut().set_active_job(Job::new(
            Pid::from_raw(pid),
            vec![Process::new(Pid::from_raw(pid), name)],
        ));
        runtime.jobs_mut().add_job(current)
    }

    fn add_done_job(runtime: &mut Runtime, code: i32, name: &str) -> usize {
        runtime.jobs_mut().set_active_job(Job::new(
            Pid::from_raw(0),
            vec![Process::completed(code, name)],
        ));
        runtime.jobs_mut().add_job(true)
    }

    #[test]
    fn test_jobs_empty() {
        let mut runtime = Runtime::new();
        let result = builtin_jobs(&[], &mut runtime).unwrap();
        assert_eq!(result.stdout, "");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn test_jobs_lists_with_markers() {
        let mut runtime = Runtime::new();
        // pids that never existed: reap leaves the entries untouched
        add_fake_job(&mut runtime, 99991, "sleep 100", true);
        add_fake_job(&mut runtime, 99992, "sleep 200", true);

        let result = builtin_jobs(&[], &mut runtime).unwrap();
        assert!(result.stdout.contains("[1] - Running"));
        assert!(result.stdout.contains("[2] + Running"));
        assert!(result.stdout.contains("sleep 100"));
        assert!(result.stdout.contains("sleep 200"));
    }

    #[test]
    fn test_jobs_verbose_shows_pid() {
        let mut runtime = Runtime::new();
        add_fake_job(&mut runtime, 99993, "sleep 100", true);
        let result = builtin_jobs(&["-l".to_string()], &mut runtime).unwrap();
        assert!(result.stdout.contains("99993"));
    }

    #[test]
    fn test_jobs_invalid_option() {
        let mut runtime = Runtime::new();
        let result = builtin_jobs(&["-z".to_string()], &mut runtime);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("invalid option"));
    }

    #[test]
    fn test_jobs_reports_and_removes_done_job() {
        let mut runtime = Runtime::new();
        add_done_job(&mut runtime, 0, "true");
        let result = builtin_jobs(&[], &mut runtime).unwrap();
        assert!(result.stdout.contains("Done"));
        assert_eq!(runtime.jobs().job_count(), 0);
    }

    #[test]
    fn test_jobs_single_operand() {
        let mut runtime = Runtime::new();
        add_fake_job(&mut runtime, 99994, "sleep 1", true);
        add_fake_job(&mut runtime, 99995, "sleep 2", true);
        let result = builtin_jobs(&["%1".to_string()], &mut runtime).unwrap();
        assert!(result.stdout.contains("[1]"));
        assert!(!result.stdout.contains("[2]"));
    }

    #[test]
    fn test_fg_without_jobs() {
        let mut runtime = Runtime::new();
        let result = builtin_fg(&[], &mut runtime);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("no current job"));
    }

    #[test]
    fn test_fg_too_many_arguments() {
        let mut runtime = Runtime::new();
        let result = builtin_fg(&["%1".to_string(), "%2".to_string()], &mut runtime);
        assert!(result.is_err());
    }

    #[test]
    fn test_fg_of_done_job_reports_its_status() {
        let mut runtime = Runtime::new();
        let n = add_done_job(&mut runtime, 3, "false");
        let result = builtin_fg(&[format!("%{n}")], &mut runtime).unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(result.stdout.starts_with("false\n"));
        assert_eq!(runtime.jobs().job_count(), 0);
        assert_eq!(runtime.last_exit_code(), 3);
    }

    #[test]
    fn test_bg_without_jobs() {
        let mut runtime = Runtime::new();
        let result = builtin_bg(&[], &mut runtime);
        assert!(result.is_err());
    }

    #[test]
    fn test_bg_of_running_job_fails() {
        let mut runtime = Runtime::new();
        add_fake_job(&mut runtime, 99996, "sleep 5", true);
        let result = builtin_bg(&[], &mut runtime);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not stopped"));
    }

    #[test]
    fn test_disown_current_job() {
        let mut runtime = Runtime::new();
        add_fake_job(&mut runtime, 99997, "sleep 5", true);
        builtin_disown(&[], &mut runtime).unwrap();
        assert_eq!(runtime.jobs().job_count(), 0);
        assert_eq!(runtime.jobs().current_job_number(), 0);
    }

    #[test]
    fn test_disown_all() {
        let mut runtime = Runtime::new();
        add_fake_job(&mut runtime, 99998, "a", true);
        add_fake_job(&mut runtime, 99999, "b", true);
        builtin_disown(&["-a".to_string()], &mut runtime).unwrap();
        assert_eq!(runtime.jobs().job_count(), 0);
    }

    #[test]
    fn test_disown_unknown_spec() {
        let mut runtime = Runtime::new();
        let result = builtin_disown(&["%4".to_string()], &mut runtime);
        assert!(result.is_err());
    }
}
