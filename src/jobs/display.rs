//! Human-readable status reporting for jobs and their processes.
//!
//! The layouts follow the POSIX `jobs` output; the column widths are part of
//! the user-visible interface and must not drift.

use std::borrow::Cow;
use std::io::{self, Write};

use super::{Job, JobList, JobState, Process};
use crate::signal;

impl Process {
    /// Status of this process as displayed by `jobs`, e.g. "Running" or
    /// "Stopped(SIGTSTP)". Borrowed for the fixed strings, owned otherwise.
    pub fn status_string(&self) -> Cow<'static, str> {
        match self.state {
            JobState::Running => Cow::Borrowed("Running"),
            JobState::Stopped => Cow::Owned(format!(
                "Stopped(SIG{})",
                signal::signal_name(libc::WSTOPSIG(self.status))
            )),
            JobState::Done => {
                if self.pid.as_raw() == 0 {
                    // never forked: the status word is already an exit code
                    return exit_code_string(self.status);
                }
                if libc::WIFEXITED(self.status) {
                    return exit_code_string(libc::WEXITSTATUS(self.status));
                }
                let name = signal::signal_name(libc::WTERMSIG(self.status));
                if libc::WCOREDUMP(self.status) {
                    Cow::Owned(format!("Killed (SIG{name}: core dumped)"))
                } else {
                    Cow::Owned(format!("Killed (SIG{name})"))
                }
            }
        }
    }
}

fn exit_code_string(code: i32) -> Cow<'static, str> {
    if code == libc::EXIT_SUCCESS {
        Cow::Borrowed("Done")
    } else {
        Cow::Owned(format!("Done({code})"))
    }
}

impl Job {
    /// Status of the whole job: "Running" while anything runs, the status of
    /// the tail-most stopped process while stopped, and the status of the
    /// tail process once done.
    pub fn status_string(&self) -> Cow<'static, str> {
        match self.state {
            JobState::Running => Cow::Borrowed("Running"),
            JobState::Stopped => self
                .procs
                .iter()
                .rev()
                .find(|p| p.state == JobState::Stopped)
                .expect("a stopped job has a stopped process")
                .status_string(),
            JobState::Done => self
                .procs
                .last()
                .expect("a job has at least one process")
                .status_string(),
        }
    }

    /// Name of the job. A single-process job lends out its process's name;
    /// a pipeline joins the process names with " | ", prefixed with "| "
    /// when the pipeline is loop-shaped.
    pub fn name(&self) -> Cow<'_, str> {
        if self.procs.len() == 1 {
            return Cow::Borrowed(self.procs[0].name.as_str());
        }
        let mut name = String::new();
        if self.loop_pipe {
            name.push_str("| ");
        }
        for (i, p) in self.procs.iter().enumerate() {
            if i > 0 {
                name.push_str(" | ");
            }
            name.push_str(&p.name);
        }
        Cow::Owned(name)
    }
}

impl JobList {
    /// Prints the status of one numbered job, or of every numbered job when
    /// `jobnumber` is `None`. A job that does not exist prints nothing; with
    /// `changed_only`, jobs whose state has not changed since the last
    /// report are skipped. `verbose` selects the process-wise layout, on
    /// which `posix` suppresses the redundant status column of continuation
    /// lines.
    ///
    /// Reporting a finished job removes it from the table.
    pub fn print_job_status(
        &mut self,
        jobnumber: Option<usize>,
        changed_only: bool,
        verbose: bool,
        posix: bool,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let Some(jobnumber) = jobnumber else {
            let mut n = 1;
            while n < self.slots.len() {
                self.print_job_status(Some(n), changed_only, verbose, posix, out)?;
                n += 1;
            }
            return Ok(());
        };

        let marker = if jobnumber == self.current {
            '+'
        } else if jobnumber == self.previous {
            '-'
        } else {
            ' '
        };

        let Some(job) = self.get_job(jobnumber) else {
            return Ok(());
        };
        if changed_only && !job.state_changed {
            return Ok(());
        }

        if !verbose {
            writeln!(
                out,
                "[{}] {} {:<20} {}",
                jobnumber,
                marker,
                job.status_string(),
                job.name()
            )?;
        } else {
            let head = &job.procs[0];
            let looppipe = if job.loop_pipe { '|' } else { ' ' };
            writeln!(
                out,
                "[{}] {} {:>5} {:<20} {} {}",
                jobnumber,
                marker,
                head.pid.as_raw(),
                head.status_string(),
                looppipe,
                head.name
            )?;
            for p in &job.procs[1..] {
                let status = if posix {
                    Cow::Borrowed("")
                } else {
                    p.status_string()
                };
                writeln!(out, "      {:>5} {:<20} | {}", p.pid.as_raw(), status, p.name)?;
            }
        }

        let done = job.state == JobState::Done;
        if let Some(job) = self.get_job_mut(jobnumber) {
            job.state_changed = false;
        }
        if done {
            self.remove_job(jobnumber);
        }
        Ok(())
    }
}
