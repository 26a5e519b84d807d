use crate::error;
use crate::signal;
use anyhow::Result;
use nix::errno::Errno;
use nix::unistd::Pid;

mod display;

/// Slot number of the active job: the pipeline currently being launched,
/// before it is given a user-visible job number.
pub const ACTIVE_JOB: usize = 0;

/// State of a process or of a whole job.
///
/// A job's state is derived from its processes' states: `Running` if any
/// process still runs, else `Stopped` if any process is stopped, else `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

/// One child process of a pipeline.
#[derive(Debug, Clone)]
pub struct Process {
    /// Process id. A raw value of 0 marks a process that was never actually
    /// forked; its `status` then holds a plain exit code instead of a wait
    /// status word.
    pub pid: Pid,
    pub state: JobState,
    /// Raw status word as returned by `waitpid`, decodable with the
    /// `libc::WIF*` macros (or a plain exit code, see `pid`).
    pub status: i32,
    /// Display name, owned by the process record.
    pub name: String,
}

impl Process {
    /// Creates a record for a freshly launched child.
    pub fn new(pid: Pid, name: impl Into<String>) -> Self {
        Self {
            pid,
            state: JobState::Running,
            status: 0,
            name: name.into(),
        }
    }

    /// Creates a record for a pipeline segment that ran without forking,
    /// remembering only its exit code.
    pub fn completed(exit_code: i32, name: impl Into<String>) -> Self {
        Self {
            pid: Pid::from_raw(0),
            state: JobState::Done,
            status: exit_code,
            name: name.into(),
        }
    }
}

/// A pipeline of one or more child processes sharing a job number.
#[derive(Debug, Clone)]
pub struct Job {
    /// Process group the pipeline runs in.
    pub pgid: Pid,
    /// Aggregate state, kept in sync with the processes by the reaper.
    pub state: JobState,
    /// Set when the aggregate state changes, cleared when the change has
    /// been reported to the user.
    pub state_changed: bool,
    /// The pipeline is loop-shaped; affects how its name is displayed.
    pub loop_pipe: bool,
    /// The processes of the pipeline, in pipeline order. Never empty; the
    /// last one is the tail, whose status defines the job's exit status.
    pub procs: Vec<Process>,
}

impl Job {
    pub fn new(pgid: Pid, procs: Vec<Process>) -> Self {
        assert!(!procs.is_empty(), "a job needs at least one process");
        let state = aggregate_state(&procs);
        Self {
            pgid,
            state,
            state_changed: false,
            loop_pipe: false,
            procs,
        }
    }

    /// Recomputes the aggregate state from the process states, raising the
    /// changed flag on a transition.
    pub(crate) fn refresh_state(&mut self) {
        let state = aggregate_state(&self.procs);
        if state != self.state {
            self.state = state;
            self.state_changed = true;
        }
    }

    /// Exit status the shell reports for this job.
    ///
    /// The job must be done or stopped; asking for the exit status of a
    /// running job is a bug in the caller.
    pub fn exit_status(&self) -> i32 {
        match self.state {
            JobState::Done => {
                let tail = self.procs.last().expect("a job has at least one process");
                if tail.pid.as_raw() == 0 {
                    tail.status
                } else {
                    decode_wait_status(tail.status)
                }
            }
            JobState::Stopped => decode_wait_status(
                self.procs
                    .iter()
                    .rev()
                    .find(|p| p.state == JobState::Stopped)
                    .expect("a stopped job has a stopped process")
                    .status,
            ),
            JobState::Running => panic!("exit status of a running job"),
        }
    }
}

fn aggregate_state(procs: &[Process]) -> JobState {
    let mut stopped = false;
    for p in procs {
        match p.state {
            JobState::Running => return JobState::Running,
            JobState::Stopped => stopped = true,
            JobState::Done => {}
        }
    }
    if stopped {
        JobState::Stopped
    } else {
        JobState::Done
    }
}

/// Shell exit status for a raw wait status word: the exit code for a normal
/// exit, 128 + N for a job terminated or stopped by signal N.
fn decode_wait_status(status: i32) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        libc::WTERMSIG(status) + signal::SIGNAL_EXIT_OFFSET
    } else if libc::WIFSTOPPED(status) {
        libc::WSTOPSIG(status) + signal::SIGNAL_EXIT_OFFSET
    } else if libc::WIFCONTINUED(status) {
        0
    } else {
        unreachable!("unrecognized wait status {status:#x}")
    }
}

/// The job table of a shell.
///
/// Slot 0 is reserved for the active job; slots 1.. hold numbered jobs. The
/// table also tracks the current (`%+`) and previous (`%-`) job numbers,
/// where 0 means "none".
pub struct JobList {
    slots: Vec<Option<Job>>,
    current: usize,
    previous: usize,
    /// Cleared permanently the first time the kernel rejects WCONTINUED.
    wait_continued: bool,
}

impl Default for JobList {
    fn default() -> Self {
        Self::new()
    }
}

impl JobList {
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            current: 0,
            previous: 0,
            wait_continued: true,
        }
    }

    /// Installs `job` as the active job. The active slot must be empty.
    pub fn set_active_job(&mut self, job: Job) {
        assert!(
            self.slots[ACTIVE_JOB].is_none(),
            "active job slot is occupied"
        );
        self.slots[ACTIVE_JOB] = Some(job);
    }

    /// Moves the active job into the numbered table, reusing the lowest
    /// empty slot and appending only when the table is full. Returns the
    /// assigned job number.
    ///
    /// If `current` is true or there is no current job, the new job becomes
    /// the current job; otherwise it becomes the previous job if there was
    /// none.
    pub fn add_job(&mut self, current: bool) -> usize {
        let job = self.slots[ACTIVE_JOB]
            .take()
            .expect("add_job: no active job installed");

        let number = match (1..self.slots.len()).find(|&n| self.slots[n].is_none()) {
            Some(n) => {
                self.slots[n] = Some(job);
                n
            }
            None => {
                self.slots.push(Some(job));
                self.slots.len() - 1
            }
        };

        if current || self.current == 0 {
            self.set_current_job(number);
        } else if self.previous == 0 {
            self.previous = number;
        }
        number
    }

    /// Returns the job of the specified number, if any. Number 0 names the
    /// active job.
    pub fn get_job(&self, jobnumber: usize) -> Option<&Job> {
        self.slots.get(jobnumber).and_then(|slot| slot.as_ref())
    }

    pub fn get_job_mut(&mut self, jobnumber: usize) -> Option<&mut Job> {
        self.slots.get_mut(jobnumber).and_then(|slot| slot.as_mut())
    }

    /// Iterates over the numbered jobs in ascending job-number order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Job)> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(n, slot)| slot.as_ref().map(|job| (n, job)))
    }

    /// Number of the numbered job containing `pid`, if any.
    pub fn job_of_pid(&self, pid: Pid) -> Option<usize> {
        self.iter()
            .find(|(_, job)| job.procs.iter().any(|p| p.pid == pid))
            .map(|(n, _)| n)
    }

    /// Removes the job of the specified number. If it was the current or
    /// previous job, the designations are repaired.
    pub fn remove_job(&mut self, jobnumber: usize) {
        if let Some(slot) = self.slots.get_mut(jobnumber) {
            *slot = None;
        }
        self.trim();

        if jobnumber == self.current {
            self.current = self.previous;
            self.previous = self.find_next_job(self.current);
        } else if jobnumber == self.previous {
            self.previous = self.find_next_job(self.current);
        }
    }

    /// Removes every job, the active one included, and resets the current
    /// and previous designations.
    pub fn remove_all_jobs(&mut self) {
        self.slots = vec![None];
        self.current = 0;
        self.previous = 0;
    }

    /// Drops unused trailing slots, releasing memory once the table has
    /// grown past 20 slots and is more than half empty.
    fn trim(&mut self) {
        let mut tail = self.slots.len();
        while tail > 1 && self.slots[tail - 1].is_none() {
            tail -= 1;
        }
        self.slots.truncate(tail);
        if self.slots.capacity() > 20 && self.slots.capacity() / 2 > self.slots.len() {
            self.slots.shrink_to(tail);
        }
    }

    pub fn current_job_number(&self) -> usize {
        self.current
    }

    pub fn previous_job_number(&self) -> usize {
        self.previous
    }

    /// Makes `jobnumber` the current job and rotates the previous job.
    ///
    /// The outgoing current job becomes the previous job. Passing 0 promotes
    /// the previous job to current (falling back to an arbitrary live job).
    /// Afterwards the previous job is re-picked whenever it would be absent
    /// or collide with the current job.
    pub fn set_current_job(&mut self, jobnumber: usize) {
        debug_assert!(
            jobnumber == 0 || self.get_job(jobnumber).is_some(),
            "set_current_job: job [{jobnumber}] does not exist"
        );

        self.previous = self.current;
        let mut jobnumber = jobnumber;
        if jobnumber == 0 {
            jobnumber = self.previous;
            if jobnumber == 0 || self.get_job(jobnumber).is_none() {
                jobnumber = self.find_next_job(0);
            }
        }
        self.current = jobnumber;

        if self.previous == 0 || self.previous == self.current {
            self.previous = self.find_next_job(self.current);
        }
    }

    /// Picks a job number other than `excl`, suitable as a new current or
    /// previous job: stopped jobs are preferred (the user most likely wants
    /// to resume one of those), and among equals the higher number wins.
    /// Returns 0 if there is nothing to pick.
    fn find_next_job(&self, excl: usize) -> usize {
        for n in (1..self.slots.len()).rev() {
            if n != excl {
                if let Some(job) = self.get_job(n) {
                    if job.state == JobState::Stopped {
                        return n;
                    }
                }
            }
        }
        for n in (1..self.slots.len()).rev() {
            if n != excl && self.get_job(n).is_some() {
                return n;
            }
        }
        0
    }

    /// Number of numbered jobs in the table.
    pub fn job_count(&self) -> usize {
        self.slots[1..].iter().filter(|slot| slot.is_some()).count()
    }

    /// Number of stopped numbered jobs in the table.
    pub fn stopped_job_count(&self) -> usize {
        self.iter()
            .filter(|(_, job)| job.state == JobState::Stopped)
            .count()
    }

    /// Marks a continued job and its stopped processes running again, as
    /// after sending SIGCONT to its process group.
    pub fn mark_job_running(&mut self, jobnumber: usize) {
        if let Some(job) = self.get_job_mut(jobnumber) {
            for p in job.procs.iter_mut() {
                if p.state == JobState::Stopped {
                    p.state = JobState::Running;
                }
            }
            job.refresh_state();
        }
    }

    /// Consumes every immediately available child status change and folds it
    /// into the table. Never blocks.
    pub fn reap(&mut self) {
        loop {
            let mut status: libc::c_int = 0;
            let mut options = libc::WUNTRACED | libc::WNOHANG;
            if self.wait_continued {
                options |= libc::WCONTINUED;
            }
            let pid = unsafe { libc::waitpid(-1, &mut status, options) };
            if pid < 0 {
                match Errno::last() {
                    Errno::EINTR => continue,
                    Errno::ECHILD => return,
                    // Some kernels reject WCONTINUED as invalid even where it
                    // is defined; retry without it, permanently.
                    Errno::EINVAL if self.wait_continued => {
                        self.wait_continued = false;
                        continue;
                    }
                    errno => {
                        error::report(format_args!("waitpid: {errno}"));
                        return;
                    }
                }
            }
            if pid == 0 {
                return;
            }
            self.apply_status_change(Pid::from_raw(pid), status);
        }
    }

    fn apply_status_change(&mut self, pid: Pid, status: i32) {
        for job in self.slots.iter_mut().flatten() {
            let mut matched = false;
            if let Some(p) = job.procs.iter_mut().find(|p| p.pid == pid) {
                p.status = status;
                if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
                    p.state = JobState::Done;
                } else if libc::WIFSTOPPED(status) {
                    p.state = JobState::Stopped;
                } else if libc::WIFCONTINUED(status) {
                    p.state = JobState::Running;
                }
                matched = true;
            }
            if matched {
                job.refresh_state();
                return;
            }
        }
        // pid not in the table; this happens e.g. when the job was disowned
    }

    /// Blocks until the job is done, or done-or-stopped when
    /// `return_on_stop` is true. Returns immediately if the job is already
    /// in such a state. `jobnumber` must name an existing job.
    ///
    /// SIGCHLD and SIGHUP stay blocked across the state checks; the
    /// suspension itself atomically re-enables SIGCHLD, so a status change
    /// can never slip between a check and the suspension. Reconciliation is
    /// driven from here after every wakeup.
    pub fn wait_for_job(&mut self, jobnumber: usize, return_on_stop: bool) -> Result<()> {
        assert!(
            self.get_job(jobnumber).is_some(),
            "wait_for_job: job [{jobnumber}] does not exist"
        );

        signal::install_sigchld_handler()?;
        signal::block_sigchld_and_sighup()?;
        let result = loop {
            self.reap();
            match self.get_job(jobnumber).map(|job| job.state) {
                Some(JobState::Done) | None => break Ok(()),
                Some(JobState::Stopped) if return_on_stop => break Ok(()),
                _ => {}
            }
            if let Err(errno) = signal::wait_for_sigchld() {
                break Err(errno.into());
            }
        };
        signal::unblock_sigchld_and_sighup()?;
        result
    }
}
