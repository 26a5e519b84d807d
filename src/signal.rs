//! Signal plumbing for job control.
//!
//! The waiter in the jobs module needs three things from here: blocking and
//! unblocking of the child-status signals, a suspension primitive that
//! re-enables SIGCHLD and sleeps in one atomic step, and a handler for
//! SIGCHLD so the suspension actually wakes up. Everything else in this
//! module is small change: symbolic signal names and the exit-status offset
//! for signal deaths.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use signal_hook::consts::SIGCHLD;

/// Offset added to a signal number to form a shell exit status (128 + N).
pub const SIGNAL_EXIT_OFFSET: i32 = 128;

/// Raised by the SIGCHLD handler, consumed by `take_sigchld`.
static SIGCHLD_SEEN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Installs the SIGCHLD handler. Idempotent.
///
/// The handler only raises a flag. No helper thread is involved: the
/// delivery has to interrupt `wait_for_sigchld` in the thread that called
/// it, and a thread consuming signals on the side would swallow exactly
/// those deliveries.
pub fn install_sigchld_handler() -> Result<()> {
    if SIGCHLD_SEEN.get().is_some() {
        return Ok(());
    }
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGCHLD, Arc::clone(&flag))?;
    let _ = SIGCHLD_SEEN.set(flag);
    Ok(())
}

/// True if a SIGCHLD arrived since the last call; clears the flag. The shell
/// front end polls this between commands to decide when to reap.
pub fn take_sigchld() -> bool {
    SIGCHLD_SEEN
        .get()
        .map(|flag| flag.swap(false, Ordering::SeqCst))
        .unwrap_or(false)
}

fn chld_and_hup() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set.add(Signal::SIGHUP);
    set
}

/// Blocks SIGCHLD and SIGHUP in the calling thread.
pub fn block_sigchld_and_sighup() -> nix::Result<()> {
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&chld_and_hup()), None)
}

/// Undoes `block_sigchld_and_sighup`.
pub fn unblock_sigchld_and_sighup() -> nix::Result<()> {
    sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&chld_and_hup()), None)
}

/// Suspends the calling thread until a SIGCHLD is delivered.
///
/// Must be called with SIGCHLD blocked. The suspension mask is the current
/// mask with SIGCHLD removed, so re-enabling and sleeping happen atomically
/// and a delivery pending from before the call wakes it immediately. A
/// check-then-sleep sequence built from separate calls would lose exactly
/// those wakeups.
pub fn wait_for_sigchld() -> nix::Result<()> {
    let mut mask = SigSet::thread_get_mask()?;
    mask.remove(Signal::SIGCHLD);
    // sigsuspend only ever "fails" with EINTR, which is the normal path:
    // a handler ran and the original mask is back in place
    unsafe { libc::sigsuspend(mask.as_ref()) };
    Ok(())
}

/// Symbolic name of signal `sig` without the SIG prefix, e.g. "TSTP".
/// Unknown numbers are rendered as the number itself.
pub fn signal_name(sig: i32) -> Cow<'static, str> {
    match Signal::try_from(sig) {
        Ok(signal) => {
            let name = signal.as_str();
            Cow::Borrowed(name.strip_prefix("SIG").unwrap_or(name))
        }
        Err(_) => Cow::Owned(sig.to_string()),
    }
}
