use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};

/// Signals whose disposition the judge process may have changed and that
/// would otherwise survive `execve`
const RESET_SIGNALS: [Signal; 4] = [
    Signal::SIGPIPE,
    Signal::SIGXFSZ,
    Signal::SIGXCPU,
    Signal::SIGSYS,
];

/// Restore default signal state for the judged program. Child-safe.
///
/// Ignored dispositions and the blocked mask are inherited across exec;
/// the Rust runtime ignores SIGPIPE, so without this the judged program
/// would never die of a broken pipe.
pub fn reset_for_exec() -> nix::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in RESET_SIGNALS {
        // SAFETY: installing SIG_DFL has no handler code to be unsafe.
        unsafe { signal::sigaction(sig, &default) }?;
    }
    signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
}

/// Ask the kernel to SIGKILL this process when its parent thread exits. Child-safe.
pub fn kill_on_parent_death() -> nix::Result<()> {
    nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)
}

/// Signal name for logs
pub fn describe(signal_number: i32) -> String {
    match Signal::try_from(signal_number) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("signal {}", signal_number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_known_and_unknown_signals() {
        assert_eq!(describe(libc::SIGKILL), "SIGKILL");
        assert_eq!(describe(libc::SIGSYS), "SIGSYS");
        assert_eq!(describe(1000), "signal 1000");
    }
}
