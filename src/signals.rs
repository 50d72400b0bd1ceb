//! Signal dispositions for the interpreter and its children.
//!
//! The interpreter must survive Control-C while a foreground child runs. It
//! installs a SIGINT handler that only records the interrupt; children restore
//! the default disposition before they start, so the same keystroke still
//! stops them. SIGPIPE is ignored by the Rust runtime and that would survive
//! exec, so children put it back to default as well.

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn record_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the recording handler for SIGINT in the interpreter process.
pub fn install_interrupt_handler() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(record_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only touches an atomic.
    unsafe { sigaction(Signal::SIGINT, &action) }.map(drop)
}

/// Put SIGINT and SIGPIPE back to their default actions; called in a child right after fork.
pub(crate) fn restore_child_defaults() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in [Signal::SIGINT, Signal::SIGPIPE] {
        // SAFETY: installing SIG_DFL has no handler to be unsafe in.
        let _ = unsafe { sigaction(signal, &action) };
    }
}

/// Return and clear whether SIGINT arrived since the last call.
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}
