//! Ctrl-C handling during `sync`.
//!
//! The first SIGINT or SIGTERM cancels the running batch: transactions that
//! have not started their swap roll back at the next checkpoint. Signals are
//! handled on a background thread until the guard is dropped.

use std::thread::{self, JoinHandle};

use caffeine_core::CancelToken;

pub struct InterruptGuard {
    #[cfg(unix)]
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(unix)]
pub fn cancel_on_interrupt(token: CancelToken) -> Option<InterruptGuard> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            tracing::warn!(error = %e, "could not install interrupt handler");
            return None;
        }
    };
    let handle = signals.handle();
    let thread = thread::spawn(move || {
        for signal in signals.forever() {
            if !token.is_cancelled() {
                tracing::warn!(signal, "interrupted, rolling back unfinished plugins");
                eprintln!("Interrupted: finishing started swaps, rolling back the rest...");
            }
            token.cancel();
        }
    });
    Some(InterruptGuard {
        handle,
        thread: Some(thread),
    })
}

#[cfg(not(unix))]
pub fn cancel_on_interrupt(_token: CancelToken) -> Option<InterruptGuard> {
    None
}
