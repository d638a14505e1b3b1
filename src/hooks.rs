//! Process-exit cleanup
//!
//! Every live [`ShmContext`](crate::ShmContext) is swept at normal process
//! exit and on INT/TERM/HUP/QUIT/ABRT, so owned segments get unlinked even
//! when the process dies without reaching its own cleanup calls. The sweep
//! holds only weak references and `try_lock`s everything it touches;
//! a contended or poisoned context is skipped rather than deadlocked on.
//! On the signal path the process terminates right after the sweep.

use crate::context::ContextInner;
use signal_hook::consts::{SIGABRT, SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use std::sync::{Arc, Mutex, Once, OnceLock, Weak};

static CONTEXTS: OnceLock<Mutex<Vec<Weak<Mutex<ContextInner>>>>> = OnceLock::new();

/// Track a context for the exit sweep and make sure the hooks are in.
pub(crate) fn register_context(inner: &Arc<Mutex<ContextInner>>) {
    let contexts = CONTEXTS.get_or_init(|| Mutex::new(Vec::new()));
    if let Ok(mut list) = contexts.lock() {
        list.retain(|weak| weak.strong_count() > 0);
        list.push(Arc::downgrade(inner));
    }
    install();
}

fn install() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        // SAFETY: the callback only runs the best-effort sweep below.
        let rc = unsafe { libc::atexit(sweep_at_exit) };
        if rc != 0 {
            tracing::warn!("failed to install at-exit cleanup hook");
        }

        for sig in [SIGINT, SIGTERM, SIGHUP, SIGQUIT, SIGABRT] {
            // SAFETY: the handler touches nothing beyond try-locked tables
            // and then terminates the process.
            let registered = unsafe {
                signal_hook::low_level::register(sig, move || {
                    sweep();
                    signal_hook::low_level::exit(128 + sig);
                })
            };
            if let Err(e) = registered {
                tracing::warn!(signal = sig, error = %e, "failed to install cleanup signal handler");
            }
        }
    });
}

extern "C" fn sweep_at_exit() {
    sweep();
}

fn sweep() {
    let Some(contexts) = CONTEXTS.get() else {
        return;
    };
    let Ok(list) = contexts.try_lock() else {
        return;
    };
    sweep_list(&list);
}

fn sweep_list(list: &[Weak<Mutex<ContextInner>>]) {
    for weak in list {
        if let Some(ctx) = weak.upgrade() {
            if let Ok(mut inner) = ctx.try_lock() {
                inner.cleanup();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ShmContext;
    use crate::error::ShmError;

    // The global sweep runs over every context in the process, which in a
    // parallel test run would reach into other tests' segments; exercise
    // the sweep core against a private list instead.
    #[test]
    fn test_sweep_reclaims_and_is_idempotent() {
        let ctx = ShmContext::new();
        let name = ctx.create_segment(64).unwrap();
        let list = vec![Arc::downgrade(ctx.inner_handle())];

        sweep_list(&list);
        assert!(ctx.is_empty());
        sweep_list(&list);

        assert!(matches!(
            ShmContext::new().attach_segment(&name),
            Err(ShmError::NotFound { .. })
        ));
    }

    #[test]
    fn test_sweep_skips_dead_contexts() {
        let weak = {
            let ctx = ShmContext::new();
            Arc::downgrade(ctx.inner_handle())
        };
        assert_eq!(weak.strong_count(), 0);
        sweep_list(&[weak]);
    }
}
