//! Process-wide runtime installation and opportunistic thread attachment.

use std::{
    cell::Cell,
    sync::{Arc, PoisonError, RwLock},
};

use peerref_vm::{Env, Runtime};

static VM: RwLock<Option<Arc<Runtime>>> = RwLock::new(None);

/// Detaches the thread from the installed runtime when the thread exits.
/// Armed on the first successful [`get_env`].
struct ThreadDestructor {
    armed: Cell<bool>,
}

impl Drop for ThreadDestructor {
    fn drop(&mut self) {
        if self.armed.get() {
            if let Some(runtime) = vm() {
                runtime.detach_current_thread();
            }
        }
    }
}

thread_local! {
    static THREAD_DESTRUCTOR: ThreadDestructor = const {
        ThreadDestructor { armed: Cell::new(false) }
    };
}

/// Installs the runtime that managed handles resolve against, returning
/// the previous one.
pub fn set_vm(runtime: Option<Arc<Runtime>>) -> Option<Arc<Runtime>> {
    let mut slot = VM.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *slot, runtime)
}

pub fn vm() -> Option<Arc<Runtime>> {
    VM.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Access context for the calling thread, attaching it if needed.
///
/// Returns `None` (and logs) when no runtime is installed or attachment
/// fails.
pub fn get_env() -> Option<Env> {
    let Some(runtime) = vm() else {
        log::error!("No runtime installed; cannot resolve a managed handle");
        return None;
    };
    if let Some(env) = runtime.get_env() {
        return Some(env);
    }
    match runtime.attach_current_thread() {
        Ok(env) => {
            let _ = THREAD_DESTRUCTOR.try_with(|destructor| destructor.armed.set(true));
            Some(env)
        }
        Err(e) => {
            log::error!("AttachCurrentThread failed: {}", e);
            None
        }
    }
}

/// Detaches the calling thread from the installed runtime. Locals it still
/// holds are released.
pub fn detach_current_thread() -> bool {
    let detached = vm().map_or(false, |runtime| runtime.detach_current_thread());
    if detached {
        let _ = THREAD_DESTRUCTOR.try_with(|destructor| destructor.armed.set(false));
    }
    detached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_thread_exit_releases_locals_of_an_attached_thread() {
        let runtime = test_support::runtime();
        let worker = runtime.clone();
        let weak_bits = std::thread::spawn(move || {
            assert!(!worker.is_current_thread_attached());
            let env = get_env().unwrap();
            assert!(worker.is_current_thread_attached());
            let text = env.new_string_utf("thread local").unwrap();
            env.new_weak_global_ref(text).unwrap().bits()
        })
        .join()
        .unwrap();

        let weak = peerref_vm::RawWeak::from_bits(weak_bits);
        runtime.collect();
        let env = get_env().unwrap();
        assert!(env.is_weak_expired(weak));
        env.delete_weak_global_ref(weak).unwrap();
    }

    #[test]
    fn test_detach_current_thread_reports_state() {
        let _runtime = test_support::runtime();
        std::thread::spawn(|| {
            assert!(!detach_current_thread());
            assert!(get_env().is_some());
            assert!(detach_current_thread());
            assert!(!detach_current_thread());
        })
        .join()
        .unwrap();
    }
}
