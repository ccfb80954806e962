use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
};

use peerref_vm::Runtime;

use super::*;
use crate::{
    any_object::{AnyObject, Bridgeable, ManagedClass},
    context::{use_backend, BackendKind},
    native_object::NativeObject,
    test_support,
};

struct Tracked {
    dropped: Arc<AtomicUsize>,
}

impl ManagedClass for Tracked {
    const CLASS_NAME: &'static str = "test/Tracked";
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

struct Unrelated;

impl ManagedClass for Unrelated {
    const CLASS_NAME: &'static str = "test/Unrelated";
}

type TrackedObject = NativeObject<Tracked>;

fn tracked() -> (PassLocalRef<TrackedObject>, Arc<AtomicUsize>) {
    let dropped = Arc::new(AtomicUsize::new(0));
    let pass = NativeObject::new(Tracked {
        dropped: dropped.clone(),
    });
    (pass, dropped)
}

/// Runs `scenario` once per backend. The runtime is installed either way;
/// the backend only decides where new peers live.
fn on_each_backend(scenario: impl Fn(BackendKind, &Arc<Runtime>)) {
    let runtime = test_support::runtime();
    for backend in [BackendKind::Managed, BackendKind::Native] {
        let _guard = use_backend(backend);
        scenario(backend, &runtime);
    }
}

/// Lets the managed backend notice unreachable peers. The native backend
/// reclaims synchronously.
fn settle(backend: BackendKind, runtime: &Runtime) {
    if backend == BackendKind::Managed {
        runtime.collect();
    }
}

fn refcount<S: Strength>(handle: &Ref<TrackedObject, S>) -> Option<i32> {
    handle.get_ptr().map(TrackedObject::ref_count)
}

#[test]
fn test_release_of_last_count_expires_weak_handles() {
    on_each_backend(|backend, runtime| {
        let (mut pass, dropped) = tracked();
        let bind = pass.get_ptr().map(TrackedObject::bind).unwrap_or_default();
        let weak = WeakGlobalRef::<TrackedObject>::from_raw(bind.into());
        assert!(!weak.is_null());

        let local = pass.leak();
        crate::refs::deref_local(local);
        settle(backend, runtime);

        assert_eq!(dropped.load(Ordering::SeqCst), 1, "{:?}", backend);
        assert!(weak.is_expired());
        assert!(weak.try_promote().is_null());
        // The stale value was released on the first check.
        assert!(weak.is_null());
        assert!(weak.is_expired());
    });
}

#[test]
fn test_scoped_copy_outlives_its_pinned_source() {
    on_each_backend(|backend, runtime| {
        let (pass, dropped) = tracked();
        let g1 = GlobalRef::from(pass);
        let l1 = LocalRef::from(&g1);
        let address = g1.identity();
        drop(g1);

        settle(backend, runtime);
        assert_eq!(l1.identity(), address);
        assert!(l1.get_ptr().is_some());
        assert_eq!(dropped.load(Ordering::SeqCst), 0, "{:?}", backend);

        drop(l1);
        settle(backend, runtime);
        assert_eq!(dropped.load(Ordering::SeqCst), 1, "{:?}", backend);
    });
}

#[test]
fn test_balanced_copies_leave_the_refcount_unchanged() {
    on_each_backend(|_, _| {
        let (pass, _) = tracked();
        let local = LocalRef::from(pass);
        let before = refcount(&local);

        let mut global = GlobalRef::null();
        for _ in 0..16 {
            global.copy_from(&local);
            let again = global.to_local();
            let cloned = again.clone();
            drop((again, cloned));
        }
        global.reset();
        let passed = local.to_pass();
        drop(passed);

        assert_eq!(refcount(&local), before);
    });
}

#[test]
fn test_taken_and_leaked_transfer_handles_are_empty() {
    on_each_backend(|backend, runtime| {
        let (mut pass, dropped) = tracked();
        let mut moved = pass.take();
        assert!(pass.is_null());
        assert!(pass.get_ptr().is_none());
        drop(pass);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        let raw = moved.leak();
        assert!(moved.is_null());
        assert_eq!(moved.leak(), peerref_vm::RawRef::NULL);
        drop(moved);

        let back = TrackedObject::from_ref(raw);
        assert!(!back.is_null());
        drop(back);
        settle(backend, runtime);
        assert_eq!(dropped.load(Ordering::SeqCst), 1, "{:?}", backend);
    });
}

#[test]
fn test_handles_compare_by_referent() {
    on_each_backend(|_, _| {
        let (pass, _) = tracked();
        let local = LocalRef::from(pass);
        let global = local.to_global();
        let other = LocalRef::from(tracked().0);

        assert_eq!(local, global);
        assert_ne!(local, other);

        let set: HashSet<LocalRef<TrackedObject>> =
            [local.clone(), global.to_local(), other.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
    });
}

#[test]
fn test_any_handles_resolve_back_to_their_type() {
    on_each_backend(|_, _| {
        let (pass, _) = tracked();
        let global = GlobalRef::from(pass);
        let weak: WeakGlobalRef<dyn AnyObject> = WeakGlobalRef::from_raw(global.raw());

        let any = weak.try_promote_any();
        assert!(any.get_ptr().is_none());
        assert!(!any.is_null());
        let typed = any.cast::<TrackedObject>();
        assert_eq!(
            typed.get_ptr().map(|o| o as *const TrackedObject),
            global.get_ptr().map(|o| o as *const TrackedObject)
        );

        let wrong = weak.try_promote_as::<NativeObject<Unrelated>>();
        assert!(wrong.is_null());

        let erased = global.to_pass().into_any();
        let same = erased.cast::<TrackedObject>();
        assert!(same.get_ptr().is_some());
    });
}

#[test]
fn test_pinned_handles_move_between_threads() {
    on_each_backend(|backend, runtime| {
        let (pass, dropped) = tracked();
        let global = GlobalRef::from(pass);
        let weak = WeakGlobalRef::from(&global);

        let moved = global.clone();
        let address = std::thread::spawn(move || {
            let local = moved.to_local();
            drop(moved);
            local.identity()
        })
        .join()
        .unwrap();
        assert_eq!(address, global.identity());

        drop(global);
        settle(backend, runtime);
        assert!(weak.is_expired());
        assert_eq!(dropped.load(Ordering::SeqCst), 1, "{:?}", backend);
    });
}

#[test]
fn test_typed_and_handle_only_refs_agree_on_identity() {
    on_each_backend(|backend, _| {
        let (pass, _) = tracked();
        let typed = GlobalRef::from(pass);
        let handle_only = GlobalRef::<TrackedObject>::from_raw(typed.raw());
        assert!(handle_only.get_ptr().is_none());
        assert!(typed.identity().is_some(), "{:?}", backend);
        assert_eq!(typed, handle_only, "{:?}", backend);

        let erased = GlobalRef::from(typed.to_pass().into_any());
        let erased_handle_only = GlobalRef::<dyn AnyObject>::from_raw(typed.raw());
        assert!(erased.get_ptr().is_some());
        assert_eq!(erased, erased_handle_only, "{:?}", backend);
        assert_eq!(erased.identity(), typed.identity());

        let set: HashSet<GlobalRef<TrackedObject>> =
            [typed.clone(), handle_only.clone(), typed.to_local().to_global()]
                .into_iter()
                .collect();
        assert_eq!(set.len(), 1);
    });
}

#[test]
fn test_shared_weak_handle_survives_concurrent_expiry() {
    const THREADS: usize = 4;
    for _ in 0..32 {
        let payload = Arc::new(String::from("shared across threads"));
        let weak: Arc<WeakGlobalRef<dyn AnyObject>> =
            Arc::new(WeakGlobalRef::from(crate::marshal::share(payload.clone())));
        let start = Arc::new(Barrier::new(THREADS + 1));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let weak = weak.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    while !weak.is_expired() {
                        let promoted = weak.try_promote_any();
                        if let Some(text) = crate::marshal::shared::<String>(promoted.raw()) {
                            assert_eq!(text.as_str(), "shared across threads");
                        }
                        drop(weak.as_ref().clone());
                    }
                    assert!(weak.try_promote_any().is_null());
                })
            })
            .collect();

        start.wait();
        drop(payload);
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(weak.is_expired());
        assert!(weak.is_null());
    }
}

#[test]
fn test_one_object_hammered_from_many_threads() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;
    on_each_backend(|backend, runtime| {
        let (pass, dropped) = tracked();
        let global = GlobalRef::from(pass);
        let weak = Arc::new(WeakGlobalRef::from(&global));
        let payload = Arc::new(vec![backend == BackendKind::Managed; 3]);
        let shared: Arc<WeakGlobalRef<dyn AnyObject>> =
            Arc::new(WeakGlobalRef::from(crate::marshal::share(payload.clone())));
        let before = refcount(&global);
        let start = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let global = global.clone();
                let weak = weak.clone();
                let shared = shared.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    for _ in 0..ROUNDS {
                        let local = global.to_local();
                        let pinned = local.to_global();
                        assert_eq!(local, pinned);

                        let own_weak = WeakGlobalRef::from(&pinned);
                        let promoted = own_weak.try_promote();
                        assert!(promoted.get_ptr().is_some());
                        let again = weak.try_promote();
                        assert!(again.get_ptr().is_some());

                        if let Some(object) = local.get_ptr() {
                            object.retain();
                            object.release();
                        }

                        let revived = shared.try_promote_any();
                        assert!(crate::marshal::shared::<Vec<bool>>(revived.raw()).is_some());
                        drop((local, pinned, own_weak, promoted, again, revived));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(refcount(&global), before, "{:?}", backend);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert!(!shared.is_expired());

        drop(global);
        settle(backend, runtime);
        assert!(weak.is_expired(), "{:?}", backend);
        assert_eq!(dropped.load(Ordering::SeqCst), 1, "{:?}", backend);

        drop(payload);
        assert!(shared.is_expired());
        assert!(shared.try_promote_any().is_null());
    });
}
