use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use arc_gc::{
    arc::{GCArc, GCArcWeak},
    gc::GC,
};

use crate::{
    env::Env,
    error::VmError,
    finalizer::FinalizerQueue,
    handle::HandleTable,
    object::{ManagedCell, ManagedObject},
    thread::{self, ThreadState},
};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde_support", serde(default))]
pub struct RuntimeConfig {
    /// Heap size in bytes at which allocation triggers a collection.
    /// `None` uses the collector's default.
    pub gc_memory_threshold: Option<usize>,
    pub max_attached_threads: usize,
    /// Number of live locals on one thread above which a warning is logged.
    pub local_ref_warning_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            gc_memory_threshold: None,
            max_attached_threads: 64,
            local_ref_warning_threshold: 512,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(serde::Serialize))]
pub struct RuntimeStats {
    pub attached_threads: usize,
    pub global_refs: usize,
    pub weak_global_refs: usize,
    pub allocations: u64,
    pub collections: u64,
    pub finalizers_run: u64,
    pub pending_finalizers: u64,
}

/// A garbage-collected heap with JNI-style handle tables.
///
/// Global references root their referent. Weak globals and the
/// references held inside objects do not; locals root their referent for
/// as long as the owning thread keeps them.
pub struct Runtime {
    id: u64,
    config: RuntimeConfig,
    heap: Mutex<GC<ManagedCell>>,
    globals: Mutex<HandleTable<GCArc<ManagedCell>>>,
    weak_globals: Mutex<HandleTable<GCArcWeak<ManagedCell>>>,
    finalizers: Arc<FinalizerQueue>,
    attached: AtomicUsize,
    allocations: AtomicU64,
    collections: AtomicU64,
    finalizers_run: AtomicU64,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let heap = match config.gc_memory_threshold {
            Some(threshold) => GC::new_with_memory_threshold(threshold),
            None => GC::new(),
        };
        let runtime = Arc::new(Runtime {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            config,
            heap: Mutex::new(heap),
            globals: Mutex::new(HandleTable::new()),
            weak_globals: Mutex::new(HandleTable::new()),
            finalizers: Arc::new(FinalizerQueue::new()),
            attached: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            collections: AtomicU64::new(0),
            finalizers_run: AtomicU64::new(0),
        });
        log::debug!("Created runtime {} with {:?}", runtime.id, runtime.config);
        runtime
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Attaches the calling thread, or returns its existing context.
    pub fn attach_current_thread(self: &Arc<Self>) -> Result<Env, VmError> {
        if thread::is_attached(self.id) {
            return Ok(Env::new(self.clone()));
        }
        let limit = self.config.max_attached_threads;
        self.attached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < limit).then_some(count + 1)
            })
            .map_err(|_| VmError::AttachLimit(limit))?;

        let warning_threshold = self.config.local_ref_warning_threshold;
        let weak_self = Arc::downgrade(self);
        match thread::insert_state(self.id, || ThreadState::new(weak_self, warning_threshold)) {
            Some(true) => {
                log::debug!(
                    "Attached {:?} to runtime {}",
                    std::thread::current().id(),
                    self.id
                );
                Ok(Env::new(self.clone()))
            }
            Some(false) => {
                self.attached.fetch_sub(1, Ordering::AcqRel);
                Ok(Env::new(self.clone()))
            }
            None => {
                self.attached.fetch_sub(1, Ordering::AcqRel);
                Err(VmError::BorrowError(
                    "thread registry unavailable at `attach_current_thread`".to_string(),
                ))
            }
        }
    }

    /// Detaches the calling thread, releasing all of its locals. Returns
    /// `false` if it was not attached.
    pub fn detach_current_thread(&self) -> bool {
        thread::remove_state(self.id)
    }

    pub fn is_current_thread_attached(&self) -> bool {
        thread::is_attached(self.id)
    }

    /// Context for an already attached thread.
    pub fn get_env(self: &Arc<Self>) -> Option<Env> {
        self.is_current_thread_attached()
            .then(|| Env::new(self.clone()))
    }

    pub fn attached_threads(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    /// Runs the collector, then every native finalizer it queued. Returns
    /// the number of finalizers run.
    pub fn collect(&self) -> usize {
        {
            let mut heap = self.heap();
            heap.collect();
        }
        self.collections.fetch_add(1, Ordering::Relaxed);
        let finalized = self.run_finalizers();
        log::debug!("Runtime {} collected; {} native finalizers run", self.id, finalized);
        finalized
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            attached_threads: self.attached_threads(),
            global_refs: self.globals().len(),
            weak_global_refs: self.weak_globals().len(),
            allocations: self.allocations.load(Ordering::Relaxed),
            collections: self.collections.load(Ordering::Relaxed),
            finalizers_run: self.finalizers_run.load(Ordering::Relaxed),
            pending_finalizers: self.finalizers.len(),
        }
    }

    pub(crate) fn allocate(&self, object: ManagedObject) -> GCArc<ManagedCell> {
        let arc = {
            let mut heap = self.heap();
            heap.create(ManagedCell::new(object, self.finalizers.clone()))
        };
        self.allocations.fetch_add(1, Ordering::Relaxed);
        // Allocation may have triggered a collection under the heap lock.
        if self.finalizers.has_pending() {
            self.run_finalizers();
        }
        arc
    }

    fn run_finalizers(&self) -> usize {
        let finalized = self.finalizers.process_all();
        self.finalizers_run
            .fetch_add(finalized as u64, Ordering::Relaxed);
        finalized
    }

    fn heap(&self) -> MutexGuard<'_, GC<ManagedCell>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn globals(&self) -> MutexGuard<'_, HandleTable<GCArc<ManagedCell>>> {
        self.globals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn weak_globals(&self) -> MutexGuard<'_, HandleTable<GCArcWeak<ManagedCell>>> {
        self.weak_globals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attached_counter(&self) -> &AtomicUsize {
        &self.attached
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let globals = self
            .globals
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();
        drop(globals);
        let heap = std::mem::replace(
            self.heap.get_mut().unwrap_or_else(PoisonError::into_inner),
            GC::new(),
        );
        drop(heap);
        let finalized = self.run_finalizers();
        log::debug!("Runtime {} dropped; {} native finalizers run", self.id, finalized);
    }
}
