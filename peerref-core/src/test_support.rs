use std::sync::{Arc, OnceLock};

use peerref_vm::{Runtime, RuntimeConfig};

use crate::attach;

static RUNTIME: OnceLock<Arc<Runtime>> = OnceLock::new();

/// The runtime shared by every test in this crate. Installed once and
/// never uninstalled, since tests run in parallel.
pub(crate) fn runtime() -> Arc<Runtime> {
    RUNTIME
        .get_or_init(|| {
            let runtime = Runtime::new(RuntimeConfig::default());
            attach::set_vm(Some(runtime.clone()));
            runtime
        })
        .clone()
}
