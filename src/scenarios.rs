//! Built-in scenarios exercising the handle layer end to end.

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use peerref_core::{
    context::{use_backend, BackendKind},
    marshal, refs, GlobalRef, LocalRef, NativeObject, WeakGlobalRef,
};
use peerref_vm::Runtime;
use serde::Serialize;

use crate::classes::{JLong, StringGenerator, StringGeneratorClient};

#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub summary: &'static str,
    run: fn(&mut Context<'_>) -> Result<(), String>,
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "string-generator",
        summary: "StringGenerator calls its client directly, through a vector, and through a weak target",
        run: string_generator,
    },
    Scenario {
        name: "weak-expiry",
        summary: "releasing the last count expires weak handles and promotion yields nothing",
        run: weak_expiry,
    },
    Scenario {
        name: "pinned-to-scoped",
        summary: "a scoped copy keeps the object alive after its pinned source is released",
        run: pinned_to_scoped,
    },
    Scenario {
        name: "resurrection",
        summary: "a native payload with an outside owner is revived with the same identity",
        run: resurrection,
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|scenario| scenario.name == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "passed"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scenario: String,
    pub backend: String,
    pub outcome: Outcome,
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Context<'a> {
    runtime: &'a Arc<Runtime>,
    backend: BackendKind,
    steps: Vec<String>,
}

impl Context<'_> {
    fn step(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.steps.push(message);
    }

    /// Gives the managed collector a chance to run; the native backend
    /// reclaims on release.
    fn settle(&mut self) {
        if self.backend == BackendKind::Managed {
            let collected = self.runtime.collect();
            self.step(format!("collected {} objects", collected));
        }
    }
}

fn ensure(condition: bool, message: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.to_string())
    }
}

pub fn run(scenario: &Scenario, runtime: &Arc<Runtime>, backend: BackendKind) -> Report {
    let _guard = use_backend(backend);
    let mut context = Context {
        runtime,
        backend,
        steps: Vec::new(),
    };
    let result = (scenario.run)(&mut context);
    if let Err(e) = &result {
        log::error!("Scenario {} failed: {}", scenario.name, e);
    }
    Report {
        scenario: scenario.name.to_string(),
        backend: format!("{:?}", backend).to_lowercase(),
        outcome: if result.is_ok() {
            Outcome::Passed
        } else {
            Outcome::Failed
        },
        steps: context.steps,
        error: result.err(),
    }
}

fn string_generator(cx: &mut Context<'_>) -> Result<(), String> {
    let generator = GlobalRef::from(StringGenerator::create());
    let client = GlobalRef::from(StringGeneratorClient::create());
    let generator_ref = generator.get_ptr().ok_or("generator was not created")?;
    let client_ref = client.get_ptr().ok_or("client was not created")?;

    generator_ref.set_client("main", client.to_pass());
    generator_ref.set_what(client.to_pass().into_any());
    generator_ref.generate_number_for_jni(1000);
    cx.step("client and weak target set");

    let reached = generator_ref
        .request_string_from_jni()
        .map_err(|e| e.to_string())?;
    ensure(reached, "weak target was not promoted")?;
    for received in client_ref.received() {
        cx.step(format!("client received: {}", received));
    }
    ensure(client_ref.received().len() == 3, "client did not receive three strings")?;
    let returned = generator_ref
        .native_get_client()
        .cast::<NativeObject<StringGeneratorClient>>();
    ensure(
        returned.get_ptr().map_or(false, |found| std::ptr::eq(found, client_ref)),
        "generator returned a different client",
    )?;
    Ok(())
}

fn weak_expiry(cx: &mut Context<'_>) -> Result<(), String> {
    let mut object = JLong::create(42);
    let bind = object.get_ptr().map(|o| o.bind()).ok_or("object was not created")?;
    let weak = WeakGlobalRef::<NativeObject<JLong>>::from_raw(bind.into());
    ensure(!weak.is_expired(), "weak handle expired while the object was held")?;
    cx.step("weak handle taken from the object's self handle");

    let local = object.leak();
    refs::deref_local(local);
    cx.step("transfer handle released");
    cx.settle();

    ensure(weak.is_expired(), "weak handle still live after the last release")?;
    ensure(weak.try_promote().is_null(), "promotion of an expired handle succeeded")?;
    ensure(weak.is_null(), "expired weak handle was not cleared")?;
    cx.step("weak handle expired and cleared");
    Ok(())
}

fn pinned_to_scoped(cx: &mut Context<'_>) -> Result<(), String> {
    let g1 = GlobalRef::from(JLong::create(7));
    let weak = WeakGlobalRef::from(&g1);
    let l1 = LocalRef::from(&g1);
    drop(g1);
    cx.step("pinned handle released, scoped copy kept");
    cx.settle();

    let value = l1.get_ptr().map(|o| o.long_value());
    ensure(value == Some(7), "scoped copy lost its object")?;
    ensure(!weak.is_expired(), "object collected while a scoped handle exists")?;
    cx.step("scoped copy still resolves to 7");

    drop(l1);
    cx.settle();
    ensure(weak.is_expired(), "object survived its last handle")?;
    cx.step("object released with its last handle");
    Ok(())
}

fn resurrection(cx: &mut Context<'_>) -> Result<(), String> {
    let payload = Arc::new(String::from("kept alive elsewhere"));
    let weak = WeakGlobalRef::from(marshal::share(payload.clone()));
    cx.step("every handle to the payload released");
    ensure(!weak.is_expired(), "payload expired despite an outside owner")?;

    let revived = weak.try_promote_any();
    let seen = marshal::shared::<String>(revived.raw()).ok_or("revived handle has no payload")?;
    ensure(Arc::ptr_eq(&seen, &payload), "revived payload is a different object")?;
    cx.step(format!("revived \"{}\" with the same identity", seen));
    drop((seen, revived));

    drop(payload);
    ensure(weak.is_expired(), "payload outlived its last owner")?;
    ensure(weak.try_promote_any().is_null(), "expired payload was revived")?;
    cx.step("payload gone once the outside owner let go");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerref_vm::RuntimeConfig;
    use std::sync::OnceLock;

    fn runtime() -> Arc<Runtime> {
        static RUNTIME: OnceLock<Arc<Runtime>> = OnceLock::new();
        RUNTIME
            .get_or_init(|| {
                let runtime = Runtime::new(RuntimeConfig::default());
                peerref_core::attach::set_vm(Some(runtime.clone()));
                runtime
            })
            .clone()
    }

    #[test]
    fn test_every_scenario_passes_on_both_backends() {
        let runtime = runtime();
        for scenario in SCENARIOS {
            for backend in [BackendKind::Managed, BackendKind::Native] {
                let report = run(scenario, &runtime, backend);
                assert_eq!(report.outcome, Outcome::Passed, "{:?}", report);
                assert!(!report.steps.is_empty());
            }
        }
    }

    #[test]
    fn test_report_serializes_without_empty_error() {
        let report = Report {
            scenario: "weak-expiry".to_string(),
            backend: "native".to_string(),
            outcome: Outcome::Passed,
            steps: vec!["one".to_string()],
            error: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "passed");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_find_by_name() {
        assert_eq!(find("resurrection").map(|s| s.name), Some("resurrection"));
        assert!(find("nope").is_none());
    }
}
