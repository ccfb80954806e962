use super::*;
use crate::runtime::RuntimeConfig;
use std::{
    any::TypeId,
    sync::atomic::{AtomicUsize, Ordering},
};

fn attached() -> (Arc<Runtime>, Env) {
    let runtime = Runtime::new(RuntimeConfig::default());
    let env = runtime.attach_current_thread().unwrap();
    (runtime, env)
}

#[test]
fn test_local_global_and_weak_lifecycle() {
    let (runtime, env) = attached();
    let local = env.new_object("demo/Thing").unwrap();
    let global = env.new_global_ref(local).unwrap();
    let weak = env.new_weak_global_ref(local).unwrap();

    assert_eq!(local.kind(), RefKind::Local);
    assert_eq!(global.kind(), RefKind::Global);
    assert_eq!(weak.kind(), RefKind::WeakGlobal);
    assert!(env.is_same_object(local, global));
    assert!(env.is_same_object(weak.into(), global));

    env.delete_local_ref(local).unwrap();
    runtime.collect();
    assert!(!env.is_weak_expired(weak), "the global keeps the object alive");

    env.delete_global_ref(global).unwrap();
    runtime.collect();
    assert!(env.is_weak_expired(weak));
    assert!(env.is_same_object(weak.into(), RawRef::NULL));
    assert_eq!(env.new_local_ref(weak.into()).unwrap(), RawRef::NULL);

    env.delete_weak_global_ref(weak).unwrap();
    assert_eq!(runtime.stats().weak_global_refs, 0);
    runtime.detach_current_thread();
}

#[test]
fn test_double_delete_is_reported() {
    let (runtime, env) = attached();
    let local = env.new_string_utf("once").unwrap();
    env.delete_local_ref(local).unwrap();
    assert_eq!(env.delete_local_ref(local), Err(VmError::InvalidHandle(local)));

    let global_source = env.new_string_utf("g").unwrap();
    let global = env.new_global_ref(global_source).unwrap();
    assert!(matches!(
        env.delete_local_ref(global),
        Err(VmError::WrongHandleKind { .. })
    ));
    env.delete_global_ref(global).unwrap();
    assert_eq!(env.delete_global_ref(global), Err(VmError::InvalidHandle(global)));
    runtime.detach_current_thread();
}

#[test]
fn test_local_handles_do_not_cross_threads() {
    let (runtime, env) = attached();
    let local = env.new_string_utf("mine").unwrap();
    let bits = local.bits();

    let other = runtime.clone();
    let seen = std::thread::spawn(move || {
        let env = other.attach_current_thread().unwrap();
        env.get_string_utf_chars(RawRef::from_bits(bits)).is_ok()
    })
    .join()
    .unwrap();
    assert!(!seen);
    assert_eq!(env.get_string_utf_chars(local).unwrap(), "mine");
    runtime.detach_current_thread();
}

#[test]
fn test_local_frame_releases_and_keeps_result() {
    let (runtime, env) = attached();
    let before = env.local_ref_count();

    let kept = {
        let frame = env.local_frame().unwrap();
        let scratch = env.new_string_utf("scratch").unwrap();
        let result = env.new_string_utf("result").unwrap();
        assert_eq!(env.local_frame_depth(), 2);
        let _ = scratch;
        frame.pop(result).unwrap()
    };
    assert_eq!(env.local_frame_depth(), 1);
    assert_eq!(env.local_ref_count(), before + 1);
    assert_eq!(env.get_string_utf_chars(kept).unwrap(), "result");

    {
        let _frame = env.local_frame().unwrap();
        env.new_object("demo/Temp").unwrap();
    }
    assert_eq!(env.local_ref_count(), before + 1);
    assert_eq!(env.pop_local_frame(RawRef::NULL), Err(VmError::FrameUnderflow));
    runtime.detach_current_thread();
}

#[test]
fn test_fields_keep_referents_reachable() {
    let (runtime, env) = attached();
    let holder = env.new_object("demo/Holder").unwrap();
    let holder_global = env.new_global_ref(holder).unwrap();
    let child = env.new_string_utf("child").unwrap();
    let child_weak = env.new_weak_global_ref(child).unwrap();

    env.set_field(holder, "child", FieldValue::Object(child)).unwrap();
    env.set_field(holder, "count", FieldValue::Integer(3)).unwrap();
    env.delete_local_ref(child).unwrap();
    env.delete_local_ref(holder).unwrap();
    runtime.collect();
    assert!(!env.is_weak_expired(child_weak));

    match env.get_field(holder_global, "child").unwrap() {
        FieldValue::Object(raw) => assert_eq!(env.get_string_utf_chars(raw).unwrap(), "child"),
        other => panic!("unexpected field value {:?}", other),
    }
    assert_eq!(env.get_field(holder_global, "count").unwrap(), FieldValue::Integer(3));
    assert_eq!(
        env.get_field(holder_global, "missing"),
        Err(VmError::NoSuchField("missing".to_string()))
    );

    env.set_field(holder_global, "child", FieldValue::Null).unwrap();
    // the read above created a local; drop everything local before collecting
    runtime.detach_current_thread();
    let env = runtime.attach_current_thread().unwrap();
    runtime.collect();
    assert!(env.is_weak_expired(child_weak));
    runtime.detach_current_thread();
}

#[test]
fn test_primitive_and_object_arrays() {
    let (runtime, env) = attached();
    let ints = env.new_primitive_array(&[1i32, 2, 3]).unwrap();
    assert_eq!(env.get_array_length(ints).unwrap(), 3);
    env.set_primitive_array_region(ints, 1, &[20i32, 30]).unwrap();
    assert_eq!(env.get_primitive_array_region::<i32>(ints).unwrap(), vec![1, 20, 30]);
    assert!(matches!(
        env.set_primitive_array_region(ints, 2, &[0i32, 0]),
        Err(VmError::IndexOutOfBounds { .. })
    ));
    assert!(matches!(
        env.get_primitive_array_region::<f64>(ints),
        Err(VmError::TypeMismatch { .. })
    ));

    let strings = env.new_object_array(STRING_CLASS, 2).unwrap();
    let hello = env.new_string_utf("hello").unwrap();
    env.set_object_array_element(strings, 0, hello).unwrap();
    let first = env.get_object_array_element(strings, 0).unwrap();
    assert!(env.is_same_object(first, hello));
    assert_eq!(env.get_object_array_element(strings, 1).unwrap(), RawRef::NULL);
    assert_eq!(env.class_name(strings).unwrap(), "[Ljava/lang/String;");
    runtime.detach_current_thread();
}

static FINALIZED_AT: AtomicUsize = AtomicUsize::new(0);

unsafe fn record_finalize(address: usize) {
    FINALIZED_AT.store(address, Ordering::SeqCst);
}

#[test]
fn test_collected_peer_runs_native_finalizer_after_collect() {
    let (runtime, env) = attached();
    let peer = env.new_object("demo/Peer").unwrap();
    env.set_native_peer(
        peer,
        Some(NativePeer {
            address: 0x1000,
            type_id: TypeId::of::<u64>(),
            finalize: record_finalize,
        }),
    )
    .unwrap();
    assert!(env.native_peer(peer).unwrap().unwrap().is::<u64>());

    env.delete_local_ref(peer).unwrap();
    let finalized = runtime.collect();
    assert_eq!(finalized, 1);
    assert_eq!(FINALIZED_AT.load(Ordering::SeqCst), 0x1000);
    assert_eq!(runtime.stats().finalizers_run, 1);
    runtime.detach_current_thread();
}

#[test]
fn test_detached_env_reports_not_attached() {
    let (runtime, env) = attached();
    runtime.detach_current_thread();
    assert_eq!(env.new_object("demo/Late"), Err(VmError::NotAttached));
}
