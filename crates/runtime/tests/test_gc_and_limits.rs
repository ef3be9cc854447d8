//! Heap behavior and reader limits, end to end.

use cljw_core::error::{ErrorKind, Failure};
use cljw_runtime::{bootstrap, Backend, Interp};
use std::rc::Rc;

fn vm() -> Rc<Interp> {
    let interp = Interp::new(Backend::Vm);
    bootstrap(&interp).expect("bootstrap succeeds");
    interp
}

#[test]
fn test_discarded_cells_are_reclaimed() {
    let interp = vm();
    let live_before = interp.env.heap.live_cells();
    // allocate and drop many short-lived cells between top-level forms
    for _ in 0..10 {
        interp
            .eval_str("(dotimes [_ 1000] (atom (volatile! 0)))", None)
            .unwrap();
    }
    let stats = interp.env.heap.collect(&interp.env.gc_roots());
    // reachable cells stay bounded by the environment, not by the churn
    assert!(
        stats.live <= live_before + 64,
        "live cells grew unbounded: {} -> {}",
        live_before,
        stats.live
    );
}

#[test]
fn test_cycle_through_atom_is_collected() {
    let interp = vm();
    interp
        .eval_str("(let [a (atom nil)] (reset! a {:self a}) nil)", None)
        .unwrap();
    let stats = interp.env.heap.collect(&interp.env.gc_roots());
    assert_eq!(stats.live, cell_count_reachable(&interp));
}

fn cell_count_reachable(interp: &Interp) -> usize {
    // a second collection with the same roots is a fixed point
    interp.env.heap.collect(&interp.env.gc_roots()).live
}

#[test]
fn test_rooted_atom_survives_collection() {
    let interp = vm();
    interp.eval_str("(def keeper (atom 42))", None).unwrap();
    interp.env.heap.collect(&interp.env.gc_roots());
    let out = interp.eval_str("@keeper", None).unwrap();
    assert_eq!(out, cljw_core::value::Value::Int(42));
}

#[test]
fn test_allocation_debt_triggers_safe_point_collection() {
    let interp = vm();
    interp.env.heap.set_threshold(1024);
    let before = interp.env.heap.debt();
    interp
        .eval_str("(dotimes [_ 2000] (atom 0))", None)
        .unwrap();
    // the safe point between forms collected and reset the debt
    assert!(interp.env.heap.debt() <= before + 1024 * 64);
}

#[test]
fn test_reader_depth_limit_is_syntax_error() {
    let interp = vm();
    let depth = 1025;
    let src = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
    let err = interp.eval_str(&src, None).unwrap_err();
    match err {
        Failure::Error(e) => {
            assert_eq!(e.kind, ErrorKind::Syntax);
            assert!(e.message.contains("depth"), "{}", e.message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_engine_errors_carry_kind_and_location() {
    let interp = vm();
    let err = interp.eval_str("\n\n(unknown-fn 1)", None).unwrap_err();
    match err {
        Failure::Error(e) => {
            assert_eq!(e.kind, ErrorKind::Name);
            let pos = e.pos.expect("position attached");
            assert_eq!(pos.line, 3);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_arity_error_names_the_fn() {
    let interp = vm();
    interp.eval_str("(defn two [a b] (+ a b))", None).unwrap();
    let err = interp.eval_str("(two 1)", None).unwrap_err();
    match err {
        Failure::Error(e) => {
            assert_eq!(e.kind, ErrorKind::Arity);
            assert!(e.message.contains("two"), "{}", e.message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_divide_by_zero_is_arithmetic_error() {
    let interp = vm();
    let err = interp.eval_str("(/ 1 0)", None).unwrap_err();
    match err {
        Failure::Error(e) => assert_eq!(e.kind, ErrorKind::Arithmetic),
        other => panic!("unexpected {:?}", other),
    }
}
