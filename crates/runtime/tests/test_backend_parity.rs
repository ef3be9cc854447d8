//! Backend parity: every pure expression must print identically from the
//! tree walker and the bytecode VM.

use cljw_core::printer::pr_str;
use cljw_runtime::{bootstrap, Backend, Interp};
use std::rc::Rc;

fn boot(backend: Backend) -> Rc<Interp> {
    let interp = Interp::new(backend);
    bootstrap(&interp).expect("bootstrap succeeds");
    interp
}

fn eval_to_string(interp: &Interp, src: &str) -> String {
    match interp.eval_str(src, None) {
        Ok(result) => {
            let realized =
                cljw_runtime::seqs::realize_deep(&interp.env, &result).expect(src);
            pr_str(&realized)
        }
        Err(e) => panic!("{} failed: {}", src, e),
    }
}

fn assert_parity(src: &str) {
    let vm = boot(Backend::Vm);
    let tree = boot(Backend::Tree);
    let vm_out = eval_to_string(&vm, src);
    let tree_out = eval_to_string(&tree, src);
    assert_eq!(vm_out, tree_out, "backends disagree on {}", src);
}

#[test]
fn test_scenario_fib_loop() {
    let src = "(loop [i 0 a 0 b 1] (if (= i 25) a (recur (inc i) b (+ a b))))";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "75025");
    assert_parity(src);
}

#[test]
fn test_scenario_reduce_map_range() {
    let src = "(reduce + 0 (map inc (range 10)))";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "55");
    assert_parity(src);
}

#[test]
fn test_scenario_multi_arity() {
    let src = "((fn ([] 0) ([x] x) ([x y] (+ x y))) 3 4)";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "7");
    assert_parity(src);
}

#[test]
fn test_scenario_destructuring_defaults() {
    let src = "(let [{:keys [a b] :or {b 10}} {:a 1}] [a b])";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "[1 10]");
    assert_parity(src);
}

#[test]
fn test_scenario_multimethod() {
    let src = "(do (defmulti area :shape)
                   (defmethod area :circle [_] 314)
                   (area {:shape :circle}))";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "314");
    assert_parity(src);
}

#[test]
fn test_scenario_regex_captures() {
    let src = "(re-find #\"(\\d+)-(\\d+)\" \"x12-34y\")";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "[\"12-34\" \"12\" \"34\"]");
    assert_parity(src);
}

#[test]
fn test_scenario_atom_counter() {
    let src = "(let [a (atom 0)] (dotimes [_ 100] (swap! a inc)) @a)";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "100");
    assert_parity(src);
}

#[test]
fn test_scenario_lazy_take() {
    let src = "(count (take 5 (iterate inc 0)))";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "5");
    assert_parity(src);
}

#[test]
fn test_parity_numeric_tower() {
    for src in [
        "(/ 3 2)",
        "(/ 4 2)",
        "(* 2 0.5)",
        "(+ 1 2 3 4 5)",
        "(- 10 1 2)",
        "(< 1 2 3)",
        "(<= 1 1 2)",
        "(max 1 9 3)",
        "(min 4 2 8)",
        "(mod -7 3)",
        "(quot 7 2)",
    ] {
        assert_parity(src);
    }
}

#[test]
fn test_parity_collections() {
    for src in [
        "(conj [1 2] 3)",
        "(conj '(2 3) 1)",
        "(assoc {:a 1} :b 2)",
        "(dissoc {:a 1 :b 2} :a)",
        "(seq {:a 1})",
        "(vec #{1})",
        "(nth [1 2 3] 1)",
        "(subvec [1 2 3 4] 1 3)",
        "(keys {:a 1, :b 2})",
        "(zipmap [:a :b] [1 2])",
        "(select-keys {:a 1 :b 2 :c 3} [:a :c])",
        "(frequencies [:a :b :a])",
    ] {
        assert_parity(src);
    }
}

#[test]
fn test_parity_higher_order() {
    for src in [
        "((comp inc inc) 1)",
        "((partial + 10) 5)",
        "(map #(* % 2) (range 4))",
        "(vec (remove odd? (range 6)))",
        "(some even? [1 3 4])",
        "(every? pos? [1 2 3])",
        "(sort-by - [1 3 2])",
        "(vec (for [x [1 2] y [10 20]] (+ x y)))",
    ] {
        assert_parity(src);
    }
}

#[test]
fn test_parity_control_flow() {
    for src in [
        "(if 0 :t :f)",
        "(when false 1)",
        "(and 1 2 nil 3)",
        "(or nil false 3)",
        "(cond (= 1 2) :a (= 1 1) :b)",
        "(try (throw (ex-info \"x\" {:a 1})) (catch ExceptionInfo e (ex-data e)))",
        "(let [a (atom [])] (try :v (finally (swap! a conj 1))) @a)",
        "(-> 5 (- 2) (- 1))",
    ] {
        assert_parity(src);
    }
}

#[test]
fn test_parity_closures_and_recursion() {
    for src in [
        "((fn fact [n] (if (zero? n) 1 (* n (fact (dec n))))) 12)",
        "(let [x 10] ((fn [] ((fn [] x)))))",
        "(let [make (fn [n] (fn [] n))] [((make 1)) ((make 2))])",
    ] {
        assert_parity(src);
    }
}

#[test]
fn test_parity_recur_loop_safety() {
    // a million iterations with bounded stack on both back ends
    let src = "(loop [i 0] (if (= i 1000000) i (recur (inc i))))";
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, src), "1000000");
    let tree = boot(Backend::Tree);
    assert_eq!(eval_to_string(&tree, src), "1000000");
}

#[test]
fn test_parity_filter_chain_depth() {
    // two hundred stacked filters over an infinite sequence realize the
    // first element without a frame per filter
    let mut src = String::from("(first ");
    for _ in 0..200 {
        src.push_str("(filter pos? ");
    }
    src.push_str("(iterate inc 1)");
    for _ in 0..200 {
        src.push(')');
    }
    src.push(')');
    let vm = boot(Backend::Vm);
    assert_eq!(eval_to_string(&vm, &src), "1");
    let tree = boot(Backend::Tree);
    assert_eq!(eval_to_string(&tree, &src), "1");
}

#[test]
fn test_parity_protocols() {
    let src = "(do (defprotocol Show (show [x]))
                   (extend-type Keyword Show (show [x] (name x)))
                   (extend-type Long Show (show [x] (str x)))
                   [(show :k) (show 3)])";
    assert_parity(src);
}

#[test]
fn test_parity_idempotence_properties() {
    for src in [
        "(= (seq (seq [1 2])) (seq [1 2]))",
        "(= (set (set [1 2])) (set [1 2]))",
        "(= (vec (vec '(1 2))) (vec '(1 2)))",
        "(= (into {} {:a 1}) {:a 1})",
    ] {
        assert_parity(src);
        let vm = boot(Backend::Vm);
        assert_eq!(eval_to_string(&vm, src), "true", "{}", src);
    }
}
