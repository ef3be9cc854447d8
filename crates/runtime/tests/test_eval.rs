//! End-to-end evaluation tests on the default (bytecode) back end.

use cljw_core::printer::pr_str;
use cljw_runtime::{bootstrap, Backend, Interp};
use std::rc::Rc;

fn vm() -> Rc<Interp> {
    let interp = Interp::new(Backend::Vm);
    bootstrap(&interp).expect("bootstrap succeeds");
    interp
}

fn eval_to_string(interp: &Interp, src: &str) -> String {
    let result = interp.eval_str(src, None).expect(src);
    let realized = cljw_runtime::seqs::realize_deep(&interp.env, &result).expect(src);
    pr_str(&realized)
}

#[test]
fn test_arithmetic_tower() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(+ 1 2 3)"), "6");
    assert_eq!(eval_to_string(&i, "(+)"), "0");
    assert_eq!(eval_to_string(&i, "(- 5)"), "-5");
    assert_eq!(eval_to_string(&i, "(/ 3 2)"), "1.5");
    assert_eq!(eval_to_string(&i, "(/ 4 2)"), "2");
    assert_eq!(eval_to_string(&i, "(+ 1 0.5)"), "1.5");
    assert_eq!(eval_to_string(&i, "(mod -7 3)"), "2");
    assert_eq!(eval_to_string(&i, "(rem -7 3)"), "-1");
}

#[test]
fn test_host_class_members() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(Math/abs -3)"), "3");
    assert_eq!(eval_to_string(&i, "(Math/min 1 2)"), "1");
    assert_eq!(eval_to_string(&i, "(Math/max 1 2.5)"), "2.5");
    assert_eq!(eval_to_string(&i, "(Math/floor 1.7)"), "1.0");
    assert_eq!(eval_to_string(&i, "(Integer/parseInt \"42\")"), "42");
}

#[test]
fn test_equality_semantics() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(= 1 1.0)"), "true");
    assert_eq!(eval_to_string(&i, "(= '(1 2 3) [1 2 3])"), "true");
    assert_eq!(eval_to_string(&i, "(= #{1 2} #{2 1})"), "true");
    assert_eq!(eval_to_string(&i, "(= {:a 1 :b 2} {:b 2 :a 1})"), "true");
    assert_eq!(eval_to_string(&i, "(= (map inc [0 1]) '(1 2))"), "true");
}

#[test]
fn test_loop_recur_fib() {
    let i = vm();
    assert_eq!(
        eval_to_string(
            &i,
            "(loop [i 0 a 0 b 1] (if (= i 25) a (recur (inc i) b (+ a b))))"
        ),
        "75025"
    );
}

#[test]
fn test_loop_inside_call_arguments() {
    // loop locals above call temporaries; recur must rebind correctly
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "(+ 1 (loop [n 0] (if (< n 3) (recur (inc n)) n)))"),
        "4"
    );
}

#[test]
fn test_seq_library() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(reduce + 0 (map inc (range 10)))"), "55");
    assert_eq!(eval_to_string(&i, "(count (take 5 (iterate inc 0)))"), "5");
    assert_eq!(eval_to_string(&i, "(take 3 (cycle [1 2]))"), "(1 2 1)");
    assert_eq!(eval_to_string(&i, "(vec (filter even? (range 10)))"), "[0 2 4 6 8]");
    assert_eq!(
        eval_to_string(&i, "(into {} (map (fn [k] [k (* k k)]) [1 2]))"),
        "{1 1, 2 4}"
    );
}

#[test]
fn test_multi_arity_fn() {
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "((fn ([] 0) ([x] x) ([x y] (+ x y))) 3 4)"),
        "7"
    );
    assert_eq!(eval_to_string(&i, "((fn ([] 0) ([x] x) ([x y] (+ x y))))"), "0");
}

#[test]
fn test_variadic_fn_packs_rest() {
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "((fn [a & more] [a more]) 1 2 3)"),
        "[1 (2 3)]"
    );
    assert_eq!(eval_to_string(&i, "((fn [a & more] [a more]) 1)"), "[1 nil]");
}

#[test]
fn test_destructuring() {
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "(let [{:keys [a b] :or {b 10}} {:a 1}] [a b])"),
        "[1 10]"
    );
    assert_eq!(
        eval_to_string(&i, "(let [[a b & more :as all] [1 2 3 4]] [a b more all])"),
        "[1 2 (3 4) [1 2 3 4]]"
    );
    assert_eq!(
        eval_to_string(&i, "((fn [[a b]] (+ a b)) [3 4])"),
        "7"
    );
    assert_eq!(
        eval_to_string(&i, "(let [{x :x} '(:x 5)] x)"),
        "5"
    );
}

#[test]
fn test_multimethods() {
    let i = vm();
    i.eval_str("(defmulti area :shape)", None).unwrap();
    i.eval_str("(defmethod area :circle [_] 314)", None).unwrap();
    assert_eq!(eval_to_string(&i, "(area {:shape :circle})"), "314");
    i.eval_str("(defmethod area :default [_] 0)", None).unwrap();
    assert_eq!(eval_to_string(&i, "(area {:shape :square})"), "0");
}

#[test]
fn test_multimethod_isa_dispatch() {
    let i = vm();
    i.eval_str("(derive :square :shape)", None).unwrap();
    i.eval_str("(defmulti describe identity)", None).unwrap();
    i.eval_str("(defmethod describe :shape [_] :generic)", None)
        .unwrap();
    assert_eq!(eval_to_string(&i, "(describe :square)"), ":generic");
}

#[test]
fn test_protocols() {
    let i = vm();
    i.eval_str("(defprotocol Renderable (render [x]))", None)
        .unwrap();
    i.eval_str("(extend-type String Renderable (render [x] (str \"s:\" x)))", None)
        .unwrap();
    i.eval_str("(extend-type Long Renderable (render [x] (str \"i:\" x)))", None)
        .unwrap();
    assert_eq!(eval_to_string(&i, "(render \"a\")"), "\"s:a\"");
    assert_eq!(eval_to_string(&i, "(render 7)"), "\"i:7\"");
    assert_eq!(eval_to_string(&i, "(satisfies? Renderable \"x\")"), "true");
}

#[test]
fn test_defrecord_constructor() {
    let i = vm();
    i.eval_str("(defrecord Point [x y])", None).unwrap();
    assert_eq!(eval_to_string(&i, "(:x (->Point 1 2))"), "1");
    assert_eq!(eval_to_string(&i, "(:__reify_type (->Point 1 2))"), ":Point");
}

#[test]
fn test_atoms() {
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "(let [a (atom 0)] (dotimes [_ 100] (swap! a inc)) @a)"),
        "100"
    );
    assert_eq!(
        eval_to_string(&i, "(let [a (atom 1)] [(compare-and-set! a 1 2) @a])"),
        "[true 2]"
    );
    assert_eq!(
        eval_to_string(&i, "(let [v (volatile! 5)] (vswap! v + 3) @v)"),
        "8"
    );
}

#[test]
fn test_delay_realizes_once() {
    let i = vm();
    assert_eq!(
        eval_to_string(
            &i,
            "(let [calls (atom 0)
                   d (delay (swap! calls inc) :done)]
               [(force d) (force d) @calls])"
        ),
        "[:done :done 1]"
    );
}

#[test]
fn test_regex() {
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "(re-find #\"(\\d+)-(\\d+)\" \"x12-34y\")"),
        "[\"12-34\" \"12\" \"34\"]"
    );
    assert_eq!(eval_to_string(&i, "(re-find #\"\\d+\" \"a42b\")"), "\"42\"");
    assert_eq!(eval_to_string(&i, "(re-matches #\"\\d+\" \"a42\")"), "nil");
    assert_eq!(
        eval_to_string(&i, "(re-seq #\"[a-z]\" \"a1b2\")"),
        "(\"a\" \"b\")"
    );
}

#[test]
fn test_try_catch_finally() {
    let i = vm();
    assert_eq!(
        eval_to_string(
            &i,
            "(let [log (atom [])]
               [(try
                  (throw (ex-info \"boom\" {:k 1}))
                  (catch ExceptionInfo e (ex-data e))
                  (finally (swap! log conj :cleanup)))
                @log])"
        ),
        "[{:k 1} [:cleanup]]"
    );
    assert_eq!(
        eval_to_string(&i, "(try (throw :plain) (catch Exception e e))"),
        ":plain"
    );
}

#[test]
fn test_uncaught_throw_surfaces() {
    let i = vm();
    let err = i.eval_str("(throw (ex-info \"nope\" {}))", None).unwrap_err();
    assert!(matches!(err, cljw_core::error::Failure::Thrown(_)));
}

#[test]
fn test_dynamic_binding() {
    let i = vm();
    i.eval_str("(def ^:dynamic *level* 0)", None).unwrap();
    assert_eq!(
        eval_to_string(
            &i,
            "[(binding [*level* 1]
                (binding [*level* 2] (set! *level* 3) *level*))
              *level*]"
        ),
        "[3 0]"
    );
}

#[test]
fn test_threading_macros() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(-> 1 inc (+ 2))"), "4");
    assert_eq!(eval_to_string(&i, "(->> [1 2 3] (map inc) (reduce +))"), "9");
}

#[test]
fn test_for_comprehension() {
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "(vec (for [x [1 2 3] :when (odd? x) y [10 20]] (+ x y)))"),
        "[11 21 13 23]"
    );
    assert_eq!(
        eval_to_string(&i, "(vec (for [x (range 5) :while (< x 3)] x))"),
        "[0 1 2]"
    );
    assert_eq!(
        eval_to_string(&i, "(vec (for [x [1 2] :let [y (* 10 x)]] y))"),
        "[10 20]"
    );
}

#[test]
fn test_keyword_and_collection_callables() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(:a {:a 1})"), "1");
    assert_eq!(eval_to_string(&i, "(:b {:a 1} :missing)"), ":missing");
    assert_eq!(eval_to_string(&i, "({:a 1} :a)"), "1");
    assert_eq!(eval_to_string(&i, "(#{1 2} 2)"), "2");
    assert_eq!(eval_to_string(&i, "([10 20] 1)"), "20");
}

#[test]
fn test_string_and_printing() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(str \"a\" 1 :k nil)"), "\"a1:k\"");
    assert_eq!(eval_to_string(&i, "(pr-str [1 \"x\"])"), "\"[1 \\\"x\\\"]\"");
    assert_eq!(eval_to_string(&i, "(subs \"hello\" 1 3)"), "\"el\"");
}

#[test]
fn test_read_string_and_eval() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(eval (read-string \"(+ 1 2)\"))"), "3");
    assert_eq!(
        eval_to_string(&i, "(read-string \"{:a [1 2]}\")"),
        "{:a [1 2]}"
    );
}

#[test]
fn test_fn_literal_and_apply() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(#(+ % %2) 1 2)"), "3");
    assert_eq!(eval_to_string(&i, "(apply + 1 2 [3 4])"), "10");
    assert_eq!(eval_to_string(&i, "(map #(* % %) [1 2 3])"), "(1 4 9)");
}

#[test]
fn test_closures_and_captures() {
    let i = vm();
    assert_eq!(
        eval_to_string(
            &i,
            "(let [make (fn [n] (fn [] n))
                   f (make 1)
                   g (make 2)]
               [(f) (g)])"
        ),
        "[1 2]"
    );
    assert_eq!(
        eval_to_string(
            &i,
            "(let [counter (fn [] (let [c (atom 0)] (fn [] (swap! c inc))))
                   tick (counter)]
               (tick) (tick) (tick))"
        ),
        "3"
    );
}

#[test]
fn test_named_fn_self_recursion() {
    let i = vm();
    assert_eq!(
        eval_to_string(
            &i,
            "((fn fact [n] (if (zero? n) 1 (* n (fact (dec n))))) 10)"
        ),
        "3628800"
    );
}

#[test]
fn test_metadata() {
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "(meta (with-meta [1 2] {:tag :v}))"),
        "{:tag :v}"
    );
    i.eval_str("(def documented \"a doc\" 1)", None).unwrap();
    assert_eq!(
        eval_to_string(&i, "(:doc (meta (var documented)))"),
        "\"a doc\""
    );
}

#[test]
fn test_sort_and_group() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "(sort [3 1 2])"), "(1 2 3)");
    assert_eq!(eval_to_string(&i, "(sort > [1 3 2])"), "(3 2 1)");
    assert_eq!(
        eval_to_string(&i, "(sort-by count [[1 2] [] [1]])"),
        "([] [1] [1 2])"
    );
    assert_eq!(
        eval_to_string(&i, "(group-by even? [1 2 3 4])"),
        "{false [1 3], true [2 4]}"
    );
}

#[test]
fn test_reduced_short_circuits() {
    let i = vm();
    assert_eq!(
        eval_to_string(
            &i,
            "(reduce (fn [acc x] (if (> acc 10) (reduced :big) (+ acc x))) 0 (range 100))"
        ),
        ":big"
    );
}

#[test]
fn test_gensym_hygiene() {
    let i = vm();
    assert_eq!(
        eval_to_string(&i, "(let [pair `[x# x#]] (= (first pair) (second pair)))"),
        "true"
    );
    assert_eq!(eval_to_string(&i, "(= (first `[x#]) (first `[x#]))"), "false");
}

#[test]
fn test_reader_conditional_evaluates_platform_branch() {
    let i = vm();
    assert_eq!(eval_to_string(&i, "#?(:cw :native :default :other)"), ":native");
}

#[test]
fn test_recursion_overflow_is_reported() {
    let i = vm();
    i.eval_str("(defn down [n] (if (zero? n) 0 (+ 1 (down (dec n)))))", None)
        .unwrap();
    // non-tail self calls eventually exhaust the guard instead of
    // crashing the process
    let err = i.eval_str("(down 1000000)", None).unwrap_err();
    match err {
        cljw_core::error::Failure::Error(e) => {
            assert!(e.message.contains("stack overflow"), "{}", e.message);
        }
        other => panic!("unexpected {:?}", other),
    }
}
