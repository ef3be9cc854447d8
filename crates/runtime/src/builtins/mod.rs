//! The builtin registry: one static table of host functions, registered
//! into `clojure.core` as var roots at bootstrap.
//!
//! Entries flagged with an intrinsic opcode may be inlined by the
//! bytecode emitter; their fn bodies remain the source of truth for
//! every other call path (apply, higher-order use, the tree walker).
//! Names with a `__` prefix are implementation details reached through
//! analyzer lowering or the embedded core library, not user surface.

pub mod arithmetic;
pub mod cells;
pub mod collections;
pub mod io;
pub mod meta_ops;
pub mod regex_ops;
pub mod seq_ops;
pub mod strings;

use cljw_core::chunk::Op;
use cljw_core::env::{Env, CORE_NS};
use cljw_core::value::{BuiltinDef, Value};

macro_rules! builtin {
    ($name:expr, $min:expr, $max:expr, $f:expr) => {
        BuiltinDef {
            name: $name,
            min_arity: $min,
            max_arity: $max,
            intrinsic: None,
            f: $f,
        }
    };
    ($name:expr, $min:expr, $max:expr, $f:expr, $op:expr) => {
        BuiltinDef {
            name: $name,
            min_arity: $min,
            max_arity: $max,
            intrinsic: Some($op),
            f: $f,
        }
    };
}

pub static BUILTINS: &[BuiltinDef] = &[
    // arithmetic / comparison
    builtin!("+", 0, None, arithmetic::add, Op::Add),
    builtin!("-", 1, None, arithmetic::sub, Op::Sub),
    builtin!("*", 0, None, arithmetic::mul, Op::Mul),
    builtin!("/", 1, None, arithmetic::div, Op::Div),
    builtin!("quot", 2, Some(2), arithmetic::quot),
    builtin!("mod", 2, Some(2), arithmetic::modulo, Op::Mod),
    builtin!("rem", 2, Some(2), arithmetic::remainder, Op::Rem),
    builtin!("inc", 1, Some(1), arithmetic::inc),
    builtin!("dec", 1, Some(1), arithmetic::dec),
    builtin!("<", 1, None, arithmetic::lt, Op::Lt),
    builtin!("<=", 1, None, arithmetic::le, Op::Le),
    builtin!(">", 1, None, arithmetic::gt, Op::Gt),
    builtin!(">=", 1, None, arithmetic::ge, Op::Ge),
    builtin!("=", 1, None, arithmetic::eq, Op::Eq),
    builtin!("not=", 1, None, arithmetic::not_eq, Op::Neq),
    builtin!("min", 1, None, arithmetic::min),
    builtin!("max", 1, None, arithmetic::max),
    builtin!("zero?", 1, Some(1), arithmetic::zero_p),
    builtin!("pos?", 1, Some(1), arithmetic::pos_p),
    builtin!("neg?", 1, Some(1), arithmetic::neg_p),
    builtin!("even?", 1, Some(1), arithmetic::even_p),
    builtin!("odd?", 1, Some(1), arithmetic::odd_p),
    builtin!("compare", 2, Some(2), arithmetic::compare),
    builtin!("int", 1, Some(1), arithmetic::to_int),
    builtin!("double", 1, Some(1), arithmetic::to_double),
    builtin!("char", 1, Some(1), arithmetic::to_char),
    builtin!("boolean", 1, Some(1), arithmetic::to_boolean),
    // collections
    builtin!("get", 2, Some(3), collections::get),
    builtin!("assoc", 3, None, collections::assoc),
    builtin!("dissoc", 1, None, collections::dissoc),
    builtin!("conj", 1, None, collections::conj),
    builtin!("disj", 1, None, collections::disj),
    builtin!("contains?", 2, Some(2), collections::contains_p),
    builtin!("find", 2, Some(2), collections::find),
    builtin!("count", 1, Some(1), collections::count),
    builtin!("nth", 2, Some(3), collections::nth),
    builtin!("nthrest", 2, Some(2), collections::nthrest),
    builtin!("first", 1, Some(1), collections::first),
    builtin!("rest", 1, Some(1), collections::rest),
    builtin!("next", 1, Some(1), collections::next),
    builtin!("seq", 1, Some(1), collections::seq),
    builtin!("cons", 2, Some(2), collections::cons),
    builtin!("list", 0, None, collections::list),
    builtin!("vector", 0, None, collections::vector),
    builtin!("hash-map", 0, None, collections::hash_map),
    builtin!("hash-set", 0, None, collections::hash_set),
    builtin!("vec", 1, Some(1), collections::vec),
    builtin!("set", 1, Some(1), collections::set),
    builtin!("subvec", 2, Some(3), collections::subvec),
    builtin!("peek", 1, Some(1), collections::peek),
    builtin!("pop", 1, Some(1), collections::pop),
    builtin!("keys", 1, Some(1), collections::keys),
    builtin!("vals", 1, Some(1), collections::vals),
    builtin!("empty", 1, Some(1), collections::empty),
    builtin!("reverse", 1, Some(1), collections::reverse),
    builtin!("__seq-to-map", 1, Some(1), collections::seq_to_map),
    // sequences
    builtin!("__lazy-seq", 1, Some(1), seq_ops::lazy_seq),
    builtin!("filter", 2, Some(2), seq_ops::filter),
    builtin!("reduce", 2, Some(3), seq_ops::reduce),
    builtin!("reduced", 1, Some(1), seq_ops::reduced),
    builtin!("reduced?", 1, Some(1), seq_ops::reduced_p),
    builtin!("apply", 2, None, seq_ops::apply),
    builtin!("sort", 1, Some(2), seq_ops::sort),
    builtin!("sort-by", 2, Some(3), seq_ops::sort_by),
    builtin!("group-by", 2, Some(2), seq_ops::group_by),
    builtin!("realized?", 1, Some(1), seq_ops::realized_p),
    // cells
    builtin!("atom", 1, Some(1), cells::atom),
    builtin!("deref", 1, Some(1), cells::deref),
    builtin!("reset!", 2, Some(2), cells::reset),
    builtin!("swap!", 2, None, cells::swap),
    builtin!("compare-and-set!", 3, Some(3), cells::compare_and_set),
    builtin!("volatile!", 1, Some(1), cells::volatile),
    builtin!("vreset!", 2, Some(2), cells::vreset),
    builtin!("vswap!", 2, None, cells::vswap),
    builtin!("__delay", 1, Some(1), cells::delay),
    builtin!("force", 1, Some(1), cells::force),
    // strings, symbols, keywords
    builtin!("str", 0, None, strings::str),
    builtin!("subs", 2, Some(3), strings::subs),
    builtin!("name", 1, Some(1), strings::name),
    builtin!("namespace", 1, Some(1), strings::namespace),
    builtin!("keyword", 1, Some(2), strings::keyword),
    builtin!("symbol", 1, Some(2), strings::symbol),
    builtin!("gensym", 0, Some(1), strings::gensym),
    builtin!("split", 2, Some(2), strings::string_split),
    builtin!("join", 1, Some(2), strings::string_join),
    builtin!("upper-case", 1, Some(1), strings::upper_case),
    builtin!("lower-case", 1, Some(1), strings::lower_case),
    builtin!("trim", 1, Some(1), strings::trim),
    // printing and I/O
    builtin!("print", 0, None, io::print),
    builtin!("println", 0, None, io::println),
    builtin!("pr", 0, None, io::pr),
    builtin!("prn", 0, None, io::prn),
    builtin!("newline", 0, Some(0), io::newline),
    builtin!("pr-str", 0, None, io::pr_str_b),
    builtin!("print-str", 0, None, io::print_str_b),
    builtin!("slurp", 1, Some(1), io::slurp),
    builtin!("spit", 2, Some(2), io::spit),
    builtin!("read-string", 1, Some(1), io::read_string),
    builtin!("eval", 1, Some(1), io::eval),
    builtin!("load-file", 1, Some(1), io::load_file),
    builtin!("require", 1, None, io::require),
    builtin!("in-ns", 1, Some(1), io::in_ns),
    // emulated host classes
    builtin!("__abs", 1, Some(1), io::abs),
    builtin!("__floor", 1, Some(1), io::floor),
    builtin!("__ceil", 1, Some(1), io::ceil),
    builtin!("__sqrt", 1, Some(1), io::sqrt),
    builtin!("__pow", 2, Some(2), io::pow),
    builtin!("__getenv", 1, Some(1), io::getenv),
    builtin!("__nano-time", 0, Some(0), io::nano_time),
    builtin!("__current-time-millis", 0, Some(0), io::current_time_millis),
    builtin!("__exit", 0, Some(1), io::exit),
    builtin!("__parse-int", 1, Some(1), io::parse_int),
    // metadata, vars, types
    builtin!("meta", 1, Some(1), meta_ops::meta),
    builtin!("with-meta", 2, Some(2), meta_ops::with_meta),
    builtin!("alter-meta!", 2, None, meta_ops::alter_meta),
    builtin!("type", 1, Some(1), meta_ops::type_of),
    builtin!("identical?", 2, Some(2), meta_ops::identical_p),
    builtin!("hash", 1, Some(1), meta_ops::hash),
    builtin!("__var", 1, Some(1), meta_ops::var_lookup),
    builtin!("bound?", 1, Some(1), meta_ops::bound_p),
    builtin!("var-get", 1, Some(1), meta_ops::var_get),
    builtin!("__set-var", 2, Some(2), meta_ops::set_var),
    builtin!("__push-binding", 2, Some(2), meta_ops::push_binding),
    builtin!("__pop-binding", 1, Some(1), meta_ops::pop_binding),
    // hierarchies, multimethods, protocols
    builtin!("derive", 2, Some(2), meta_ops::derive),
    builtin!("isa?", 2, Some(2), meta_ops::isa_p),
    builtin!("__defmulti", 2, Some(2), meta_ops::defmulti),
    builtin!("__defmethod", 3, Some(3), meta_ops::defmethod),
    builtin!("remove-method", 2, Some(2), meta_ops::remove_method),
    builtin!("prefer-method", 3, Some(3), meta_ops::prefer_method),
    builtin!("methods", 1, Some(1), meta_ops::methods),
    builtin!("__defprotocol", 2, Some(2), meta_ops::defprotocol),
    builtin!("__protocol-fn", 2, Some(2), meta_ops::protocol_fn),
    builtin!("__extend-type", 3, Some(3), meta_ops::extend_type),
    builtin!("satisfies?", 2, Some(2), meta_ops::satisfies_p),
    // exceptions
    builtin!("ex-info", 2, Some(2), meta_ops::ex_info),
    builtin!("ex-message", 1, Some(1), meta_ops::ex_message),
    builtin!("ex-data", 1, Some(1), meta_ops::ex_data),
    builtin!("__catch-match", 2, Some(2), meta_ops::catch_match),
    // namespaces
    builtin!("all-ns", 0, Some(0), meta_ops::all_ns),
    builtin!("ns-name", 0, Some(0), meta_ops::ns_name),
    builtin!("ns-publics", 0, Some(1), meta_ops::ns_publics),
    builtin!("alias", 2, Some(2), meta_ops::alias),
    builtin!("__doc", 1, Some(1), meta_ops::doc_string),
    // regex
    builtin!("re-pattern", 1, Some(1), regex_ops::re_pattern),
    builtin!("re-find", 2, Some(2), regex_ops::re_find),
    builtin!("re-matches", 2, Some(2), regex_ops::re_matches),
    builtin!("re-seq", 2, Some(2), regex_ops::re_seq),
    builtin!("re-replace", 3, Some(3), regex_ops::re_replace),
];

/// Intern every builtin into `clojure.core`.
pub fn register_all(env: &Env) {
    for def in BUILTINS {
        let var = env.intern(CORE_NS, def.name);
        var.set_root(Value::Builtin(def));
    }
}

/// Find a builtin by name, for cache restore.
pub fn by_name(name: &str) -> Option<&'static BuiltinDef> {
    BUILTINS.iter().find(|b| b.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_names() {
        let mut names: Vec<&str> = BUILTINS.iter().map(|b| b.name).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn test_registration_binds_roots() {
        let env = Env::new();
        register_all(&env);
        let var = env
            .resolve(&cljw_core::symbol::Symbol::simple("conj"))
            .expect("conj registered");
        assert!(matches!(var.deref().unwrap(), Value::Builtin(_)));
    }

    #[test]
    fn test_intrinsic_flags() {
        assert!(by_name("+").unwrap().intrinsic.is_some());
        assert!(by_name("conj").unwrap().intrinsic.is_none());
    }
}
