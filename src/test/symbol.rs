use super::*;
use crate::symbol::{
    raw_symbol_hash, symbol_hash, CaseMode, LookupOutcome, SymSpace, SYMTABLE_HASH_SIZE,
};

#[test]
fn hash_ignores_ascii_case() {
    assert_eq!(raw_symbol_hash("OutA"), raw_symbol_hash("OUTA"));
    assert_eq!(raw_symbol_hash("outa"), raw_symbol_hash("OUTA"));
    assert!(symbol_hash("anything") < SYMTABLE_HASH_SIZE);
}

#[test]
fn add_then_find_returns_kind_and_value() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    let id = syms
        .add(t, "answer", SymbolKind::Constant, SymVal::Int(42), None)
        .unwrap();
    let found = syms.find(t, "answer", CaseMode::Default).unwrap();
    assert_eq!(found, id);
    assert_eq!(syms.sym(found).kind, SymbolKind::Constant);
    match syms.sym(found).val {
        SymVal::Int(v) => assert_eq!(v, 42),
        _ => panic!("wrong value"),
    }
}

#[test]
fn case_sensitivity_follows_the_table_flag() {
    let mut syms = SymSpace::new(false);
    let nocase = syms.new_table(None, true);
    let sensitive = syms.new_table(None, false);
    syms.add(nocase, "Value", SymbolKind::Constant, SymVal::Int(1), None)
        .unwrap();
    syms.add(sensitive, "Value", SymbolKind::Constant, SymVal::Int(2), None)
        .unwrap();
    assert!(syms.find(nocase, "VALUE", CaseMode::Default).is_some());
    assert!(syms.find(sensitive, "VALUE", CaseMode::Default).is_none());
    assert!(syms.find(sensitive, "Value", CaseMode::Default).is_some());
}

#[test]
fn per_call_case_override() {
    let mut syms = SymSpace::new(false);
    let nocase = syms.new_table(None, true);
    syms.add(nocase, "Value", SymbolKind::Constant, SymVal::Int(1), None)
        .unwrap();
    assert!(syms
        .find(nocase, "VALUE", CaseMode::ForceSensitive)
        .is_none());
    let sensitive = syms.new_table(None, false);
    syms.add(sensitive, "Value", SymbolKind::Constant, SymVal::Int(2), None)
        .unwrap();
    assert!(syms
        .find(sensitive, "VALUE", CaseMode::ForceInsensitive)
        .is_some());
}

#[test]
fn global_case_sensitive_mode_overrides_table_flag() {
    let mut syms = SymSpace::new(true);
    let t = syms.new_table(None, true);
    syms.add(t, "Value", SymbolKind::Constant, SymVal::Int(1), None)
        .unwrap();
    assert!(syms.find(t, "VALUE", CaseMode::Default).is_none());
}

#[test]
fn duplicates_are_rejected_with_the_conflict() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    let first = syms
        .add(t, "x", SymbolKind::Variable, SymVal::None, None)
        .unwrap();
    match syms.add(t, "x", SymbolKind::Constant, SymVal::Int(0), None) {
        Err(conflict) => assert_eq!(conflict, first),
        Ok(_) => panic!("duplicate insert must fail"),
    }
}

#[test]
fn weak_aliases_may_be_overridden() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    syms.add(
        t,
        "print",
        SymbolKind::WeakAlias,
        SymVal::Alias("builtin_print".into()),
        None,
    )
    .unwrap();
    let over = syms.add(t, "print", SymbolKind::Function, SymVal::None, None);
    assert!(over.is_ok());
    let found = syms.find(t, "print", CaseMode::Default).unwrap();
    assert_eq!(syms.sym(found).kind, SymbolKind::Function);
}

#[test]
fn lookup_walks_outer_tables() {
    let mut syms = SymSpace::new(false);
    let outer = syms.new_table(None, true);
    let inner = syms.new_table(Some(outer), true);
    syms.add(outer, "g", SymbolKind::Variable, SymVal::None, None)
        .unwrap();
    match syms.lookup(inner, "g") {
        LookupOutcome::Found(s) => assert_eq!(syms.sym(s).kind, SymbolKind::Variable),
        other => panic!("expected to find g, got {:?}", other),
    }
    assert!(syms.find(inner, "g", CaseMode::Default).is_none());
    assert!(syms.find_in_context(inner, "g").is_some());
}

#[test]
fn lookup_resolves_alias_chains() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    syms.add(t, "real", SymbolKind::Constant, SymVal::Int(7), None)
        .unwrap();
    syms.add(
        t,
        "alias1",
        SymbolKind::WeakAlias,
        SymVal::Alias("real".into()),
        None,
    )
    .unwrap();
    syms.add(
        t,
        "alias2",
        SymbolKind::WeakAlias,
        SymVal::Alias("alias1".into()),
        None,
    )
    .unwrap();
    match syms.lookup(t, "alias2") {
        LookupOutcome::Found(s) => assert_eq!(&*syms.sym(s).name, "real"),
        other => panic!("expected real, got {:?}", other),
    }
}

#[test]
fn deep_alias_cycles_are_diagnosed() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    syms.add(t, "a", SymbolKind::WeakAlias, SymVal::Alias("b".into()), None)
        .unwrap();
    syms.add(t, "b", SymbolKind::WeakAlias, SymVal::Alias("a".into()), None)
        .unwrap();
    assert_eq!(syms.lookup(t, "a"), LookupOutcome::Cycle);
}

/// Chain of `hops` aliases ending at a constant named "end"; returns the
/// name of the outermost alias.
fn alias_chain(syms: &mut SymSpace, t: crate::symbol::TableId, hops: usize) -> String {
    syms.add(t, "end", SymbolKind::Constant, SymVal::Int(1), None)
        .unwrap();
    let mut prev = "end".to_owned();
    for i in 0..hops {
        let name = format!("hop{}", i);
        syms.add(
            t,
            &name,
            SymbolKind::WeakAlias,
            SymVal::Alias(prev.as_str().into()),
            None,
        )
        .unwrap();
        prev = name;
    }
    prev
}

#[test]
fn thirty_two_hops_are_still_legal() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    let outermost = alias_chain(&mut syms, t, 32);
    match syms.lookup(t, &outermost) {
        LookupOutcome::Found(s) => assert_eq!(&*syms.sym(s).name, "end"),
        other => panic!("expected end, got {:?}", other),
    }
}

#[test]
fn thirty_three_hops_are_a_recursive_definition() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    let outermost = alias_chain(&mut syms, t, 33);
    assert_eq!(syms.lookup(t, &outermost), LookupOutcome::Cycle);
}

#[test]
fn find_by_offset_with_result_fallback() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    let p = syms
        .add(t, "arg0", SymbolKind::Parameter, SymVal::None, None)
        .unwrap();
    syms.sym_mut(p).offset = 0;
    // no RESULT at offset 0: fall back to the parameter
    let found = syms.find_by_offset(t, 0, SymbolKind::Result).unwrap();
    assert_eq!(found, p);

    let mut syms2 = SymSpace::new(false);
    let t2 = syms2.new_table(None, true);
    let l = syms2
        .add(t2, "loc0", SymbolKind::LocalVar, SymVal::None, None)
        .unwrap();
    // no RESULT and no PARAMETER: fall all the way to the local
    let found = syms2.find_by_offset(t2, 0, SymbolKind::Result).unwrap();
    assert_eq!(found, l);
}

#[test]
fn iteration_is_in_insertion_order() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    for name in &["zebra", "apple", "mango"] {
        syms.add(t, name, SymbolKind::Variable, SymVal::None, None)
            .unwrap();
    }
    let names: Vec<_> = syms
        .ordered_syms(t)
        .iter()
        .map(|&s| syms.sym(s).name.to_string())
        .collect();
    assert_eq!(names, vec!["zebra", "apple", "mango"]);
}

#[test]
fn namespace_is_idempotent() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    let ns1 = syms.namespace(t, "gfx");
    let ns2 = syms.namespace(t, "gfx");
    assert_eq!(ns1, ns2);
    syms.add(ns1, "width", SymbolKind::Constant, SymVal::Int(320), None)
        .unwrap();
    assert!(syms.find(ns2, "width", CaseMode::Default).is_some());
}

#[test]
fn user_name_keeps_original_spelling() {
    let mut syms = SymSpace::new(false);
    let t = syms.new_table(None, true);
    let s = syms
        .add(t, "myvar", SymbolKind::Variable, SymVal::None, Some("MyVar"))
        .unwrap();
    assert_eq!(&*syms.sym(s).name, "myvar");
    assert_eq!(&*syms.sym(s).user_name, "MyVar");
}

#[test]
fn temp_names_roll_and_can_be_rebased() {
    let mut c = ctx();
    let a = c.new_temp_name("_tmp_", None);
    let b = c.new_temp_name("_tmp_", None);
    assert_eq!(a, "_tmp__0001");
    assert_eq!(b, "_tmp__0002");
    let old = c.set_temp_base(90, 0);
    assert_eq!(old, 3);
    assert_eq!(c.new_temp_name("_cse_", None), "_cse__0090");
    let mut counter = 5;
    assert_eq!(c.new_temp_name("_idx_", Some(&mut counter)), "_idx__0005");
    assert_eq!(counter, 6);
}

#[test]
fn reserved_words_are_preloaded() {
    let c = ctx();
    assert!(c.syms.find(c.reserved, "mov", CaseMode::Default).is_some());
    assert!(c.syms.find(c.reserved, "djnz", CaseMode::Default).is_some());
    assert!(c.syms.find(c.reserved, "outa", CaseMode::Default).is_some());
    // reserved lookups are case-insensitive
    assert!(c.syms.find(c.reserved, "MOV", CaseMode::Default).is_some());
}

#[test]
fn declaring_a_reserved_word_warns() {
    let mut f = fixture();
    let table = f.ctx.module(f.module).objsyms;
    f.ctx
        .declare_symbol(table, "mov", SymbolKind::Variable, SymVal::None, None);
    assert_eq!(f.ctx.diags.warnings, 1);
    assert_eq!(f.ctx.errors(), 0);
}

#[test]
fn duplicate_declaration_is_a_diagnostic() {
    let mut f = fixture();
    let table = f.ctx.module(f.module).objsyms;
    f.ctx
        .declare_symbol(table, "x", SymbolKind::Variable, SymVal::None, None);
    f.ctx
        .declare_symbol(table, "x", SymbolKind::Variable, SymVal::None, None);
    assert_eq!(f.ctx.errors(), 1);
    assert!(f.ctx.has_diag(crate::diag::DiagKind::SymbolRedefinition));
}
