use super::*;
use crate::ast::util::*;
use crate::ast::Payload;

#[test]
fn dup_matches_original() {
    let mut f = fixture();
    let x = f.ctx.ast_ident("x");
    let y = f.ctx.ast_ident("y");
    let two = f.int(2);
    let sum = f.op(Op::Add, x, y);
    let tree = f.op(Op::Mul, sum, two);
    let copy = dup_ast(&mut f.ctx.ast, Some(tree));
    assert_ne!(copy, Some(tree));
    assert!(ast_match(&f.ctx, copy, Some(tree)));
}

#[test]
fn match_is_structural_not_identity() {
    let mut f = fixture();
    let a1 = f.ctx.ast_ident("a");
    let a2 = f.ctx.ast_ident("a");
    assert!(ast_match(&f.ctx, Some(a1), Some(a2)));
    let one1 = f.int(1);
    let one2 = f.int(1);
    let t1 = f.op(Op::Add, a1, one1);
    let t2 = f.op(Op::Add, a2, one2);
    assert!(ast_match(&f.ctx, Some(t1), Some(t2)));
    let sub = f.op(Op::Sub, a1, one1);
    assert!(!ast_match(&f.ctx, Some(t1), Some(sub)));
}

#[test]
fn identifier_match_follows_language_case_rules() {
    // Spin identifiers compare case-insensitively
    let mut f = fixture();
    let a = f.ctx.ast_ident("Counter");
    let b = f.ctx.ast_ident("COUNTER");
    assert!(ast_match(&f.ctx, Some(a), Some(b)));

    // C identifiers do not
    let mut fc = fixture_for(Language::C, OutputKind::Pasm);
    let a = fc.ctx.ast_ident("Counter");
    let b = fc.ctx.ast_ident("COUNTER");
    assert!(!ast_match(&fc.ctx, Some(a), Some(b)));
}

#[test]
fn local_identifier_wrapper_is_transparent_for_body_match() {
    let mut f = fixture();
    let dec1 = f.ctx.ast_ident("run_i_001");
    let plain1 = f.ctx.ast_ident("i");
    let wrapped1 = f
        .ctx
        .new_ast(AstKind::LocalIdentifier, Some(dec1), Some(plain1));
    let dec2 = f.ctx.ast_ident("other_i_007");
    let plain2 = f.ctx.ast_ident("i");
    let wrapped2 = f
        .ctx
        .new_ast(AstKind::LocalIdentifier, Some(dec2), Some(plain2));
    assert!(!ast_match(&f.ctx, Some(wrapped1), Some(wrapped2)));
    assert!(ast_body_match(&f.ctx, Some(wrapped1), Some(wrapped2)));
}

#[test]
fn body_match_skips_comments_and_declarations() {
    let mut f = fixture();
    let x = f.ctx.ast_ident("x");
    let one = f.int(1);
    let work = f.assign(x, one);
    let body1 = f.stmts(&[work]);

    let comment = f.ctx.new_ast(AstKind::Comment, None, None);
    let decl = f.ctx.ast_declare_local(None, None);
    let x2 = f.ctx.ast_ident("x");
    let one2 = f.int(1);
    let work2 = f.assign(x2, one2);
    let body2 = f.stmts(&[comment, decl, work2]);

    assert!(!ast_match(&f.ctx, Some(body1), Some(body2)));
    assert!(ast_body_match(&f.ctx, Some(body1), Some(body2)));
}

#[test]
fn uses_finds_subtrees() {
    let mut f = fixture();
    let k = f.ctx.ast_ident("k");
    let two = f.int(2);
    let prod = f.op(Op::Mul, k, two);
    let three = f.int(3);
    let sum = f.op(Op::Add, prod, three);
    let k2 = f.ctx.ast_ident("k");
    let two2 = f.int(2);
    let probe = f.op(Op::Mul, k2, two2);
    assert!(ast_uses(&f.ctx, Some(sum), Some(probe)));
    let five = f.int(5);
    let other = f.op(Op::Mul, k2, five);
    assert!(!ast_uses(&f.ctx, Some(sum), Some(other)));
    // a null needle is trivially used
    assert!(ast_uses(&f.ctx, Some(sum), None));
}

#[test]
fn dup_with_replace_is_identity_without_uses() {
    let mut f = fixture();
    let a = f.ctx.ast_ident("a");
    let one = f.int(1);
    let tree = f.op(Op::Add, a, one);
    let x = f.ctx.ast_ident("x");
    let y = f.ctx.ast_ident("y");
    assert!(!ast_uses(&f.ctx, Some(tree), Some(x)));
    let copy = dup_ast_with_replace(&mut f.ctx, Some(tree), Some(x), Some(y));
    assert!(ast_match(&f.ctx, copy, Some(tree)));
}

#[test]
fn dup_with_replace_substitutes_every_occurrence() {
    let mut f = fixture();
    let i = f.ctx.ast_ident("i");
    let i2 = f.ctx.ast_ident("i");
    let sum = f.op(Op::Add, i, i2);
    let zero = f.int(0);
    let copy = dup_ast_with_replace(&mut f.ctx, Some(sum), Some(i), Some(zero)).unwrap();
    // both occurrences replaced
    let fixture_ref = &f;
    assert_eq!(fixture_ref.count_kind(Some(copy), AstKind::Identifier), 0);
    assert_eq!(fixture_ref.count_kind(Some(copy), AstKind::Integer), 2);
    // original untouched
    assert_eq!(fixture_ref.count_kind(Some(sum), AstKind::Identifier), 2);
}

#[test]
fn list_building_properties() {
    let mut f = fixture();
    let long_t = f.ctx.types.long;
    let a = f.ctx.ast_stmt(long_t); // payload irrelevant
    assert_eq!(add_to_list(&mut f.ctx.ast, None, Some(a)), Some(a));
    assert_eq!(add_to_list(&mut f.ctx.ast, Some(a), None), Some(a));
    let b = f.ctx.ast_stmt(long_t);
    let c = f.ctx.ast_stmt(long_t);
    let before = list_len(&f.ctx.ast, Some(a));
    let l = add_to_list(&mut f.ctx.ast, Some(a), Some(b));
    assert_eq!(list_len(&f.ctx.ast, l), before + 1);
    let l = add_to_list(&mut f.ctx.ast, l, Some(c));
    assert_eq!(list_len(&f.ctx.ast, l), before + 2);
    // the head never changes
    assert_eq!(l, Some(a));
}

#[test]
fn add_to_list_ex_tracks_the_tail() {
    let mut f = fixture();
    let mut tail = None;
    let mut head = None;
    let mut items = Vec::new();
    for _ in 0..4 {
        let item = f.ctx.ast_stmt(f.ctx.types.long);
        items.push(item);
        head = add_to_list_ex(&mut f.ctx.ast, head, Some(item), &mut tail);
    }
    assert_eq!(head, Some(items[0]));
    assert_eq!(tail, Some(items[3]));
    assert_eq!(list_len(&f.ctx.ast, head), 4);
}

#[test]
fn list_insert_and_remove() {
    let mut f = fixture();
    let a = f.ctx.ast_stmt(f.ctx.types.long);
    let b = f.ctx.ast_stmt(f.ctx.types.long);
    let c = f.ctx.ast_stmt(f.ctx.types.long);
    let mut head = add_to_list(&mut f.ctx.ast, Some(a), Some(c));
    head = list_insert_before(&mut f.ctx, head, Some(c), b);
    assert_eq!(head, Some(a));
    assert_eq!(f.ctx.ast.right(a), Some(b));
    assert_eq!(f.ctx.ast.right(b), Some(c));
    let mut listptr = head;
    remove_from_list(&mut f.ctx.ast, &mut listptr, b);
    assert_eq!(listptr, Some(a));
    assert_eq!(f.ctx.ast.right(a), Some(c));
    // removing the head updates the pointer
    remove_from_list(&mut f.ctx.ast, &mut listptr, a);
    assert_eq!(listptr, Some(c));
}

#[test]
fn replace_keeps_node_identity() {
    let mut f = fixture();
    let x = f.ctx.ast_ident("x");
    let x2 = f.ctx.ast_ident("x");
    let one = f.int(1);
    let tree = f.op(Op::Add, x, x2);
    let holder = f.ctx.ast_stmt(tree);
    let probe = f.ctx.ast_ident("x");
    replace_ast(&mut f.ctx, Some(holder), probe, one);
    // the holder and the operator node are untouched; only children moved
    assert_eq!(f.ctx.ast.left(holder), Some(tree));
    assert_eq!(f.ctx.ast.left(tree), Some(one));
    assert_eq!(f.ctx.ast.right(tree), Some(one));
}

#[test]
fn nullify_turns_a_node_into_a_comment() {
    let mut f = fixture();
    let x = f.ctx.ast_ident("x");
    let one = f.int(1);
    let assign = f.assign(x, one);
    f.ctx.ast.nullify(assign);
    assert_eq!(f.ctx.ast.kind(assign), AstKind::Comment);
    assert!(f.ctx.ast.left(assign).is_none());
    assert!(f.ctx.ast.right(assign).is_none());
}

#[test]
fn modifies_identifier_sees_assignments_and_increments() {
    let mut f = fixture();
    let i = f.ctx.ast_ident("i");
    let j = f.ctx.ast_ident("j");
    let one = f.int(1);
    let set_i = f.assign(i, one);
    let body = f.stmts(&[set_i]);
    assert!(ast_modifies_identifier(&f.ctx, Some(body), i));
    assert!(!ast_modifies_identifier(&f.ctx, Some(body), j));

    let inc = f.ctx.ast_op(Op::Increment, Some(j), None);
    let body2 = f.stmts(&[inc]);
    assert!(ast_modifies_identifier(&f.ctx, Some(body2), j));

    let addr = f.ctx.new_ast(AstKind::AddrOf, Some(i), None);
    let body3 = f.stmts(&[addr]);
    assert!(ast_modifies_identifier(&f.ctx, Some(body3), i));
}

#[test]
fn singleton_types_survive_type_safe_dup() {
    let mut f = fixture();
    let long_t = f.ctx.types.long;
    let x = f.ctx.ast_ident("x");
    let decl = f.ctx.ast_declare_local(Some(long_t), Some(x));
    let copy = dup_ast_type_safe(&mut f.ctx, Some(decl)).unwrap();
    assert_ne!(copy, decl);
    // the type child is shared, not copied
    assert_eq!(f.ctx.ast.left(copy), Some(long_t));
}

#[test]
fn merge_strings_concatenates() {
    let mut f = fixture();
    let hello = f.ctx.ast_string("hello ");
    let world = f.ctx.ast_string("world");
    let merged = ast_merge_strings(&mut f.ctx, Some(hello), Some(world)).unwrap();
    assert_eq!(&*get_string(&f.ctx.ast, Some(merged)), "hello world");
}

#[test]
fn string_len_counts_list_items() {
    let mut f = fixture();
    let lit = f.ctx.ast_plain_string("abc");
    let ch = f.int(65);
    let l2 = f.ctx.new_ast(AstKind::ExprList, Some(ch), None);
    let l1 = f.ctx.new_ast(AstKind::ExprList, Some(lit), Some(l2));
    // "abc" + one char + terminator
    assert_eq!(ast_string_len(&f.ctx.ast, Some(l1)), 5);
}

#[test]
fn payload_check_accepts_well_formed_nodes() {
    let mut f = fixture();
    let i = f.int(5);
    let id = f.ctx.ast_ident("x");
    let op = f.op(Op::Add, i, id);
    for node in [i, id, op].iter().copied() {
        check_payload(&mut f.ctx, node);
    }
    assert_eq!(f.ctx.errors(), 0);
}

#[test]
fn payload_check_reports_mismatches() {
    let mut f = fixture();
    let bad = f.ctx.new_ast(AstKind::Integer, None, None);
    f.ctx.ast[bad].payload = Payload::Str("oops".into());
    check_payload(&mut f.ctx, bad);
    assert!(f.ctx.has_diag(crate::diag::DiagKind::InternalError));
}

#[test]
fn report_as_pins_locations_of_synthesized_nodes() {
    let mut f = fixture();
    let stream = f.ctx.new_stream("test.spin");
    f.ctx.cur_stream = Some(stream);
    f.ctx.streams[stream.index()].add_line(1, "first");
    let original = f.ctx.ast_ident("x");
    f.ctx.streams[stream.index()].add_line(2, "second");

    // without a hint, new nodes take the latest line
    let plain = f.ctx.ast_int(0);
    assert_eq!(f.ctx.ast[plain].loc.line_idx, 1);

    // with a hint, they take the original's location
    let save = f.ctx.report_as(Some(original));
    let synth = f.ctx.ast_int(0);
    assert_eq!(f.ctx.ast[synth].loc, f.ctx.ast[original].loc);
    f.ctx.report_done(save);

    let after = f.ctx.ast_int(0);
    assert_eq!(f.ctx.ast[after].loc.line_idx, 1);
}
