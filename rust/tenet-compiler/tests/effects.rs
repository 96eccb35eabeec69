//! Interprocedural effect inference across recursive call graphs, and
//! catalog resolution regardless of the order stubs were registered in.

use tenet_compiler::compiler::ast::{CallRef, Expr, FunctionDecl, Program, Stmt};
use tenet_compiler::compiler::effects::catalog::{CatalogLayer, EffectCatalog, Resolution};
use tenet_compiler::compiler::effects::inference::{EffectError, EffectInference, UnknownCallPolicy};
use tenet_compiler::compiler::effects::{EffectKind, EffectSet};
use tenet_compiler::compiler::error_codes::effect_code;

fn call(callee: &str, types: &[&str], line: usize) -> Stmt {
    Stmt::Expr(Expr::call(CallRef::new(callee, types), vec![]).at(line, 5))
}

fn strict(catalog: &EffectCatalog) -> EffectInference<'_> {
    EffectInference::new(catalog, UnknownCallPolicy::Strict)
}

// ============================================================================
// Recursion
// ============================================================================

fn mutual_recursion(a_effects: &[&str], b_effects: &[&str]) -> Program {
    Program::new(vec![
        FunctionDecl::new("A", vec![], None, vec![call("B", &[], 2)]).with_effects(a_effects),
        FunctionDecl::new(
            "B",
            vec![],
            None,
            vec![
                call("A", &[], 6),
                call("Std.Console::PrintLine", &["String"], 7),
            ],
        )
        .with_effects(b_effects),
    ])
}

#[test]
fn mutual_recursion_shares_effects() {
    let catalog = EffectCatalog::builtin();
    let program = mutual_recursion(&["io:console_write"], &["io:console_write"]);
    let report = strict(&catalog).infer(&program);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let expected = EffectSet::of(&[EffectKind::ConsoleWrite]);
    assert_eq!(report.profile("A").unwrap().computed, expected);
    assert_eq!(report.profile("B").unwrap().computed, expected);
}

#[test]
fn undeclared_member_of_cycle_is_flagged() {
    let catalog = EffectCatalog::builtin();
    let program = mutual_recursion(&["io:console_write"], &[]);
    let report = strict(&catalog).infer(&program);

    assert!(report.profile("A").unwrap().is_accepted());
    assert!(!report.profile("B").unwrap().is_accepted());
    assert!(report.profile("A").unwrap().computed.contains(EffectKind::ConsoleWrite));

    let violations: Vec<&EffectError> = report.violations().collect();
    assert_eq!(violations.len(), 1);
    match violations[0] {
        EffectError::Violation {
            function,
            effect,
            chain,
            ..
        } => {
            assert_eq!(function, "B");
            assert_eq!(*effect, EffectKind::ConsoleWrite);
            let rendered: Vec<String> = chain.iter().map(|l| l.to_string()).collect();
            assert_eq!(rendered, vec!["B calls Std.Console::PrintLine(String) at 7:5"]);
        }
        other => panic!("expected a violation, got {:?}", other),
    }
    assert_eq!(effect_code(violations[0]), "E0701");
}

#[test]
fn self_recursion_converges() {
    let catalog = EffectCatalog::builtin();
    let program = Program::new(vec![FunctionDecl::new(
        "spin",
        vec![],
        None,
        vec![call("spin", &[], 2), Stmt::Throw(Expr::string("boom"), Default::default())],
    )
    .with_effects(&["exception"])]);
    let report = strict(&catalog).infer(&program);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(
        report.profile("spin").unwrap().computed,
        EffectSet::of(&[EffectKind::Throw])
    );
}

#[test]
fn strict_and_permissive_unknown_calls() {
    let catalog = EffectCatalog::builtin();
    let program = Program::new(vec![FunctionDecl::new(
        "f",
        vec![],
        None,
        vec![call("Vendor.Sdk::Frob", &["Int"], 3)],
    )]);

    let report = strict(&catalog).infer(&program);
    let profile = report.profile("f").unwrap();
    assert_eq!(profile.computed, EffectSet::worst_case());
    assert!(report
        .errors
        .iter()
        .any(|e| matches!(e, EffectError::UnknownCall { strict: true, .. })));

    let report = EffectInference::new(&catalog, UnknownCallPolicy::Permissive).infer(&program);
    assert!(report.profile("f").unwrap().computed.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].is_warning());
    assert_eq!(effect_code(&report.errors[0]), "W0704");
}

// ============================================================================
// Catalog ordering
// ============================================================================

const SIG: &str = "Ext.Net::Send(String)";
const NETWORK: &[&str] = &["io:network"];
const NETWORK_THROW: &[&str] = &["io:network", "exception:throw"];

fn stub_toml(effects: &[&str]) -> String {
    let list: Vec<String> = effects.iter().map(|e| format!("\"{}\"", e)).collect();
    format!("[[stub]]\nsignature = \"{}\"\neffects = [{}]\n", SIG, list.join(", "))
}

type Loader = fn(&mut EffectCatalog, &[&str]);

fn via_add(catalog: &mut EffectCatalog, effects: &[&str]) {
    catalog.add_stub(CatalogLayer::Project, SIG, effects).unwrap();
}

fn via_toml(catalog: &mut EffectCatalog, effects: &[&str]) {
    assert_eq!(catalog.load_overrides_str(&stub_toml(effects)).unwrap(), 1);
}

fn orderings() -> Vec<EffectCatalog> {
    let loaders: [Loader; 2] = [via_add, via_toml];
    let mut catalogs = Vec::new();
    for first in loaders {
        for second in loaders {
            for (x, y) in [(NETWORK, NETWORK_THROW), (NETWORK_THROW, NETWORK)] {
                let mut catalog = EffectCatalog::builtin();
                first(&mut catalog, x);
                second(&mut catalog, y);
                catalogs.push(catalog);
            }
        }
    }
    let mut both = EffectCatalog::builtin();
    let text = format!("{}\n{}", stub_toml(NETWORK_THROW), stub_toml(NETWORK));
    assert_eq!(both.load_overrides_str(&text).unwrap(), 2);
    catalogs.push(both);
    catalogs
}

#[test]
fn conflicting_stubs_are_ambiguous_in_every_order() {
    let call = CallRef::new("Ext.Net::Send", &["String"]);
    let expected = vec![EffectSet::parse(NETWORK).unwrap(), EffectSet::parse(NETWORK_THROW).unwrap()];

    let results: Vec<Resolution> = orderings().iter().map(|c| c.resolve(&call)).collect();
    assert_eq!(results.len(), 9);
    for resolution in results {
        match resolution {
            Resolution::Ambiguous {
                signature,
                mut candidates,
            } => {
                assert_eq!(signature, SIG);
                candidates.sort();
                let mut want = expected.clone();
                want.sort();
                assert_eq!(candidates, want);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }
}

#[test]
fn ambiguity_is_reported_identically_in_every_order() {
    let program = Program::new(vec![FunctionDecl::new(
        "send",
        vec![],
        None,
        vec![call("Ext.Net::Send", &["String"], 4)],
    )
    .with_effects(&["io:network", "exception:throw"])]);

    let mut reports = Vec::new();
    for catalog in orderings() {
        let report = strict(&catalog).infer(&program);
        assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
        assert_eq!(effect_code(&report.errors[0]), "E0702");
        reports.push((report.errors.clone(), report.profile("send").unwrap().computed.clone()));
    }
    assert!(reports.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(reports[0].1, EffectSet::parse(NETWORK_THROW).unwrap());
}

#[test]
fn identical_duplicates_collapse() {
    let mut catalog = EffectCatalog::empty();
    via_add(&mut catalog, NETWORK);
    via_toml(&mut catalog, &["io:network"]);
    let call = CallRef::new("Ext.Net::Send", &["String"]);
    assert!(matches!(
        catalog.resolve(&call),
        Resolution::Resolved { effects, .. } if effects == EffectSet::of(&[EffectKind::Network])
    ));
}

#[test]
fn project_layer_shadows_builtin() {
    let mut catalog = EffectCatalog::builtin();
    catalog
        .add_stub::<&str>(CatalogLayer::Project, "Std.Console::PrintLine(String)", &[])
        .unwrap();
    let call = CallRef::new("Std.Console::PrintLine", &["String"]);
    assert!(matches!(
        catalog.resolve(&call),
        Resolution::Resolved { effects, .. } if effects.is_empty()
    ));
}
