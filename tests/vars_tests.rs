//! Property tests for variable rendering

use proptest::prelude::*;

use clusterdeck::vars::{contains_reference, Variable, Variables, VarsError};

fn scope(pairs: &[(&str, &str)]) -> Variables {
    let mut vars = Variables::new();
    for (name, value) in pairs {
        vars.register(Variable::new(*name, *value)).unwrap();
    }
    vars
}

#[test]
fn test_chained_reference_resolves() {
    let mut vars = scope(&[("a", "${b}"), ("b", "x")]);
    vars.build().unwrap();
    assert_eq!(vars.get("a"), Some("x"));
    assert_eq!(vars.rendering("${a}-${b}").unwrap(), "x-x");
}

#[test]
fn test_cycle_terminates_with_error() {
    let mut vars = scope(&[("a", "${b}"), ("b", "${a}")]);
    let err = vars.build().unwrap_err();
    assert!(matches!(err, VarsError::CycleDetected(_)));
    assert!(!vars.is_built());
}

#[test]
fn test_long_chain_is_bounded() {
    let names: Vec<String> = (0..100).map(|i| format!("v{}", i)).collect();
    let mut vars = Variables::new();
    for (i, name) in names.iter().enumerate() {
        let value = match names.get(i + 1) {
            Some(next) => format!("${{{}}}", next),
            None => "end".to_string(),
        };
        vars.register(Variable::new(name.clone(), value)).unwrap();
    }
    assert!(vars.build().is_err());
}

#[test]
fn test_unknown_reference_fails() {
    let vars = scope(&[("a", "1")]);
    assert_eq!(
        vars.rendering("${missing}"),
        Err(VarsError::UnresolvedReference("missing".to_string()))
    );
}

proptest! {
    #[test]
    fn rendering_without_references_is_identity(text in "[^$]*") {
        let vars = scope(&[("a", "1")]);
        prop_assert!(!contains_reference(&text));
        prop_assert_eq!(vars.rendering(&text).unwrap(), text);
    }

    #[test]
    fn rendering_substitutes_every_occurrence(
        prefix in "[a-z ]{0,8}",
        value in "[a-zA-Z0-9./:_-]{0,16}",
        count in 1usize..5,
    ) {
        let mut vars = scope(&[("name", value.as_str())]);
        vars.build().unwrap();
        let text = format!("{}{}", prefix, "${name}".repeat(count));
        let expected = format!("{}{}", prefix, value.repeat(count));
        prop_assert_eq!(vars.rendering(&text).unwrap(), expected);
    }
}
