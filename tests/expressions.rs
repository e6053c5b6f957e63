use fragment_template as ft;
use fragment_template::{Evaluator, NativeFunction, Registry, TemplateContext, Val};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn ctx(value: serde_json::Value) -> TemplateContext {
    TemplateContext::from_json(value)
}

#[test]
fn test_eval_returns_json() {
    let out = ft::eval("items.filter(i => i.done).map(i => i.id)", &ctx(json!({
        "items": [{"id": 1, "done": true}, {"id": 2, "done": false}, {"id": 3, "done": true}]
    })))
    .unwrap();
    assert_eq!(out, json!([1, 3]));
}

#[test]
fn test_eval_undefined_is_null() {
    assert_eq!(ft::eval("user?.missing", &ctx(json!({"user": {}}))).unwrap(), json!(null));
}

#[test]
fn test_render_builtins() {
    let out = ft::render(
        "${encodeURIComponent(q)}|${parseInt('42px')}|${Object.keys(o).join()}|${Array.isArray(o)}",
        &ctx(json!({"q": "a b&c", "o": {"x": 1, "y": 2}})),
    )
    .unwrap();
    assert_eq!(out, "a%20b%26c|42|x,y|false");
}

#[test]
fn test_render_nested_template_literals() {
    let out = ft::render(
        "<table>${rows.map(r => `<tr>${r.cells.map(c => `<td>${c}</td>`).join('')}</tr>`).join('')}</table>",
        &ctx(json!({"rows": [{"cells": [1, 2]}, {"cells": [3]}]})),
    )
    .unwrap();
    assert_eq!(out, "<table><tr><td>1</td><td>2</td></tr><tr><td>3</td></tr></table>");
}

#[test]
fn test_escaped_interpolation_is_literal() {
    assert_eq!(ft::render(r"\${not} ${1}", &TemplateContext::new()).unwrap(), "${not} 1");
}

#[test]
fn test_json_helpers() {
    let out = ft::render("${JSON.parse(raw).a + 1}", &ctx(json!({"raw": "{\"a\": 41}"}))).unwrap();
    assert_eq!(out, "42");
}

#[test]
fn test_custom_registry_function() {
    fn shout(args: &[Val]) -> ft::Result<Val> {
        Ok(Val::str(format!("{}!", args[0])))
    }
    let mut registry = Registry::with_builtins();
    registry.register(NativeFunction::new("shout", 1..=1, shout));
    let out = Evaluator::new(registry)
        .render("${shout(name)}", &ctx(json!({"name": "hey"})))
        .unwrap();
    assert_eq!(out, "hey!");
}

#[test]
fn test_env_binding() {
    let env = [("MODE".to_string(), "ci".to_string())].into_iter().collect();
    let out = Evaluator::default()
        .with_env(env)
        .eval("env.MODE", &TemplateContext::new())
        .unwrap();
    assert_eq!(out, json!("ci"));
}

proptest! {
    #[test]
    fn escape_never_leaves_markup(s in "\\PC*") {
        let out = ft::render("${escape(s)}", &ctx(json!({"s": s}))).unwrap();
        prop_assert!(!out.contains('<'));
        prop_assert!(!out.contains('>'));
        prop_assert!(!out.contains('"'));
    }
}
