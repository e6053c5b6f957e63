use fragment_template as ft;
use fragment_template::{EvalError, TemplateContext};
use serde_json::json;

fn render(markup: &str) -> ft::Result<String> {
    ft::render(markup, &TemplateContext::from_json(json!({"user": {"name": "x"}, "n": 1})))
}

// An expression left open runs to end of input.
#[test]
fn test_unterminated_expression() {
    let err = render("<p>${user.name</p>").unwrap_err();
    assert!(matches!(err, EvalError::Parse(_)), "{err}");
}

#[test]
fn test_unterminated_template_literal() {
    let err = render("${`abc}").unwrap_err();
    assert!(matches!(err, EvalError::Parse(ref m) if m.contains("unterminated template literal")), "{err}");
}

// Constructors, statements and `this` are outside the expression language.
#[test]
fn test_unsupported_syntax() {
    for src in ["${new Date()}", "${this}", "${function() {}}", "${n = 2}", "${delete user.name}"] {
        let err = render(src).unwrap_err();
        assert!(matches!(err, EvalError::Parse(_)), "{src}: {err}");
    }
}

#[test]
fn test_parse_errors_report_position() {
    let err = render("line one\n${ n + }").unwrap_err();
    assert!(err.to_string().contains("line 2"), "{err}");
}

#[test]
fn test_unknown_name() {
    assert_eq!(render("${nope}").unwrap_err(), EvalError::Reference("nope".into()));
}

#[test]
fn test_member_of_undefined() {
    let err = render("${user.profile.name}").unwrap_err();
    assert!(matches!(err, EvalError::Type(_)), "{err}");
}

#[test]
fn test_builtin_arity() {
    let err = render("${Math.pow(2)}").unwrap_err();
    assert!(matches!(err, EvalError::Type(ref m) if m.contains("expects")), "{err}");
}

#[test]
fn test_malformed_uri() {
    let err = render("${decodeURIComponent('%E0%A4%A')}").unwrap_err();
    assert!(err.to_string().contains("URI malformed"), "{err}");
}

// Deep nesting is refused instead of exhausting the stack.
#[test]
fn test_deeply_nested_expression() {
    let markup = format!("${{{}1{}}}", "(".repeat(2000), ")".repeat(2000));
    let err = render(&markup).unwrap_err();
    assert!(matches!(err, EvalError::Parse(ref m) if m.contains("nested too deeply")), "{err}");

    let markup = format!("${{{}}}", "`${".repeat(500) + "1" + &"}`".repeat(500));
    assert!(matches!(render(&markup).unwrap_err(), EvalError::Parse(_)));
}

#[test]
fn test_string_length_cap() {
    let err = render("${'x'.repeat(16777216).replaceAll('x', 'yy').length}").unwrap_err();
    assert!(matches!(err, EvalError::Range(_)), "{err}");
    let err = render("${['x'.repeat(9000000), 'x'.repeat(9000000)].join('').length}").unwrap_err();
    assert!(matches!(err, EvalError::Range(_)), "{err}");
}
