// src/expression.rs
use crate::errors::Result;
use crate::parser::{is_ident_start, Parser};

/// A parsed template: literal markup interleaved with `${...}` expressions.
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone)]
pub enum Part {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Template(Vec<Part>),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: Property,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    Arrow {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

#[derive(Debug, Clone)]
pub enum Property {
    Named(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

impl Expr {
    /// Source-like rendering of simple callee shapes, used in error messages
    /// (`user.nmae is not a function`).
    pub fn describe(&self) -> String {
        match self {
            Expr::Ident(name) => name.clone(),
            Expr::Member {
                object,
                property: Property::Named(name),
                optional,
            } => format!("{}{}{name}", object.describe(), if *optional { "?." } else { "." }),
            Expr::Member { object, .. } => format!("{}[...]", object.describe()),
            Expr::Call { callee, .. } => format!("{}(...)", callee.describe()),
            _ => "expression".to_string(),
        }
    }
}

/// Parse a whole markup file. `${` starts an expression; `\${` is a literal
/// `${`. Other backslashes are markup and kept verbatim.
pub fn parse_template(input: &str) -> Result<Template> {
    let mut p = EParser::new(input);
    let parts = p.parse_parts(None)?;
    Ok(Template { parts })
}

/// Parse a single standalone expression.
pub fn parse_expr(input: &str) -> Result<Expr> {
    let mut p = EParser::new(input);
    let node = p.parse_expression()?;
    p.skip_ws();
    if !p.eof() {
        return Err(p.parser.error("trailing input"));
    }
    Ok(node)
}

/// Deepest expression nesting the parser accepts. Counts parenthesised and
/// bracketed sub-expressions, unary operators and every link of an operator
/// or member chain, so it also bounds the depth of the resulting tree.
pub const MAX_NESTING: usize = 128;

struct EParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> EParser<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            parser: Parser::new(s),
            depth: 0,
        }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.parser.error("expression nested too deeply"));
        }
        Ok(())
    }

    /// Text and `${}` parts up to `terminator` (a backtick for nested
    /// template literals) or end of input.
    fn parse_parts(&mut self, terminator: Option<char>) -> Result<Vec<Part>> {
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            let Some(c) = self.parser.peek_char() else {
                if terminator.is_some() {
                    return Err(self.parser.error("unterminated template literal"));
                }
                break;
            };
            if Some(c) == terminator {
                self.parser.consume_char(c);
                break;
            }
            if self.parser.consume_str("${") {
                if !text.is_empty() {
                    parts.push(Part::Text(std::mem::take(&mut text)));
                }
                let expr = self.parse_expression()?;
                self.skip_ws();
                self.parser.expect('}')?;
                parts.push(Part::Expr(expr));
                continue;
            }
            if c == '\\' {
                if terminator.is_some() {
                    self.parser.consume_char('\\');
                    self.parser.parse_escape(&mut text)?;
                    continue;
                }
                if self.parser.consume_str("\\${") {
                    text.push_str("${");
                    continue;
                }
            }
            self.parser.consume_char(c);
            text.push(c);
        }
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        Ok(parts)
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.descend()?;
        let node = match self.try_parse_arrow()? {
            Some(arrow) => arrow,
            None => self.parse_conditional()?,
        };
        self.depth -= 1;
        Ok(node)
    }

    fn try_parse_arrow(&mut self) -> Result<Option<Expr>> {
        self.skip_ws();
        let start = self.parser.pos();
        let params = if self.parser.consume_char('(') {
            let mut params = Vec::new();
            loop {
                self.skip_ws();
                if self.parser.consume_char(')') {
                    break;
                }
                if !self.parser.peek_char().is_some_and(is_ident_start) {
                    self.parser.reset(start);
                    return Ok(None);
                }
                params.push(self.parser.parse_identifier()?);
                self.skip_ws();
                if self.parser.consume_char(',') {
                    continue;
                }
                if !self.parser.consume_char(')') {
                    self.parser.reset(start);
                    return Ok(None);
                }
                break;
            }
            params
        } else if self.parser.peek_char().is_some_and(is_ident_start) {
            vec![self.parser.parse_identifier()?]
        } else {
            return Ok(None);
        };
        self.skip_ws();
        if !self.parser.consume_str("=>") {
            self.parser.reset(start);
            return Ok(None);
        }
        let body = self.parse_expression()?;
        Ok(Some(Expr::Arrow {
            params,
            body: Box::new(body),
        }))
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_or()?;
        self.skip_ws();
        if self.parser.peek_char() == Some('?') && !self.at_optional_chain() && !self.parser.peek_str("??") {
            self.parser.consume_char('?');
            let consequent = self.parse_expression()?;
            self.skip_ws();
            self.parser.expect(':')?;
            let alternate = self.parse_expression()?;
            return Ok(Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            });
        }
        Ok(test)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_and()?;
        loop {
            self.skip_ws();
            let op = if self.parser.consume_str("||") {
                LogicalOp::Or
            } else if self.parser.consume_str("??") {
                LogicalOp::Nullish
            } else {
                break;
            };
            self.descend()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Logical {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_equality()?;
        loop {
            self.skip_ws();
            if !self.parser.consume_str("&&") {
                break;
            }
            self.descend()?;
            let rhs = self.parse_equality()?;
            lhs = Expr::Logical {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_relational()?;
        loop {
            self.skip_ws();
            let op = if self.parser.consume_str("===") {
                BinaryOp::StrictEq
            } else if self.parser.consume_str("!==") {
                BinaryOp::StrictNe
            } else if self.parser.consume_str("==") {
                BinaryOp::Eq
            } else if self.parser.consume_str("!=") {
                BinaryOp::Ne
            } else {
                break;
            };
            self.descend()?;
            let rhs = self.parse_relational()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_additive()?;
        loop {
            self.skip_ws();
            let op = if self.parser.consume_str("<=") {
                BinaryOp::Lte
            } else if self.parser.consume_str(">=") {
                BinaryOp::Gte
            } else if self.parser.consume_char('<') {
                BinaryOp::Lt
            } else if self.parser.consume_char('>') {
                BinaryOp::Gt
            } else {
                break;
            };
            self.descend()?;
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            let op = if self.parser.consume_char('+') {
                BinaryOp::Add
            } else if self.parser.consume_char('-') {
                BinaryOp::Sub
            } else {
                break;
            };
            self.descend()?;
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_ws();
            let op = if self.parser.consume_char('*') {
                BinaryOp::Mul
            } else if self.parser.consume_char('/') {
                BinaryOp::Div
            } else if self.parser.consume_char('%') {
                BinaryOp::Rem
            } else {
                break;
            };
            self.descend()?;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.skip_ws();
        let op = if self.parser.peek_str("!=") {
            None
        } else if self.parser.consume_char('!') {
            Some(UnaryOp::Not)
        } else if self.parser.consume_char('-') {
            Some(UnaryOp::Neg)
        } else if self.parser.consume_char('+') {
            Some(UnaryOp::Plus)
        } else if self.parser.consume_keyword("typeof") {
            Some(UnaryOp::TypeOf)
        } else {
            None
        };
        match op {
            Some(op) => {
                self.descend()?;
                let operand = self.parse_unary()?;
                self.depth -= 1;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut node = self.parse_primary()?;
        loop {
            self.skip_ws();
            let optional = self.at_optional_chain();
            if optional {
                self.parser.consume_str("?.");
                self.skip_ws();
            }
            if self.parser.peek_char().is_some_and(|c| matches!(c, '(' | '[' | '.')) || optional {
                self.descend()?;
            }
            if self.parser.consume_char('(') {
                let args = self.parse_list(')')?;
                node = Expr::Call {
                    callee: Box::new(node),
                    args,
                    optional,
                };
            } else if self.parser.consume_char('[') {
                let index = self.parse_expression()?;
                self.skip_ws();
                self.parser.expect(']')?;
                node = Expr::Member {
                    object: Box::new(node),
                    property: Property::Computed(Box::new(index)),
                    optional,
                };
            } else if optional || self.parser.consume_char('.') {
                self.skip_ws();
                let name = self.parser.parse_identifier()?;
                node = Expr::Member {
                    object: Box::new(node),
                    property: Property::Named(name),
                    optional,
                };
            } else {
                break;
            }
        }
        self.depth = base;
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        self.skip_ws();
        let Some(c) = self.parser.peek_char() else {
            return Err(self.parser.error("unexpected end of input"));
        };
        match c {
            '0'..='9' => Ok(Expr::Num(self.parser.parse_number_literal()?)),
            '.' if self.parser.peek_nth(1).is_some_and(|d| d.is_ascii_digit()) => {
                Ok(Expr::Num(self.parser.parse_number_literal()?))
            }
            '"' | '\'' => Ok(Expr::Str(self.parser.parse_quoted_string()?)),
            '`' => {
                self.parser.consume_char('`');
                Ok(Expr::Template(self.parse_parts(Some('`'))?))
            }
            '(' => {
                self.parser.consume_char('(');
                let inner = self.parse_expression()?;
                self.skip_ws();
                self.parser.expect(')')?;
                Ok(inner)
            }
            '[' => {
                self.parser.consume_char('[');
                Ok(Expr::Array(self.parse_list(']')?))
            }
            '{' => {
                self.parser.consume_char('{');
                self.parse_object()
            }
            c if is_ident_start(c) => {
                let name = self.parser.parse_identifier()?;
                Ok(match name.as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    "null" => Expr::Null,
                    "undefined" => Expr::Undefined,
                    "new" | "function" | "class" | "this" | "await" | "yield" | "delete"
                    | "void" | "var" | "let" | "const" => {
                        return Err(self.parser.error(format!("`{name}` is not supported")));
                    }
                    _ => Expr::Ident(name),
                })
            }
            other => Err(self.parser.error(format!("unexpected token '{other}'"))),
        }
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    fn parse_list(&mut self, close: char) -> Result<Vec<Expr>> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            if self.parser.consume_char(close) {
                return Ok(out);
            }
            out.push(self.parse_expression()?);
            self.skip_ws();
            if self.parser.consume_char(',') {
                continue;
            }
            self.parser.expect(close)?;
            return Ok(out);
        }
    }

    fn parse_object(&mut self) -> Result<Expr> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.parser.consume_char('}') {
                return Ok(Expr::Object(entries));
            }
            let key = match self.parser.peek_char() {
                Some('"') | Some('\'') => self.parser.parse_quoted_string()?,
                Some(d) if d.is_ascii_digit() => {
                    crate::value::format_number(self.parser.parse_number_literal()?)
                }
                _ => self.parser.parse_identifier()?,
            };
            self.skip_ws();
            let value = if self.parser.consume_char(':') {
                self.parse_expression()?
            } else {
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            self.skip_ws();
            if self.parser.consume_char(',') {
                continue;
            }
            self.parser.expect('}')?;
            return Ok(Expr::Object(entries));
        }
    }

    /// `?.` not followed by a digit (`a ?.5 : 1` is a conditional).
    fn at_optional_chain(&self) -> bool {
        self.parser.peek_str("?.") && !self.parser.peek_nth(2).is_some_and(|d| d.is_ascii_digit())
    }

    fn skip_ws(&mut self) {
        self.parser.skip_ws();
    }

    fn eof(&self) -> bool {
        self.parser.eof()
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(t: &Template) -> Vec<String> {
        t.parts
            .iter()
            .map(|p| match p {
                Part::Text(s) => s.clone(),
                Part::Expr(e) => format!("<{}>", e.describe()),
            })
            .collect()
    }

    #[test]
    fn splits_text_and_expressions() {
        let t = parse_template("<p>${ user.name }</p>").unwrap();
        assert_eq!(texts(&t), vec!["<p>", "<user.name>", "</p>"]);
    }

    #[test]
    fn escaped_placeholder_stays_literal() {
        let t = parse_template(r"cost: \${price} C:\path").unwrap();
        assert_eq!(texts(&t), vec![r"cost: ${price} C:\path"]);
    }

    #[test]
    fn braces_inside_nested_literals_do_not_close_expression() {
        let t = parse_template("${ items.map(i => `<li>${ {a: i}.a }</li>`).join('') }!").unwrap();
        assert_eq!(t.parts.len(), 2);
        assert!(matches!(&t.parts[0], Part::Expr(Expr::Call { .. })));
    }

    #[test]
    fn parses_arrow_with_parenthesized_params() {
        let e = parse_expr("(x, i) => x + i").unwrap();
        match e {
            Expr::Arrow { params, .. } => assert_eq!(params, vec!["x", "i"]),
            other => panic!("expected arrow, got {other:?}"),
        }
    }

    #[test]
    fn parenthesized_expression_is_not_an_arrow() {
        assert!(matches!(parse_expr("(a + b) * 2").unwrap(), Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn ternary_versus_optional_chain() {
        assert!(matches!(parse_expr("a ? b : c").unwrap(), Expr::Conditional { .. }));
        assert!(matches!(parse_expr("a?.b").unwrap(), Expr::Member { optional: true, .. }));
        assert!(matches!(parse_expr("a ?.5 : 1").unwrap(), Expr::Conditional { .. }));
        assert!(matches!(parse_expr("a ?? b").unwrap(), Expr::Logical { op: LogicalOp::Nullish, .. }));
    }

    #[test]
    fn unsupported_keywords_fail_to_parse() {
        assert!(parse_expr("new Date()").is_err());
        assert!(parse_template("${ this.x }").is_err());
    }

    #[test]
    fn unterminated_expression_is_a_parse_error() {
        assert!(parse_template("<p>${ name </p>").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let ok_depth = MAX_NESTING / 2;
        assert!(parse_expr(&format!("{}1{}", "(".repeat(ok_depth), ")".repeat(ok_depth))).is_ok());
        assert!(parse_expr(&vec!["a"; 20].join(" + ")).is_ok());
        assert!(parse_expr(&format!("{}a", "!".repeat(20))).is_ok());

        let too_deep = [
            format!("{}1{}", "(".repeat(2000), ")".repeat(2000)),
            format!("{}1{}", "[".repeat(2000), "]".repeat(2000)),
            format!("{}a", "!".repeat(2000)),
            vec!["1"; 2000].join(" + "),
            format!("a{}", ".b".repeat(2000)),
        ];
        for src in &too_deep {
            let err = parse_expr(src).unwrap_err();
            assert!(err.to_string().contains("expression nested too deeply"), "{err}");
        }
    }
}
