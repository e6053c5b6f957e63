// src/parser.rs
use crate::errors::{EvalError, Result};

/// Character cursor shared by the template and expression parsers.
pub struct Parser<'a> {
    s: &'a str,
    i: usize,
}

impl<'a> Parser<'a> {
    pub fn new(s: &'a str) -> Self {
        Self { s, i: 0 }
    }

    pub fn pos(&self) -> usize {
        self.i
    }

    /// Rewind to a position previously returned by [`Parser::pos`].
    pub fn reset(&mut self, pos: usize) {
        self.i = pos;
    }

    /// 1-based line and column of the cursor.
    pub fn location(&self) -> (usize, usize) {
        let before = &self.s[..self.i];
        let line = before.matches('\n').count() + 1;
        let col = before
            .rfind('\n')
            .map(|nl| before[nl + 1..].chars().count())
            .unwrap_or_else(|| before.chars().count())
            + 1;
        (line, col)
    }

    pub fn error(&self, msg: impl AsRef<str>) -> EvalError {
        let (line, col) = self.location();
        EvalError::Parse(format!("{} (line {line}, column {col})", msg.as_ref()))
    }

    pub fn parse_identifier(&mut self) -> Result<String> {
        let start = self.i;
        if let Some(c) = self.peek_char() {
            if is_ident_start(c) {
                self.i += c.len_utf8();
            }
        }
        while let Some(c) = self.peek_char() {
            if is_ident_continue(c) {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(self.error("identifier expected"));
        }
        Ok(self.s[start..self.i].to_string())
    }

    pub fn parse_number_literal(&mut self) -> Result<f64> {
        let start = self.i;
        if self.peek_str("0x") || self.peek_str("0X") {
            self.i += 2;
            let digits = self.take_while(|c| c.is_ascii_hexdigit());
            return i64::from_str_radix(digits, 16)
                .map(|v| v as f64)
                .map_err(|_| self.error("bad hex literal"));
        }
        self.take_while(|c| c.is_ascii_digit() || c == '_');
        if self.peek_char() == Some('.') {
            self.i += 1;
            self.take_while(|c| c.is_ascii_digit() || c == '_');
        }
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            self.i += 1;
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.i += 1;
            }
            self.take_while(|c| c.is_ascii_digit());
        }
        let s = self.s[start..self.i].replace('_', "");
        if s.is_empty() || s == "." {
            return Err(self.error("number expected"));
        }
        s.parse::<f64>()
            .map_err(|_| self.error(format!("bad number `{s}`")))
    }

    pub fn parse_quoted_string(&mut self) -> Result<String> {
        let quote = self.peek_char().ok_or_else(|| self.error("string expected"))?;
        if quote != '\'' && quote != '"' {
            return Err(self.error("expected quoted string"));
        }
        self.i += 1;
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.i += c.len_utf8();
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                self.parse_escape(&mut out)?;
            } else if c == '\n' {
                break;
            } else {
                out.push(c);
            }
        }
        Err(self.error("unterminated string"))
    }

    /// Decode the escape sequence following a backslash into `out`.
    pub fn parse_escape(&mut self, out: &mut String) -> Result<()> {
        let Some(nc) = self.peek_char() else {
            return Err(self.error("unterminated escape"));
        };
        self.i += nc.len_utf8();
        match nc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '\n' => {}
            'x' => {
                let code = self.hex_digits(2)?;
                out.push(char::from_u32(code).ok_or_else(|| self.error("bad \\x escape"))?);
            }
            'u' => {
                let code = if self.consume_char('{') {
                    let digits = self.take_while(|c| c.is_ascii_hexdigit());
                    let code = u32::from_str_radix(digits, 16)
                        .map_err(|_| self.error("bad \\u escape"))?;
                    self.expect('}')?;
                    code
                } else {
                    self.hex_digits(4)?
                };
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn hex_digits(&mut self, n: usize) -> Result<u32> {
        let end = self.i + n;
        let digits = self
            .s
            .get(self.i..end)
            .filter(|d| d.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| self.error("bad hex escape"))?;
        self.i = end;
        u32::from_str_radix(digits, 16).map_err(|_| self.error("bad hex escape"))
    }

    pub fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            if pred(c) {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
        &self.s[start..self.i]
    }

    pub fn expect(&mut self, c: char) -> Result<()> {
        if self.consume_char(c) {
            Ok(())
        } else {
            Err(self.error(match self.peek_char() {
                Some(found) => format!("expected '{c}' but found '{found}'"),
                None => format!("expected '{c}' but reached end of input"),
            }))
        }
    }

    pub fn consume_char(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.i += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn consume_str(&mut self, lit: &str) -> bool {
        if self.peek_str(lit) {
            self.i += lit.len();
            true
        } else {
            false
        }
    }

    /// Consume `word` only when it is not the prefix of a longer identifier.
    pub fn consume_keyword(&mut self, word: &str) -> bool {
        if !self.peek_str(word) {
            return false;
        }
        let next = self.s[self.i + word.len()..].chars().next();
        if next.is_some_and(is_ident_continue) {
            return false;
        }
        self.i += word.len();
        true
    }

    pub fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    pub fn peek_nth(&self, n: usize) -> Option<char> {
        self.s[self.i..].chars().nth(n)
    }

    pub fn peek_str(&self, lit: &str) -> bool {
        self.s[self.i..].starts_with(lit)
    }

    pub fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.i >= self.s.len()
    }
}

pub fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

pub fn is_ident_continue(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_numbers() {
        assert_eq!(Parser::new("42").parse_number_literal().unwrap(), 42.0);
        assert_eq!(Parser::new("1.25").parse_number_literal().unwrap(), 1.25);
        assert_eq!(Parser::new("2e3").parse_number_literal().unwrap(), 2000.0);
        assert_eq!(Parser::new("0xff").parse_number_literal().unwrap(), 255.0);
        assert_eq!(Parser::new("1_000").parse_number_literal().unwrap(), 1000.0);
    }

    #[test]
    fn reads_strings_with_escapes() {
        let mut p = Parser::new(r#"'it\'s A\x42\n'"#);
        assert_eq!(p.parse_quoted_string().unwrap(), "it's AB\n");
        assert!(p.eof());
    }

    #[test]
    fn unterminated_string_reports_location() {
        let err = Parser::new("'abc").parse_quoted_string().unwrap_err();
        assert_eq!(
            err,
            EvalError::Parse("unterminated string (line 1, column 5)".into())
        );
    }

    #[test]
    fn keywords_respect_identifier_boundaries() {
        let mut p = Parser::new("truthy");
        assert!(!p.consume_keyword("true"));
        let mut p = Parser::new("true)");
        assert!(p.consume_keyword("true"));
        assert_eq!(p.peek_char(), Some(')'));
    }
}
