//! Quote-aware SQL scanning.
//!
//! Structural checks go through `sqlparser`. Its AST carries no source
//! positions, so the text edits the policy makes (comment stripping, quote
//! normalization, the `LIMIT` rewrite) work on these byte-offset tokens.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Word,
    QuotedIdent,
    Str,
    Number,
    Sym(char),
}

#[derive(Debug, Clone)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl Token<'_> {
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_sym(&self, sym: char) -> bool {
        self.kind == TokenKind::Sym(sym)
    }

    pub fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }

    /// The identifier value with quotes removed.
    pub fn unquoted(&self) -> String {
        match self.kind {
            TokenKind::QuotedIdent if self.text.len() >= 2 => {
                let quote = &self.text[..1];
                let inner = &self.text[1..self.text.len() - 1];
                inner.replace(&format!("{quote}{quote}"), quote)
            }
            _ => self.text.to_string(),
        }
    }
}

/// Index one past the closing quote, or the end for unterminated input.
fn quoted_end(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Replace `-- ...` and `/* ... */` comments with a single space.
pub(crate) fn strip_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let end = quoted_end(&chars, i, c);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                out.push(' ');
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Rewrite `` `name` `` identifiers to `"name"`. Returns the count rewritten.
pub(crate) fn normalize_backticks(sql: &str) -> (String, usize) {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut rewritten = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = quoted_end(&chars, i, c);
                out.extend(&chars[i..end]);
                i = end;
            }
            '`' => {
                let end = quoted_end(&chars, i, '`');
                let inner_end = if end > i + 1 && chars[end - 1] == '`' {
                    end - 1
                } else {
                    end
                };
                let inner: String = chars[i + 1..inner_end].iter().collect();
                out.push_str(&crate::quote::quote_ident(&inner.replace("``", "`")));
                rewritten += 1;
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, rewritten)
}

/// Collapse whitespace runs outside quotes to one space and trim.
pub(crate) fn collapse_whitespace(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut pending_space = false;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if matches!(c, '\'' | '"' | '`') {
            let end = quoted_end(&chars, i, c);
            out.extend(&chars[i..end]);
            i = end;
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

pub(crate) fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut iter = sql.char_indices().peekable();

    while let Some(&(start, c)) = iter.peek() {
        if c.is_whitespace() {
            iter.next();
            continue;
        }

        if matches!(c, '\'' | '"' | '`') {
            iter.next();
            let mut end = sql.len();
            while let Some((idx, ch)) = iter.next() {
                if ch == c {
                    if matches!(iter.peek(), Some(&(_, next)) if next == c) {
                        iter.next();
                        continue;
                    }
                    end = idx + ch.len_utf8();
                    break;
                }
            }
            let kind = if c == '\'' {
                TokenKind::Str
            } else {
                TokenKind::QuotedIdent
            };
            tokens.push(Token {
                kind,
                text: &sql[start..end],
                start,
                end,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c.is_ascii_digit() {
            let numeric = c.is_ascii_digit();
            let mut end = start;
            while let Some(&(idx, ch)) = iter.peek() {
                let ok = if numeric {
                    ch.is_ascii_alphanumeric() || ch == '.' || ch == '_'
                } else {
                    ch.is_alphanumeric() || ch == '_' || ch == '$'
                };
                if !ok {
                    break;
                }
                end = idx + ch.len_utf8();
                iter.next();
            }
            tokens.push(Token {
                kind: if numeric {
                    TokenKind::Number
                } else {
                    TokenKind::Word
                },
                text: &sql[start..end],
                start,
                end,
            });
            continue;
        }

        iter.next();
        let end = start + c.len_utf8();
        tokens.push(Token {
            kind: TokenKind::Sym(c),
            text: &sql[start..end],
            start,
            end,
        });
    }

    tokens
}

/// Apply `edit` to every stretch of `sql` outside single-quoted literals.
pub(crate) fn map_outside_literals(sql: &str, mut edit: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut code_start = 0usize;
    for literal in tokenize(sql).iter().filter(|t| t.kind == TokenKind::Str) {
        out.push_str(&edit(&sql[code_start..literal.start]));
        out.push_str(literal.text);
        code_start = literal.end;
    }
    out.push_str(&edit(&sql[code_start..]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_inside_literals_survive() {
        let s = strip_comments("SELECT '--x' AS a -- trailing\nFROM t /* block */");
        assert_eq!(collapse_whitespace(&s), "SELECT '--x' AS a FROM t");
    }

    #[test]
    fn backticks_become_double_quotes() {
        let (s, n) = normalize_backticks("SELECT `order id` FROM `t` WHERE x = '`'");
        assert_eq!(s, "SELECT \"order id\" FROM \"t\" WHERE x = '`'");
        assert_eq!(n, 2);
    }

    #[test]
    fn whitespace_inside_literals_is_preserved() {
        assert_eq!(
            collapse_whitespace("  SELECT\n\t'a   b'   FROM t  "),
            "SELECT 'a   b' FROM t"
        );
    }

    #[test]
    fn tokenizer_separates_literals_and_identifiers() {
        let toks = tokenize("select \"a;b\", 'x;y' from t;");
        let kinds: Vec<TokenKind> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Word,
                TokenKind::QuotedIdent,
                TokenKind::Sym(','),
                TokenKind::Str,
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Sym(';'),
            ]
        );
        assert_eq!(toks[1].unquoted(), "a;b");
    }

    #[test]
    fn edits_skip_string_literals() {
        let out = map_outside_literals("a - 'a - b' - \"a\"", |code| code.replace('a', "x"));
        assert_eq!(out, "x - 'a - b' - \"x\"");
    }
}
