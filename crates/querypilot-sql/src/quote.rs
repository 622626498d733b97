//! Identifier and literal quoting.
//!
//! Every config-authored name or value that ends up in SQL goes through one
//! of these functions. Nothing else in the crate concatenates user text into
//! a statement.

/// Words that cannot appear as bare identifiers in a rendered statement.
const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "by", "case", "cast", "create", "date", "default", "delete",
    "desc", "distinct", "drop", "else", "end", "except", "false", "from", "group", "having",
    "in", "insert", "intersect", "interval", "is", "join", "limit", "not", "null", "offset",
    "on", "or", "order", "select", "table", "then", "time", "timestamp", "true", "union",
    "update", "user", "using", "when", "where", "window", "with",
];

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let clean: String = name.chars().filter(|c| *c != '\0').collect();
    format!("\"{}\"", clean.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    let clean: String = value.chars().filter(|c| *c != '\0').collect();
    format!("'{}'", clean.replace('\'', "''"))
}

/// `true` when `name` can be emitted without quotes.
pub fn is_simple_ident(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    !RESERVED.contains(&name.to_ascii_lowercase().as_str())
}

/// Emit `name` bare when that is unambiguous, quoted otherwise.
pub fn render_ident(name: &str) -> String {
    if is_simple_ident(name) {
        name.to_string()
    } else {
        quote_ident(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers_and_doubles_embedded_quotes() {
        assert_eq!(quote_ident("amount"), "\"amount\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn quotes_literals_and_strips_nul() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(quote_literal("a\0b"), "'ab'");
    }

    #[test]
    fn renders_simple_names_bare() {
        assert_eq!(render_ident("orders"), "orders");
        assert_eq!(render_ident("main_table_1"), "main_table_1");
        assert_eq!(render_ident("order"), "\"order\"");
        assert_eq!(render_ident("订单"), "\"订单\"");
        assert_eq!(render_ident("my table"), "\"my table\"");
    }
}
