//! SQL utility functions

/// Quote an SQL identifier, doubling embedded double quotes.
///
/// # Example
///
/// ```
/// use geofilter::utils::sql::quote_ident;
///
/// assert_eq!(quote_ident("status"), "\"status\"");
/// assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
///
/// ```
/// use geofilter::utils::sql::quote_literal;
///
/// assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
/// ```
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Schema-qualified relation name. An empty schema yields the bare table.
pub fn qualified_table(schema: &str, table: &str) -> String {
    if schema.is_empty() {
        quote_ident(table)
    } else {
        format!("{}.{}", quote_ident(schema), quote_ident(table))
    }
}

/// Render a distance as an SQL numeric literal with at most `decimals` places.
///
/// Trailing zeros are trimmed and exponent notation is never produced, so the
/// output is accepted by every supported dialect.
pub fn numeric_literal(value: f64, decimals: usize) -> String {
    let rendered = format!("{:.*}", decimals, value);
    let trimmed = if rendered.contains('.') {
        rendered.trim_end_matches('0').trim_end_matches('.')
    } else {
        rendered.as_str()
    };
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_plain() {
        assert_eq!(quote_ident("geom"), "\"geom\"");
    }

    #[test]
    fn test_quote_ident_embedded_quote() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn test_qualified_table() {
        assert_eq!(qualified_table("public", "roads"), "\"public\".\"roads\"");
        assert_eq!(qualified_table("", "roads"), "\"roads\"");
    }

    #[test]
    fn test_numeric_literal() {
        assert_eq!(numeric_literal(50.0, 6), "50");
        assert_eq!(numeric_literal(12.5, 6), "12.5");
        assert_eq!(numeric_literal(0.1234567, 6), "0.123457");
        assert_eq!(numeric_literal(-0.0000001, 6), "0");
        assert_eq!(numeric_literal(-3.25, 2), "-3.25");
    }
}
