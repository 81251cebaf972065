//! User expression checks and field qualification
//!
//! Expressions are passed through to the backend verbatim. The lexer here only
//! understands enough SQL to reject obviously broken text (unbalanced quotes
//! or parentheses, dangling operators) and to find double-quoted field
//! references.

use crate::domain::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    /// `'text'`
    Literal,
    /// `"field"`
    QuotedIdent,
    /// Bare word: keyword, function name, unquoted field or number
    Word,
    /// Operator that needs an operand on both sides
    Binary,
    /// Operator that may also be prefix (`-`, `+`, `NOT`)
    Prefix,
    LParen,
    RParen,
    Comma,
    Dot,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

const BINARY_WORDS: &[&str] = &[
    "AND", "OR", "LIKE", "ILIKE", "IN", "IS", "BETWEEN", "GLOB", "REGEXP",
];

fn lex(text: &str) -> Result<Vec<Token>, EngineError> {
    let bytes: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let end_of = |idx: usize| bytes.get(idx).map(|(b, _)| *b).unwrap_or(text.len());

    while i < bytes.len() {
        let (start, c) = bytes[i];
        let kind = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                loop {
                    match bytes.get(i) {
                        Some((_, ch)) if *ch == quote => {
                            if bytes.get(i + 1).map(|(_, n)| *n) == Some(quote) {
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(_) => i += 1,
                        None => {
                            return Err(EngineError::syntax(format!(
                                "unterminated {} starting at offset {}",
                                if quote == '\'' { "string literal" } else { "quoted identifier" },
                                start
                            )));
                        }
                    }
                }
                tokens.push(Token {
                    kind: if quote == '\'' { TokenKind::Literal } else { TokenKind::QuotedIdent },
                    start,
                    end: end_of(i),
                });
                continue;
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' if !bytes.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit()) => TokenKind::Dot,
            '-' | '+' => TokenKind::Prefix,
            '=' | '*' | '/' | '%' => TokenKind::Binary,
            '<' | '>' | '!' | '|' => {
                let next = bytes.get(i + 1).map(|(_, n)| *n);
                if matches!((c, next), ('<', Some('=' | '>')) | ('>', Some('=')) | ('!', Some('=')) | ('|', Some('|'))) {
                    i += 1;
                } else if c == '!' || c == '|' {
                    return Err(EngineError::syntax(format!(
                        "unexpected '{}' at offset {}",
                        c, start
                    )));
                }
                TokenKind::Binary
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                while i < bytes.len() && {
                    let ch = bytes[i].1;
                    ch.is_alphanumeric() || ch == '_' || ch == '.'
                } {
                    i += 1;
                }
                let word = &text[start..end_of(i)];
                let upper = word.to_ascii_uppercase();
                let kind = if BINARY_WORDS.contains(&upper.as_str()) {
                    TokenKind::Binary
                } else if upper == "NOT" {
                    TokenKind::Prefix
                } else {
                    TokenKind::Word
                };
                tokens.push(Token {
                    kind,
                    start,
                    end: end_of(i),
                });
                continue;
            }
            other => {
                return Err(EngineError::syntax(format!(
                    "unexpected character '{}' at offset {}",
                    other, start
                )));
            }
        };
        i += 1;
        tokens.push(Token {
            kind,
            start,
            end: end_of(i),
        });
    }

    Ok(tokens)
}

fn is_operator(kind: TokenKind) -> bool {
    matches!(kind, TokenKind::Binary | TokenKind::Prefix)
}

/// Reject expressions that cannot be valid SQL boolean expressions
pub fn check_syntax(text: &str) -> Result<(), EngineError> {
    let tokens = lex(text)?;
    if tokens.is_empty() {
        return Err(EngineError::syntax("empty expression"));
    }

    let mut depth: i32 = 0;
    let mut prev: Option<TokenKind> = None;
    for token in &tokens {
        let snippet = &text[token.start..token.end];
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(EngineError::syntax(format!(
                        "unbalanced ')' at offset {}",
                        token.start
                    )));
                }
                if prev.is_some_and(is_operator) {
                    return Err(EngineError::syntax(format!(
                        "dangling operator before ')' at offset {}",
                        token.start
                    )));
                }
            }
            TokenKind::Binary => {
                let leading = match prev {
                    None => true,
                    Some(TokenKind::LParen | TokenKind::Comma | TokenKind::Binary) => true,
                    _ => false,
                };
                if leading {
                    return Err(EngineError::syntax(format!(
                        "operator '{}' is missing its left operand",
                        snippet
                    )));
                }
            }
            TokenKind::Comma if prev.is_some_and(is_operator) => {
                return Err(EngineError::syntax(format!(
                    "dangling operator before ',' at offset {}",
                    token.start
                )));
            }
            _ => {}
        }
        prev = Some(token.kind);
    }

    if depth != 0 {
        return Err(EngineError::syntax("unbalanced parentheses"));
    }
    if let Some(last) = tokens.last()
        && is_operator(last.kind)
    {
        return Err(EngineError::syntax(format!(
            "expression ends with operator '{}'",
            &text[last.start..last.end]
        )));
    }
    Ok(())
}

/// Prefix bare `"field"` references with `relation`.
///
/// References already qualified (`"t"."field"`) and everything inside string
/// literals are left alone.
pub fn qualify_fields(text: &str, relation: &str) -> Result<String, EngineError> {
    let tokens = lex(text)?;
    let mut out = String::with_capacity(text.len() + relation.len() * 2);
    let mut cursor = 0;

    for (idx, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::QuotedIdent {
            continue;
        }
        let after_dot = idx > 0 && tokens[idx - 1].kind == TokenKind::Dot;
        let before_dot = tokens.get(idx + 1).is_some_and(|t| t.kind == TokenKind::Dot);
        if after_dot || before_dot {
            continue;
        }
        out.push_str(&text[cursor..token.start]);
        out.push_str(relation);
        out.push('.');
        out.push_str(&text[token.start..token.end]);
        cursor = token.end;
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_expressions() {
        for expr in [
            "\"status\" = 'active'",
            "\"a\" >= 1 AND (\"b\" <> 'x' OR \"c\" IS NOT NULL)",
            "\"name\" LIKE 'O''Brien%'",
            "\"id\" NOT IN (1, 2, 3)",
            "-\"depth\" < -2.5",
            "lower(\"name\") = 'x'",
            "\"a\" || \"b\" = 'ab'",
        ] {
            assert!(check_syntax(expr).is_ok(), "{expr}");
        }
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in [
            "",
            "   ",
            "\"status\" = 'active",
            "\"status = 1",
            "(\"a\" = 1",
            "\"a\" = 1)",
            "\"a\" =",
            "AND \"a\" = 1",
            "\"a\" = 1 AND",
            "\"a\" = = 1",
            "(\"a\" = 1 OR) ",
            "\"a\" ! 1",
        ] {
            assert!(check_syntax(expr).is_err(), "{expr}");
        }
    }

    #[test]
    fn test_qualify_bare_fields() {
        let out = qualify_fields("\"status\" = 'act\"ive' AND \"t\".\"x\" > 1", "\"public\".\"roads\"")
            .unwrap();
        assert_eq!(
            out,
            "\"public\".\"roads\".\"status\" = 'act\"ive' AND \"t\".\"x\" > 1"
        );
    }

    #[test]
    fn test_qualify_leaves_operators() {
        let out = qualify_fields("\"a\"+\"b\"<>3", "\"r\"").unwrap();
        assert_eq!(out, "\"r\".\"a\"+\"r\".\"b\"<>3");
    }
}
