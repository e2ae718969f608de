//! Data steps: `json`, `text` and `define`.

use super::{js_string, ModuleKind, TransformError, TransformMeta};

pub(super) fn json(
    source: &str,
    mut meta: TransformMeta,
) -> Result<(String, TransformMeta), TransformError> {
    serde_json::from_str::<serde_json::Value>(source).map_err(|e| {
        TransformError::new(
            "json",
            format!("invalid JSON at line {}, column {}: {e}", e.line(), e.column()),
        )
    })?;
    meta.kind = ModuleKind::Script;
    Ok((format!("module.exports = {};\n", source.trim()), meta))
}

pub(super) fn text(source: &str, mut meta: TransformMeta) -> (String, TransformMeta) {
    meta.kind = ModuleKind::Script;
    (format!("module.exports = {};\n", js_string(source)), meta)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Replace each `define` key where it appears as a whole identifier path.
///
/// String literals and comments are copied verbatim. `table` must be ordered
/// longest key first so `process.env.NODE_ENV` wins over `process.env`.
pub(super) fn define(source: &str, table: &[(String, String)]) -> String {
    if table.is_empty() {
        return source.to_string();
    }

    let mut out = String::with_capacity(source.len());
    let mut prev: Option<char> = None;
    let mut rest = source;

    while let Some(c) = rest.chars().next() {
        let skip = inert_len(rest, c);
        if skip > 0 {
            out.push_str(&rest[..skip]);
            prev = rest[..skip].chars().last();
            rest = &rest[skip..];
            continue;
        }

        let at_boundary = !prev.is_some_and(|p| is_ident_char(p) || p == '.');
        let replaced = at_boundary
            .then(|| {
                table.iter().find(|(key, _)| {
                    rest.starts_with(key.as_str())
                        && !rest[key.len()..].chars().next().is_some_and(is_ident_char)
                })
            })
            .flatten();

        if let Some((key, value)) = replaced {
            out.push_str(value);
            prev = key.chars().last();
            rest = &rest[key.len()..];
        } else {
            out.push(c);
            prev = Some(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

/// Byte length of the string literal or comment starting at `rest`, whose
/// first char is `c`. Zero when `rest` starts with code.
fn inert_len(rest: &str, c: char) -> usize {
    match c {
        '"' | '\'' | '`' => quoted_len(rest, c),
        '/' if rest.starts_with("//") => rest.find('\n').unwrap_or(rest.len()),
        '/' if rest.starts_with("/*") => rest.find("*/").map_or(rest.len(), |i| i + 2),
        _ => 0,
    }
}

/// Byte ranges of string literals and comments in `source`, in order.
pub(super) fn inert_spans(source: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut at = 0;
    while let Some(c) = source[at..].chars().next() {
        match inert_len(&source[at..], c) {
            0 => at += c.len_utf8(),
            len => {
                spans.push((at, at + len));
                at += len;
            }
        }
    }
    spans
}

/// Byte length of the string literal at the start of `s`, quotes included.
fn quoted_len(s: &str, quote: char) -> usize {
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return i + c.len_utf8();
        } else if c == '\n' && quote != '`' {
            return i;
        }
    }
    s.len()
}
