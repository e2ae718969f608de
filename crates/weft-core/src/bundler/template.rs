//! Output file name templates.
//!
//! Placeholders: `[name]`, `[ext]` (no leading dot), `[hash]`, `[hash:N]`,
//! `[contenthash]`, `[contenthash:N]`. `[hash]` and `[contenthash]` both refer
//! to the digest of the file being named.

/// Length of `[hash]` without an explicit length.
pub const DEFAULT_HASH_LEN: usize = 20;

/// Values substituted into a template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub name: &'a str,
    pub ext: &'a str,
    /// Full hex digest of the content.
    pub hash: &'a str,
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Literal(&'a str),
    Name,
    Ext,
    Hash(usize),
}

fn tokenize(template: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('[') {
        if open > 0 {
            tokens.push(Token::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after
            .find(']')
            .ok_or_else(|| "unterminated '[' placeholder".to_string())?;
        tokens.push(placeholder(&after[..close])?);
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Literal(rest));
    }
    Ok(tokens)
}

fn placeholder(inner: &str) -> Result<Token<'static>, String> {
    let (key, len) = match inner.split_once(':') {
        Some((key, len)) => {
            let len: usize = len
                .parse()
                .map_err(|_| format!("invalid hash length in [{inner}]"))?;
            if len == 0 || len > 64 {
                return Err(format!("hash length in [{inner}] must be between 1 and 64"));
            }
            (key, Some(len))
        }
        None => (inner, None),
    };

    match (key, len) {
        ("name", None) => Ok(Token::Name),
        ("ext", None) => Ok(Token::Ext),
        ("hash" | "contenthash", len) => Ok(Token::Hash(len.unwrap_or(DEFAULT_HASH_LEN))),
        _ => Err(format!("unknown placeholder [{inner}]")),
    }
}

/// Check a template without rendering it.
///
/// Fixed names such as `bundle.js` are allowed; two files rendering to the
/// same name are caught when outputs are collected.
pub fn validate(template: &str) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("template is empty".to_string());
    }
    tokenize(template)?;
    if template.starts_with('/') || template.split('/').any(|seg| seg == "..") {
        return Err("template must stay inside the output directory".to_string());
    }
    Ok(())
}

/// Render a template.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> Result<String, String> {
    let mut out = String::with_capacity(template.len() + 16);
    for token in tokenize(template)? {
        match token {
            Token::Literal(s) => out.push_str(s),
            Token::Name => out.push_str(vars.name),
            Token::Ext => out.push_str(vars.ext),
            Token::Hash(len) => out.push_str(&vars.hash[..len.min(vars.hash.len())]),
        }
    }
    Ok(out)
}
