//! Stylesheet step.
//!
//! Without extraction the stylesheet becomes a script module that appends a
//! `<style>` element. With extraction the CSS is kept and assembly collects
//! it into the chunk's stylesheet file. Either way `url()` references become
//! [`require_call`]s, which assembly replaces with the final URL.

use super::{
    js_string, require_call, Dependency, DependencyKind, ModuleKind, TransformMeta,
};
use regex_lite::Regex;
use std::sync::OnceLock;

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^)"'\s]*))\s*\)"#)
            .expect("static pattern")
    })
}

/// URLs left alone: data URIs, remote and root-relative URLs, fragments.
fn is_external(url: &str) -> bool {
    url.is_empty()
        || url.starts_with("data:")
        || url.starts_with("http:")
        || url.starts_with("https:")
        || url.starts_with("//")
        || url.starts_with('/')
        || url.starts_with('#')
}

/// Module specifier for a stylesheet URL. Query and fragment are dropped.
fn url_specifier(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if let Some(module) = path.strip_prefix('~') {
        module.to_string()
    } else if path.starts_with("./") || path.starts_with("../") {
        path.to_string()
    } else {
        format!("./{path}")
    }
}

enum Piece<'a> {
    Css(&'a str),
    Url(String),
}

fn split_urls<'a>(css: &'a str, meta: &mut TransformMeta) -> Vec<Piece<'a>> {
    let mut pieces = Vec::new();
    let mut cursor = 0;
    for caps in url_pattern().captures_iter(css) {
        let (Some(whole), Some(value)) = (
            caps.get(0),
            caps.name("dq")
                .or_else(|| caps.name("sq"))
                .or_else(|| caps.name("bare")),
        ) else {
            continue;
        };
        let url = value.as_str().trim();
        if is_external(url) {
            continue;
        }
        let specifier = url_specifier(url);
        meta.add_dependency(Dependency::new(&specifier, DependencyKind::Url));
        pieces.push(Piece::Css(&css[cursor..whole.start()]));
        pieces.push(Piece::Url(specifier));
        cursor = whole.end();
    }
    pieces.push(Piece::Css(&css[cursor..]));
    pieces
}

pub(super) fn transform(
    css: &str,
    mut meta: TransformMeta,
    urls: bool,
    extract: bool,
) -> (String, TransformMeta) {
    let pieces = if urls {
        split_urls(css, &mut meta)
    } else {
        vec![Piece::Css(css)]
    };

    if extract {
        let mut out = String::with_capacity(css.len());
        for piece in &pieces {
            match piece {
                Piece::Css(text) => out.push_str(text),
                Piece::Url(spec) => {
                    out.push_str("url(");
                    out.push_str(&require_call(spec));
                    out.push(')');
                }
            }
        }
        meta.kind = ModuleKind::Stylesheet;
        return (out, meta);
    }

    let expr = pieces
        .iter()
        .map(|piece| match piece {
            Piece::Css(text) => js_string(text),
            Piece::Url(spec) => format!("\"url(\" + JSON.stringify({}) + \")\"", require_call(spec)),
        })
        .collect::<Vec<_>>()
        .join(" + ");

    let code = format!(
        "var __weft_css = {expr};\n\
         if (typeof document !== \"undefined\") {{\n  \
           var style = document.createElement(\"style\");\n  \
           style.textContent = __weft_css;\n  \
           document.head.appendChild(style);\n\
         }}\n\
         module.exports = __weft_css;\n"
    );
    meta.kind = ModuleKind::Script;
    (code, meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSS: &str = "body { background: url(\"img/bg.png?v=2\"); }\n\
                       .logo { background: url(logo.svg); }\n\
                       .ext { background: url(https://cdn.example/x.png); }\n\
                       .inline { background: url('data:image/png;base64,AAAA'); }\n";

    #[test]
    fn test_urls_become_dependencies() {
        let (code, meta) = transform(CSS, TransformMeta::default(), true, false);
        assert_eq!(meta.kind, ModuleKind::Script);
        let specs: Vec<_> = meta.dependencies.iter().map(|d| d.specifier.as_str()).collect();
        assert_eq!(specs, vec!["./img/bg.png", "./logo.svg"]);
        assert!(meta.dependencies.iter().all(|d| d.kind == DependencyKind::Url));
        assert!(code.contains(r#"JSON.stringify(require("./img/bg.png"))"#));
        assert!(code.contains("https://cdn.example/x.png"));
        assert!(code.contains("document.head.appendChild(style)"));
    }

    #[test]
    fn test_urls_disabled() {
        let (code, meta) = transform(CSS, TransformMeta::default(), false, false);
        assert!(meta.dependencies.is_empty());
        assert!(!code.contains("require("));
    }

    #[test]
    fn test_extract_keeps_css() {
        let (code, meta) = transform(CSS, TransformMeta::default(), true, true);
        assert_eq!(meta.kind, ModuleKind::Stylesheet);
        assert!(code.starts_with("body { background: url(require(\"./img/bg.png\")); }"));
        assert!(code.contains("url(require(\"./logo.svg\"))"));
        assert!(code.contains("url('data:image/png;base64,AAAA')"));
    }

    #[test]
    fn test_url_specifier() {
        assert_eq!(url_specifier("a.png"), "./a.png");
        assert_eq!(url_specifier("../a.png#frag"), "../a.png");
        assert_eq!(url_specifier("~pkg/a.woff"), "pkg/a.woff");
    }
}
