//! Module syntax lowering.
//!
//! Rewrites `import`/`export` statements, `import()` and `require()` into
//! calls against the bundle runtime (`require`, `__weft_interop`,
//! `__weft_export`, `__weft_export_star`). Every reference is emitted as
//! [`require_call`] so assembly can find it again. Other syntax passes
//! through untouched.

use super::{require_call, Dependency, DependencyKind, TransformError, TransformMeta};
use super::data::inert_spans;
use super::ModuleKind;
use regex_lite::{Captures, Regex};
use std::sync::OnceLock;

const STEP: &str = "script";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    ImportFrom,
    ImportBare,
    ExportFrom,
    ExportList,
    ExportDefault,
    ExportDecl,
    DynamicImport,
    Require,
}

/// Patterns in priority order. At equal offsets the earlier one wins.
fn patterns() -> &'static [(Pattern, Regex)] {
    static PATTERNS: OnceLock<Vec<(Pattern, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        const STR: &str = r#"(?:"(?P<dq>[^"\n]*)"|'(?P<sq>[^'\n]*)')"#;
        let table = [
            (
                Pattern::ImportFrom,
                format!(r"(?m)^[ \t]*import\s+(?P<clause>[\w$*{{}},\s]+?)\s*from\s*{STR}[ \t]*;?"),
            ),
            (Pattern::ImportBare, format!(r"(?m)^[ \t]*import\s*{STR}[ \t]*;?")),
            (
                Pattern::ExportFrom,
                format!(
                    r"(?m)^[ \t]*export\s*(?P<what>\*(?:\s*as\s+[\w$]+)?|\{{[^}}]*\}})\s*from\s*{STR}[ \t]*;?"
                ),
            ),
            (
                Pattern::ExportList,
                r"(?m)^[ \t]*export\s*\{(?P<list>[^}]*)\}[ \t]*;?".to_string(),
            ),
            (
                Pattern::ExportDefault,
                r"(?m)^[ \t]*export\s+default\s+(?:(?P<kw>async\s+function\s*\*?|function\s*\*?|class)\s+(?P<name>[\w$]+))?"
                    .to_string(),
            ),
            (
                Pattern::ExportDecl,
                r"(?m)^[ \t]*export\s+(?P<kw>async\s+function\s*\*?|function\s*\*?|class|const|let|var)\s+(?P<name>[\w$]+)"
                    .to_string(),
            ),
            (Pattern::DynamicImport, format!(r"\bimport\s*\(\s*{STR}\s*\)")),
            (Pattern::Require, format!(r"\brequire\s*\(\s*{STR}\s*\)")),
        ];
        table
            .into_iter()
            .map(|(kind, src)| (kind, Regex::new(&src).expect("static pattern")))
            .collect()
    })
}

fn statement_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*(?:import|export)\b").expect("static pattern"))
}

/// One rewritten span of the source.
struct Hit {
    start: usize,
    end: usize,
    replacement: String,
}

#[derive(Default)]
struct Lowering {
    meta: TransformMeta,
    /// `(exported name, getter expression)`
    exports: Vec<(String, String)>,
    esm: bool,
    next_binding: usize,
}

impl Lowering {
    fn binding(&mut self) -> String {
        let name = format!("__weft_import_{}", self.next_binding);
        self.next_binding += 1;
        name
    }

    fn export(&mut self, name: &str, expr: String) {
        self.esm = true;
        self.exports.retain(|(n, _)| n != name);
        self.exports.push((name.to_string(), expr));
    }

    fn depend(&mut self, specifier: &str, kind: DependencyKind) -> String {
        self.meta.add_dependency(Dependency::new(specifier, kind));
        require_call(specifier)
    }

    fn rewrite(&mut self, pattern: Pattern, caps: &Captures<'_>) -> Result<String, TransformError> {
        let spec = caps
            .name("dq")
            .or_else(|| caps.name("sq"))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        match pattern {
            Pattern::ImportFrom => {
                self.esm = true;
                let clause = caps.name("clause").map_or("", |m| m.as_str());
                let bindings = parse_import_clause(clause)?;
                let ns = self.binding();
                let call = self.depend(&spec, DependencyKind::Static);
                let mut out = format!("var {ns} = __weft_interop({call});");
                for binding in bindings {
                    let line = match binding {
                        Binding::Default(local) => format!(" var {local} = {ns}.default;"),
                        Binding::Namespace(local) => format!(" var {local} = {ns};"),
                        Binding::Named { imported, local } => {
                            format!(" var {local} = {ns}.{imported};")
                        }
                    };
                    out.push_str(&line);
                }
                Ok(out)
            }
            Pattern::ImportBare => {
                self.esm = true;
                Ok(format!("{};", self.depend(&spec, DependencyKind::Static)))
            }
            Pattern::ExportFrom => {
                let what = caps.name("what").map_or("", |m| m.as_str()).trim();
                let call = self.depend(&spec, DependencyKind::Static);
                if what == "*" {
                    self.esm = true;
                    return Ok(format!("__weft_export_star(exports, {call});"));
                }
                let ns = self.binding();
                if let Some(alias) = what.strip_prefix('*') {
                    let name = alias.trim().trim_start_matches("as").trim();
                    check_identifier(name)?;
                    self.export(name, ns.clone());
                } else {
                    for (local, exported) in parse_export_list(what.trim_matches(|c| c == '{' || c == '}'))? {
                        self.export(&exported, format!("{ns}.{local}"));
                    }
                }
                Ok(format!("var {ns} = __weft_interop({call});"))
            }
            Pattern::ExportList => {
                let list = caps.name("list").map_or("", |m| m.as_str());
                for (local, exported) in parse_export_list(list)? {
                    self.export(&exported, local);
                }
                Ok(String::new())
            }
            Pattern::ExportDefault => match (caps.name("kw"), caps.name("name")) {
                (Some(kw), Some(name)) => {
                    self.export("default", name.as_str().to_string());
                    Ok(format!("{} {}", kw.as_str(), name.as_str()))
                }
                _ => {
                    self.export("default", "__weft_default".to_string());
                    Ok("var __weft_default = ".to_string())
                }
            },
            Pattern::ExportDecl => {
                let kw = caps.name("kw").map_or("", |m| m.as_str());
                let name = caps.name("name").map_or("", |m| m.as_str());
                self.export(name, name.to_string());
                Ok(format!("{kw} {name}"))
            }
            Pattern::DynamicImport => {
                let call = self.depend(&spec, DependencyKind::Dynamic);
                Ok(format!(
                    "Promise.resolve().then(function () {{ return __weft_interop({call}); }})"
                ))
            }
            Pattern::Require => Ok(self.depend(&spec, DependencyKind::Static)),
        }
    }
}

/// Lower module syntax in `source`.
pub(super) fn lower(
    source: &str,
    meta: TransformMeta,
) -> Result<(String, TransformMeta), TransformError> {
    let inert = inert_spans(source);
    let mut hits: Vec<(usize, usize, Pattern, Captures<'_>)> = Vec::new();
    for (priority, (pattern, re)) in patterns().iter().enumerate() {
        for caps in re.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            let text = whole.as_str();
            let start = whole.start() + (text.len() - text.trim_start().len());
            if in_spans(&inert, start) {
                continue;
            }
            hits.push((start, priority, *pattern, caps));
        }
    }
    hits.sort_by_key(|(start, priority, _, _)| (*start, *priority));

    let mut lowering = Lowering {
        meta,
        ..Lowering::default()
    };
    let mut spans: Vec<Hit> = Vec::new();
    let mut covered = 0;
    for (start, _, pattern, caps) in hits {
        if start < covered {
            continue;
        }
        let end = caps.get(0).map_or(start, |m| m.end());
        let replacement = lowering.rewrite(pattern, &caps)?;
        spans.push(Hit {
            start,
            end,
            replacement,
        });
        covered = end;
    }

    // Any module statement left over uses syntax this lowering does not know.
    for m in statement_start().find_iter(source) {
        let at = m.start() + (m.as_str().len() - m.as_str().trim_start().len());
        if !in_spans(&inert, at) && !spans.iter().any(|hit| hit.start == at) {
            let line = source[..at].matches('\n').count() + 1;
            let snippet: String = source[at..].lines().next().unwrap_or("").chars().take(60).collect();
            return Err(TransformError::new(
                STEP,
                format!("unsupported module syntax at line {line}: {snippet}"),
            ));
        }
    }

    let mut out = String::with_capacity(source.len() + 256);
    if lowering.esm {
        out.push_str("__weft_export(exports, {");
        for (i, (name, expr)) in lowering.exports.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!(
                " {}: function () {{ return {}; }}",
                super::js_string(name),
                expr
            ));
        }
        out.push_str(" });\n");
    }

    let mut cursor = 0;
    for hit in &spans {
        out.push_str(&source[cursor..hit.start]);
        out.push_str(&hit.replacement);
        cursor = hit.end;
    }
    out.push_str(&source[cursor..]);

    let mut meta = lowering.meta;
    meta.kind = ModuleKind::Script;
    Ok((out, meta))
}

/// Whether `pos` lies inside one of the sorted, disjoint `spans`.
fn in_spans(spans: &[(usize, usize)], pos: usize) -> bool {
    let i = spans.partition_point(|(start, _)| *start <= pos);
    i > 0 && pos < spans[i - 1].1
}

#[derive(Debug, PartialEq, Eq)]
enum Binding {
    Default(String),
    Namespace(String),
    Named { imported: String, local: String },
}

fn check_identifier(name: &str) -> Result<(), TransformError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if valid {
        Ok(())
    } else {
        Err(TransformError::new(STEP, format!("invalid identifier '{name}'")))
    }
}

/// `a`, `a as b` → `(local, exported)` / `(imported, local)` pairs.
fn parse_as_list(list: &str) -> Result<Vec<(String, String)>, TransformError> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let parts: Vec<&str> = item.split_whitespace().collect();
            let (left, right) = match parts.as_slice() {
                [name] => (*name, *name),
                [left, "as", right] => (*left, *right),
                _ => {
                    return Err(TransformError::new(
                        STEP,
                        format!("cannot parse binding '{item}'"),
                    ))
                }
            };
            check_identifier(left)?;
            check_identifier(right)?;
            Ok((left.to_string(), right.to_string()))
        })
        .collect()
}

fn parse_export_list(list: &str) -> Result<Vec<(String, String)>, TransformError> {
    parse_as_list(list)
}

fn parse_import_clause(clause: &str) -> Result<Vec<Binding>, TransformError> {
    let clause = clause.trim();
    let (head, named) = match clause.find('{') {
        Some(open) => {
            let close = clause
                .rfind('}')
                .filter(|close| *close > open)
                .ok_or_else(|| TransformError::new(STEP, format!("unbalanced braces in '{clause}'")))?;
            (&clause[..open], Some(&clause[open + 1..close]))
        }
        None => (clause, None),
    };

    let mut bindings = Vec::new();
    for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(rest) = part.strip_prefix('*') {
            let local = rest.trim().strip_prefix("as").map(str::trim).ok_or_else(|| {
                TransformError::new(STEP, format!("expected '* as name' in '{clause}'"))
            })?;
            check_identifier(local)?;
            bindings.push(Binding::Namespace(local.to_string()));
        } else {
            check_identifier(part)?;
            bindings.push(Binding::Default(part.to_string()));
        }
    }
    if let Some(named) = named {
        for (imported, local) in parse_as_list(named)? {
            bindings.push(Binding::Named { imported, local });
        }
    }
    Ok(bindings)
}
