//! Chunk rendering.
//!
//! A chunk file is one IIFE: the runtime helpers, a table of module
//! factories keyed by module id, and a call that requires the entry. The
//! factory table is merged into `globalThis.__weft_modules`, so several
//! chunks on one page share modules and their evaluated exports. An entry
//! that imports other entries waits until their chunks have registered.

use super::chunks::Chunk;
use super::graph::{ModuleGraph, ModuleId};
use super::transform::{js_string, require_call, ModuleKind};
use rayon::prelude::*;
use rustc_hash::FxHashMap as HashMap;

/// Rendered contents of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCode {
    pub js: String,
    /// Extracted stylesheets of the chunk, in module order.
    pub css: Option<String>,
}

const RUNTIME: &str = r#"  var __weft_modules = (globalThis.__weft_modules = globalThis.__weft_modules || {});
  var __weft_cache = (globalThis.__weft_cache = globalThis.__weft_cache || {});
  var __weft_waiting = (globalThis.__weft_waiting = globalThis.__weft_waiting || []);

  function __weft_require(id) {
    var cached = __weft_cache[id];
    if (cached) return cached.exports;
    var def = __weft_modules[id];
    if (!def) throw new Error("Cannot find module '" + id + "'");
    var module = (__weft_cache[id] = { exports: {} });
    def[0].call(module.exports, module, module.exports, function (spec) {
      var target = def[1][spec];
      if (target === undefined) {
        throw new Error("Cannot find module '" + spec + "' from '" + id + "'");
      }
      return __weft_require(target);
    });
    return module.exports;
  }

  function __weft_start(id, needs) {
    __weft_waiting.push([id, needs]);
    var i = 0;
    while (i < __weft_waiting.length) {
      var next = __weft_waiting[i];
      var ready = next[1].every(function (n) { return n in __weft_modules; });
      if (ready) {
        __weft_waiting.splice(i, 1);
        __weft_require(next[0]);
      } else {
        i++;
      }
    }
  }

  function __weft_interop(m) {
    if (m && m.__esModule) return m;
    var ns = {};
    if (m !== null && (typeof m === "object" || typeof m === "function")) {
      for (var k in m) ns[k] = m[k];
    }
    ns.default = m;
    return ns;
  }

  function __weft_export(exports, getters) {
    Object.defineProperty(exports, "__esModule", { value: true });
    for (var name in getters) {
      Object.defineProperty(exports, name, { enumerable: true, get: getters[name] });
    }
  }

  function __weft_export_star(exports, m) {
    Object.keys(m).forEach(function (k) {
      if (k === "default" || Object.prototype.hasOwnProperty.call(exports, k)) return;
      Object.defineProperty(exports, k, {
        enumerable: true,
        get: function () { return m[k]; }
      });
    });
  }
"#;

/// Render `chunk`.
///
/// `urls` maps every asset module reachable from the chunk to the URL that
/// replaces references to it (inline `data:` URI or emitted file URL).
#[must_use]
pub fn render_chunk(
    graph: &ModuleGraph,
    chunk: &Chunk,
    urls: &HashMap<ModuleId, String>,
) -> ChunkCode {
    let factories: Vec<Option<String>> = chunk
        .modules
        .par_iter()
        .map(|&id| render_factory(graph, id, urls))
        .collect();

    let mut js = String::with_capacity(RUNTIME.len() + 1024);
    js.push_str("(function () {\n");
    js.push_str(RUNTIME);
    js.push_str("\n  var defs = {\n");
    let mut first = true;
    for factory in factories.into_iter().flatten() {
        if !first {
            js.push_str(",\n");
        }
        first = false;
        js.push_str(&factory);
    }
    js.push_str("\n  };\n");
    js.push_str("  for (var id in defs) if (!(id in __weft_modules)) __weft_modules[id] = defs[id];\n");

    if let Some(entry) = graph.get(chunk.entry) {
        if entry.kind == ModuleKind::Script {
            // Only script entries are registered at runtime.
            let needs: Vec<String> = chunk
                .requires
                .iter()
                .filter_map(|&id| graph.get(id))
                .filter(|m| m.kind == ModuleKind::Script)
                .map(|m| js_string(&m.key))
                .collect();
            js.push_str(&format!(
                "  __weft_start({}, [{}]);\n",
                js_string(&entry.key),
                needs.join(", ")
            ));
        }
    }
    js.push_str("})();\n");

    let stylesheets: Vec<String> = chunk
        .modules
        .iter()
        .filter_map(|&id| render_stylesheet(graph, id, urls))
        .collect();
    let css = (!stylesheets.is_empty()).then(|| stylesheets.concat());

    ChunkCode { js, css }
}

/// Text that replaces a reference to `target`; `None` keeps the runtime require.
fn substitution(
    graph: &ModuleGraph,
    target: ModuleId,
    urls: &HashMap<ModuleId, String>,
    in_stylesheet: bool,
) -> Option<String> {
    let record = graph.get(target)?;
    match record.kind {
        ModuleKind::Asset { .. } => urls.get(&target).map(|url| js_string(url)),
        ModuleKind::Stylesheet if in_stylesheet => Some("\"\"".to_string()),
        ModuleKind::Stylesheet => Some("({})".to_string()),
        ModuleKind::Script if in_stylesheet => Some("\"\"".to_string()),
        ModuleKind::Script => None,
    }
}

fn render_factory(
    graph: &ModuleGraph,
    id: ModuleId,
    urls: &HashMap<ModuleId, String>,
) -> Option<String> {
    let record = graph.get(id)?;
    if record.kind != ModuleKind::Script {
        return None;
    }

    let mut code = record.code.clone();
    let mut deps = Vec::new();
    for (dep, target) in graph.dependencies(id) {
        let Some(target) = target else { continue };
        match substitution(graph, target, urls, false) {
            Some(text) => code = code.replace(&require_call(&dep.specifier), &text),
            None => {
                if let Some(target) = graph.get(target) {
                    deps.push(format!(
                        "{}: {}",
                        js_string(&dep.specifier),
                        js_string(&target.key)
                    ));
                }
            }
        }
    }

    Some(format!(
        "    {}: [function (module, exports, require) {{\n{}\n}}, {{ {} }}]",
        js_string(&record.key),
        code.trim_end(),
        deps.join(", ")
    ))
}

fn render_stylesheet(
    graph: &ModuleGraph,
    id: ModuleId,
    urls: &HashMap<ModuleId, String>,
) -> Option<String> {
    let record = graph.get(id)?;
    if record.kind != ModuleKind::Stylesheet {
        return None;
    }

    let mut css = record.code.clone();
    for (dep, target) in graph.dependencies(id) {
        let text = target
            .and_then(|t| substitution(graph, t, urls, true))
            .unwrap_or_else(|| "\"\"".to_string());
        css = css.replace(&require_call(&dep.specifier), &text);
    }
    Some(format!("/* {} */\n{}\n", record.key, css.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::chunks::ChunkPlan;
    use crate::bundler::graph::GraphBuilder;
    use crate::bundler::resolve::Resolver;
    use crate::bundler::transform::{TransformRegistry, TransformStep};
    use crate::bundler::CancelToken;
    use crate::config::{default_rules, RuleConfig, ResolveConfig};
    use std::fs;
    use tempfile::tempdir;

    fn build(files: &[(&str, &str)], rules: Vec<RuleConfig>) -> ModuleGraph {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        for (name, content) in files {
            fs::write(root.join(name), content).unwrap();
        }
        let resolver = Resolver::new(&ResolveConfig::default(), &root);
        let registry = TransformRegistry::from_rules(&rules).unwrap();
        let cancel = CancelToken::new();
        let builder = GraphBuilder {
            root: &root,
            resolver: &resolver,
            registry: &registry,
            define: &[],
            cancel: &cancel,
            cache: None,
        };
        let entries = [("main".to_string(), "./main.js".to_string())]
            .into_iter()
            .collect();
        builder.build(&entries).unwrap().graph
    }

    #[test]
    fn test_factories_and_entry_call() {
        let graph = build(
            &[
                ("main.js", "import { n } from './num';\nconsole.log(n);\n"),
                ("num.js", "export const n = 1;\n"),
            ],
            default_rules(),
        );
        let plan = ChunkPlan::per_entry(&graph);
        let code = render_chunk(&graph, &plan.chunks()[0], &HashMap::default());

        assert!(code.css.is_none());
        assert!(code.js.contains(r#""num.js": [function (module, exports, require) {"#));
        assert!(code.js.contains(r#"{ "./num": "num.js" }]"#));
        assert!(code.js.ends_with("  __weft_start(\"main.js\", []);\n})();\n"));
        let num_at = code.js.find(r#""num.js": ["#).unwrap();
        let main_at = code.js.find(r#""main.js": ["#).unwrap();
        assert!(num_at < main_at);
    }

    #[test]
    fn test_asset_references_become_literals() {
        let graph = build(
            &[
                ("main.js", "import logo from './logo.png';\nimport './app.css';\n"),
                ("logo.png", "\u{89}PNG"),
                ("app.css", ".a { background: url(logo.png); }\n"),
            ],
            vec![
                RuleConfig::new(r"\.css$", vec![TransformStep::Style { urls: true, extract: true }]),
                RuleConfig::new(r"\.js$", vec![TransformStep::Script]),
                RuleConfig::new(r"\.png$", vec![TransformStep::Asset { inline: true }]),
            ],
        );
        let logo = graph.iter().find(|(_, m)| m.key == "logo.png").unwrap().0;
        let mut urls = HashMap::default();
        urls.insert(logo, "static/media/logo.png".to_string());

        let plan = ChunkPlan::per_entry(&graph);
        let code = render_chunk(&graph, &plan.chunks()[0], &urls);

        assert!(code
            .js
            .contains(r#"__weft_interop("static/media/logo.png")"#));
        assert!(code.js.contains("({});"));
        assert!(!code.js.contains(r#""logo.png": ["#));
        assert_eq!(
            code.css.as_deref(),
            Some("/* app.css */\n.a { background: url(\"static/media/logo.png\"); }\n")
        );
    }
}
