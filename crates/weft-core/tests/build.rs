//! End-to-end builds against the public API.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use weft_core::bundler::{DependencyKind, Resolver, TransformRegistry, TransformStep};
use weft_core::config::{ResolveConfig, RuleConfig};
use weft_core::{Bundler, Config, Mode};
use weft_util::fs::list_files;

fn project(files: &[(&str, &[u8])]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn text(bundler: &Bundler, file: &str) -> String {
    fs::read_to_string(bundler.config().out_dir().join(file)).unwrap()
}

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    list_files(dir)
        .into_iter()
        .map(|f| {
            let bytes = fs::read(dir.join(&f)).unwrap();
            (f, bytes)
        })
        .collect()
}

#[test]
fn test_shared_module_is_bundled_once_before_importers() {
    let dir = project(&[
        ("src/main.js", b"import './a';\nimport './b';\n"),
        ("src/a.js", b"import { c } from './c';\nexport const a = c + 1;\n"),
        ("src/b.js", b"import { c } from './c';\nexport const b = c + 2;\n"),
        ("src/c.js", b"export const c = 1;\n"),
    ]);
    let bundler = Bundler::new(Config::new(dir.path()).with_entry("main", "./src/main.js")).unwrap();
    let result = bundler.build_and_write().unwrap();

    assert_eq!(result.graph.len(), 4);
    let js = text(&bundler, "main.js");
    assert_eq!(js.matches("\"src/c.js\": [function").count(), 1);

    let c = js.find("\"src/c.js\": [function").unwrap();
    let a = js.find("\"src/a.js\": [function").unwrap();
    let b = js.find("\"src/b.js\": [function").unwrap();
    let main = js.find("\"src/main.js\": [function").unwrap();
    assert!(c < a && c < b);
    assert!(a < b && b < main);
}

#[test]
fn test_small_asset_inlined_large_asset_emitted() {
    let small: Vec<u8> = (0..2_048u32).map(|i| (i % 256) as u8).collect();
    let large: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
    let dir = project(&[
        (
            "src/main.js",
            b"import small from './small.png';\nimport large from './large.png';\nconsole.log(small, large);\n",
        ),
        ("src/small.png", &small),
        ("src/large.png", &large),
    ]);
    let bundler = Bundler::new(
        Config::new(dir.path())
            .with_entry("main", "./src/main.js")
            .with_inline_limit(10_000),
    )
    .unwrap();
    let result = bundler.build_and_write().unwrap();

    let js = text(&bundler, "main.js");
    assert!(js.contains("data:image/png;base64,"));

    let hash = weft_util::hash::blake3_bytes(&large);
    let large_file = format!("static/media/large.{}.png", &hash[..8]);
    assert!(js.contains(&format!("\"{large_file}\"")));

    let written = list_files(&bundler.config().out_dir());
    assert!(written.contains(&large_file));
    assert!(!written.iter().any(|f| f.contains("small")));
    assert_eq!(result.manifest.assets.get("src/large.png"), Some(&large_file));
    assert!(result.manifest.assets.get("src/small.png").is_none());
}

#[test]
fn test_missing_module_aborts_and_keeps_previous_output() {
    let dir = project(&[
        ("src/main.js", b"import './missing';\n"),
        ("dist/main.js", b"previous build"),
    ]);
    let bundler = Bundler::new(Config::new(dir.path()).with_entry("main", "./src/main.js")).unwrap();
    let before = snapshot(&bundler.config().out_dir());

    let err = bundler.build_and_write().unwrap_err();
    assert_eq!(err.code(), "BUILD_RESOLUTION_ERROR");
    assert_eq!(err.chain().unwrap().to_string(), "main → ./missing");
    assert!(err.to_string().contains("./missing"));

    assert_eq!(snapshot(&bundler.config().out_dir()), before);
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn test_unchanged_inputs_give_identical_output() {
    let dir = project(&[
        ("src/main.js", b"import './style.css';\nimport { x } from './x';\nconsole.log(x);\n"),
        ("src/x.js", b"export const x = 'x';\n"),
        ("src/style.css", b"body { color: red; }\n"),
    ]);
    let bundler = Bundler::new(
        Config::new(dir.path())
            .with_entry("main", "./src/main.js")
            .with_mode(Mode::Production),
    )
    .unwrap();

    bundler.build_and_write().unwrap();
    let first = snapshot(&bundler.config().out_dir());
    bundler.build_and_write().unwrap();
    let second = snapshot(&bundler.config().out_dir());
    assert_eq!(first, second);
}

#[test]
fn test_leaf_change_only_touches_chunks_that_include_it() {
    let dir = project(&[
        ("src/main.js", b"import { a } from './a';\nconsole.log(a);\n"),
        ("src/a.js", b"export const a = 1;\n"),
        ("src/admin.js", b"import { b } from './b';\nconsole.log(b);\n"),
        ("src/b.js", b"export const b = 1;\n"),
    ]);
    let bundler = Bundler::new(
        Config::new(dir.path())
            .with_entry("main", "./src/main.js")
            .with_entry("admin", "./src/admin.js")
            .with_mode(Mode::Production),
    )
    .unwrap();

    let before = bundler.build().unwrap();
    fs::write(dir.path().join("src/b.js"), "export const b = 2;\n").unwrap();
    let after = bundler.build().unwrap();

    assert_eq!(before.chunk_file("main"), after.chunk_file("main"));
    assert_ne!(before.chunk_file("admin"), after.chunk_file("admin"));

    let main = before.chunk_file("main").unwrap();
    assert_eq!(
        before.outputs.get(main).unwrap().bytes,
        after.outputs.get(main).unwrap().bytes
    );
}

#[test]
fn test_resolution_is_idempotent() {
    let dir = project(&[("src/lib/index.js", b""), ("src/app.js", b"")]);
    let root = dunce::canonicalize(dir.path()).unwrap();
    let resolver = Resolver::new(&ResolveConfig::default(), &root);
    let from = root.join("src");

    let first = resolver.resolve("./lib", &from).unwrap();
    let second = resolver.resolve("./lib", &from).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, root.join("src/lib/index.js"));
}

#[test]
fn test_alias_and_package_lookup() {
    let dir = project(&[
        ("src/main.js", b"import { h } from '@/util/h';\nimport dep from 'dep';\nconsole.log(h, dep);\n"),
        ("src/util/h.js", b"export const h = 1;\n"),
        ("node_modules/dep/package.json", br#"{ "main": "lib/dep.js" }"#),
        ("node_modules/dep/lib/dep.js", b"module.exports = 'dep';\n"),
    ]);
    let mut config = Config::new(dir.path()).with_entry("main", "./src/main.js");
    config.resolve.alias.insert("@".to_string(), "src".to_string());
    let result = Bundler::new(config).unwrap().build().unwrap();

    let keys: Vec<&str> = result.graph.iter().map(|(_, m)| m.key.as_str()).collect();
    assert!(keys.contains(&"src/util/h.js"));
    assert!(keys.contains(&"node_modules/dep/lib/dep.js"));
}

#[test]
fn test_rule_order_decides_the_chain() {
    let text_first = vec![
        RuleConfig::new(r"\.txt$", vec![TransformStep::Text]),
        RuleConfig::new(r"\.(txt|png)$", vec![TransformStep::Asset { inline: false }]),
    ];
    let asset_first: Vec<RuleConfig> = text_first.iter().rev().cloned().collect();
    let path = PathBuf::from("/p/src/notes.txt");

    let registry = TransformRegistry::from_rules(&text_first).unwrap();
    assert_eq!(registry.rule_for(&path).unwrap().index, 0);
    assert_eq!(registry.chain_for(&path).steps(), &[TransformStep::Text]);

    let registry = TransformRegistry::from_rules(&asset_first).unwrap();
    assert_eq!(registry.rule_for(&path).unwrap().index, 0);
    assert_eq!(
        registry.chain_for(&path).steps(),
        &[TransformStep::Asset { inline: false }]
    );
}

#[test]
fn test_optional_import_failure_is_a_warning() {
    let dir = project(&[(
        "src/main.js",
        b"import('./maybe').catch(function () {});\nconsole.log(1);\n",
    )]);
    let bundler = Bundler::new(Config::new(dir.path()).with_entry("main", "./src/main.js")).unwrap();
    let result = bundler.build_and_write().unwrap();

    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].chain.to_string(), "main → ./maybe");
    let main = result.graph.entries()[0].1;
    let (dep, target) = result.graph.dependencies(main).next().unwrap();
    assert_eq!(dep.kind, DependencyKind::Dynamic);
    assert!(target.is_none());
}

#[test]
fn test_extracted_css_rewrites_urls() {
    let icon: Vec<u8> = vec![7; 20_000];
    let dir = project(&[
        ("src/main.js", b"import './app.css';\n"),
        ("src/app.css", b".icon { background: url(./icon.png); }\n.ext { background: url(https://x.test/a.png); }\n"),
        ("src/icon.png", &icon),
    ]);
    let mut config = Config::new(dir.path())
        .with_entry("main", "./src/main.js")
        .with_rules(vec![
            RuleConfig::new(
                r"\.css$",
                vec![TransformStep::Style {
                    urls: true,
                    extract: true,
                }],
            ),
            RuleConfig::new(r"\.js$", vec![TransformStep::Script]),
            RuleConfig::new(r"\.png$", vec![TransformStep::Asset { inline: true }]),
        ]);
    config.output.public_path = "/".to_string();
    let bundler = Bundler::new(config).unwrap();
    bundler.build_and_write().unwrap();

    let css = text(&bundler, "main.css");
    let hash = weft_util::hash::blake3_bytes(&icon);
    assert!(css.contains(&format!("url(\"/static/media/icon.{}.png\")", &hash[..8])));
    assert!(css.contains("url(https://x.test/a.png)"));

    let html = text(&bundler, "index.html");
    assert!(html.contains(r#"<link rel="stylesheet" href="/main.css">"#));
    assert!(html.contains(r#"<script src="/main.js"></script>"#));
}

#[test]
fn test_entry_name_cannot_overwrite_sources() {
    let dir = project(&[("src/index.js", b"console.log('src');\n")]);
    let err = Bundler::new(Config::new(dir.path()).with_entry("../src/index", "./src/index.js"))
        .unwrap_err();
    assert_eq!(err.code(), "CONFIG_INVALID");
    assert_eq!(
        fs::read_to_string(dir.path().join("src/index.js")).unwrap(),
        "console.log('src');\n"
    );
}

#[test]
fn test_imported_entry_loads_before_importer() {
    let dir = project(&[
        ("src/admin.js", b"import { app } from './app';\nconsole.log(app);\n"),
        ("src/app.js", b"export const app = 'app';\n"),
    ]);
    let config = Config::new(dir.path())
        .with_entry("admin", "./src/admin.js")
        .with_entry("app", "./src/app.js");
    let bundler = Bundler::new(config).unwrap();
    bundler.build_and_write().unwrap();

    let html = text(&bundler, "index.html");
    let app = html.find(r#"<script src="app.js"></script>"#).unwrap();
    let admin = html.find(r#"<script src="admin.js"></script>"#).unwrap();
    assert!(app < admin);

    let admin_js = text(&bundler, "admin.js");
    assert!(!admin_js.contains("\"src/app.js\": [function"));
    assert!(admin_js.contains(r#"__weft_start("src/admin.js", ["src/app.js"]);"#));
    assert!(text(&bundler, "app.js").contains(r#"__weft_start("src/app.js", []);"#));
}

#[test]
fn test_fixed_filename_builds_single_entry_and_conflicts_on_two() {
    let dir = project(&[
        ("src/a.js", b"console.log('a');\n"),
        ("src/b.js", b"console.log('b');\n"),
    ]);
    let mut config = Config::new(dir.path()).with_entry("a", "./src/a.js");
    config.output.filename = Some("bundle.js".to_string());
    let bundler = Bundler::new(config.clone()).unwrap();
    bundler.build_and_write().unwrap();
    assert!(text(&bundler, "bundle.js").contains("console.log('a');"));

    let bundler = Bundler::new(config.with_entry("b", "./src/b.js")).unwrap();
    let err = bundler.build().unwrap_err();
    assert_eq!(err.code(), "BUILD_OUTPUT_CONFLICT");
}
