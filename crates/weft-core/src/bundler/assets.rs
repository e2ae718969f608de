//! Asset emission.
//!
//! Decides per module whether it is inlined as a `data:` URI or written as a
//! standalone file named after its content hash.

use super::graph::ModuleRecord;
use super::template::{self, TemplateVars};
use super::transform::ModuleKind;
use crate::error::{BuildError, ConfigError};
use data_encoding::BASE64;

/// A standalone output file for an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedAsset {
    /// Path relative to the output directory, `/`-separated.
    pub output_path: String,
    pub bytes: Vec<u8>,
    /// BLAKE3 hex digest of `bytes`.
    pub content_hash: String,
}

/// How an asset reaches the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetEmission {
    /// Embedded into the referencing module.
    Inline { data_uri: String },
    /// Written to the output directory.
    File(EmittedAsset),
}

/// Applies the inlining rule and the asset file name template.
#[derive(Debug, Clone, Copy)]
pub struct AssetEmitter<'a> {
    pub inline_limit: u64,
    pub template: &'a str,
    pub public_path: &'a str,
}

impl AssetEmitter<'_> {
    /// Inline or emit `record`.
    ///
    /// Only modules whose chain marked them inline-eligible are inlined, and
    /// only when strictly smaller than the limit. Everything else becomes a file.
    pub fn emit(&self, record: &ModuleRecord) -> Result<AssetEmission, BuildError> {
        let inline_ok = matches!(record.kind, ModuleKind::Asset { inline: true })
            && (record.raw.len() as u64) < self.inline_limit;

        if inline_ok {
            let (_, ext) = record.name_and_ext();
            return Ok(AssetEmission::Inline {
                data_uri: format!(
                    "data:{};base64,{}",
                    mime_type(ext),
                    BASE64.encode(&record.raw)
                ),
            });
        }

        let (name, ext) = record.name_and_ext();
        let vars = TemplateVars {
            name,
            ext,
            hash: &record.content_hash,
        };
        let output_path = template::render(self.template, &vars).map_err(|message| {
            ConfigError::InvalidTemplate {
                field: "output.assetFilename",
                template: self.template.to_string(),
                message,
            }
        })?;

        Ok(AssetEmission::File(EmittedAsset {
            output_path,
            bytes: record.raw.clone(),
            content_hash: record.content_hash.clone(),
        }))
    }

    /// The URL that references an emission from the page.
    #[must_use]
    pub fn url(&self, emission: &AssetEmission) -> String {
        match emission {
            AssetEmission::Inline { data_uri } => data_uri.clone(),
            AssetEmission::File(asset) => format!("{}{}", self.public_path, asset.output_path),
        }
    }
}

/// MIME type for a file extension.
#[must_use]
pub fn mime_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "css" => "text/css",
        "js" | "mjs" | "cjs" | "jsx" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const TEMPLATE: &str = "static/media/[name].[hash:8].[ext]";

    fn record(name: &str, size: usize, inline: bool) -> ModuleRecord {
        let raw: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        ModuleRecord {
            path: PathBuf::from(format!("/p/src/{name}")),
            key: format!("src/{name}"),
            content_hash: weft_util::hash::blake3_bytes(&raw),
            raw,
            kind: ModuleKind::Asset { inline },
            code: String::new(),
            dependencies: Vec::new(),
            resolved: Vec::new(),
        }
    }

    fn emitter() -> AssetEmitter<'static> {
        AssetEmitter {
            inline_limit: 10_000,
            template: TEMPLATE,
            public_path: "/",
        }
    }

    #[test]
    fn test_small_asset_is_inlined() {
        let emission = emitter().emit(&record("logo.png", 2_048, true)).unwrap();
        match emission {
            AssetEmission::Inline { ref data_uri } => {
                assert!(data_uri.starts_with("data:image/png;base64,"));
            }
            AssetEmission::File(_) => panic!("expected inline"),
        }
    }

    #[test]
    fn test_large_asset_is_a_hashed_file() {
        let rec = record("hero.jpg", 50_000, true);
        let emission = emitter().emit(&rec).unwrap();
        let AssetEmission::File(asset) = &emission else {
            panic!("expected file");
        };
        assert_eq!(
            asset.output_path,
            format!("static/media/hero.{}.jpg", &rec.content_hash[..8])
        );
        assert_eq!(asset.bytes.len(), 50_000);
        assert_eq!(emitter().url(&emission), format!("/{}", asset.output_path));
    }

    #[test]
    fn test_limit_is_exclusive_and_opt_out_respected() {
        assert!(matches!(
            emitter().emit(&record("a.png", 10_000, true)).unwrap(),
            AssetEmission::File(_)
        ));
        assert!(matches!(
            emitter().emit(&record("a.woff", 10, false)).unwrap(),
            AssetEmission::File(_)
        ));
    }

    #[test]
    fn test_identical_content_same_name() {
        let a = emitter().emit(&record("x.png", 20_000, true)).unwrap();
        let b = emitter().emit(&record("x.png", 20_000, true)).unwrap();
        assert_eq!(a, b);
    }
}
