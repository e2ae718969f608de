//! Host document generation.

/// Insert `snippet` before the first `marker` (e.g. `</head>`), or append it.
#[must_use]
pub fn inject_before(html: &str, marker: &str, snippet: &str) -> String {
    let mut out = html.to_string();
    if let Some(pos) = find_tag(html, marker) {
        out.insert_str(pos, &format!("  {snippet}\n"));
    } else {
        out.push_str(&format!("\n{snippet}\n"));
    }
    out
}

/// Case-insensitive search for an ASCII tag.
fn find_tag(html: &str, tag: &str) -> Option<usize> {
    html.to_ascii_lowercase().find(&tag.to_ascii_lowercase())
}

/// Escape text for use in HTML content or a double-quoted attribute.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the host document referencing `scripts` and `styles` (URLs).
///
/// With a template, stylesheet links go before `</head>` and scripts before
/// `</body>`. Without one, a minimal document is generated.
#[must_use]
pub fn render_host_document(
    template: Option<&str>,
    title: &str,
    scripts: &[String],
    styles: &[String],
) -> String {
    let links: String = styles
        .iter()
        .map(|href| format!("<link rel=\"stylesheet\" href=\"{}\">", escape(href)))
        .collect::<Vec<_>>()
        .join("\n  ");
    let tags: String = scripts
        .iter()
        .map(|src| format!("<script src=\"{}\"></script>", escape(src)))
        .collect::<Vec<_>>()
        .join("\n  ");

    match template {
        Some(template) => {
            let mut html = template.to_string();
            if !links.is_empty() {
                html = inject_before(&html, "</head>", &links);
            }
            if !tags.is_empty() {
                html = inject_before(&html, "</body>", &tags);
            }
            html
        }
        None => format!(
            r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  {links}
</head>
<body>
  <div id="root"></div>
  {tags}
</body>
</html>
"#,
            title = escape(title),
        ),
    }
}
