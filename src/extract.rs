//! Text extraction for ingestible documents.
//!
//! Plain text, Markdown, and log files are read as UTF-8 (invalid bytes are
//! replaced). HTML is reduced to its visible text by stripping tags. PDFs go
//! through `pdf-extract`. Any other extension yields `None` and is skipped by
//! the ingestion walk.

use std::path::Path;

use thiserror::Error;

pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "log"];
pub const HTML_EXTENSIONS: &[&str] = &["html", "htm"];
pub const PDF_EXTENSIONS: &[&str] = &["pdf"];

/// Extraction failure. Fatal to an ingestion run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed for {path}: {message}")]
    Pdf { path: String, message: String },
}

/// Kind of document, decided by file extension (case-insensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Html,
    Pdf,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Text)
        } else if HTML_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Html)
        } else if PDF_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Pdf)
        } else {
            None
        }
    }
}

/// Read a document and return its plain text, or `None` for unsupported files.
pub fn read_document(path: &Path) -> Result<Option<String>, ExtractError> {
    let Some(kind) = DocumentKind::from_path(path) else {
        return Ok(None);
    };

    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let text = match kind {
        DocumentKind::Text => String::from_utf8_lossy(&bytes).into_owned(),
        DocumentKind::Html => html_to_text(&String::from_utf8_lossy(&bytes)),
        DocumentKind::Pdf => {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        }
    };

    Ok(Some(text))
}

/// Elements whose content is never visible text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "noscript", "template"];

/// Elements that start a new line of visible text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "tr", "td", "th", "table", "h1", "h2", "h3", "h4", "h5",
    "h6", "pre", "section", "article", "header", "footer", "blockquote", "hr", "title", "dt", "dd",
];

/// Strip HTML tags, keeping visible text.
///
/// Block-level tags become line breaks, comments and the bodies of
/// `script`/`style`-like elements are dropped, and the common named and
/// numeric character references are decoded. Blank lines are collapsed.
pub fn html_to_text(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len() / 2);
    let mut pos = 0;

    while pos < html.len() {
        let rest = &html[pos..];
        let Some(lt) = rest.find('<') else {
            out.push_str(&decode_entities(rest));
            break;
        };
        out.push_str(&decode_entities(&rest[..lt]));
        pos += lt;
        let rest = &html[pos..];

        if rest.starts_with("<!--") {
            pos = match rest.find("-->") {
                Some(end) => pos + end + 3,
                None => html.len(),
            };
            continue;
        }

        if !rest[1..].starts_with(|c: char| c.is_ascii_alphabetic() || c == '/' || c == '!') {
            // A bare `<` in running text.
            out.push('<');
            pos += 1;
            continue;
        }

        let Some(gt) = tag_end(rest) else {
            // Unterminated tag: keep the remainder as text.
            out.push_str(&decode_entities(rest));
            break;
        };

        let tag = &rest[1..gt];
        pos += gt + 1;

        let closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if !closing && !tag.ends_with('/') && SKIPPED_ELEMENTS.contains(&name.as_str()) {
            let close = format!("</{}", name);
            pos = match lower[pos..].find(&close) {
                Some(offset) => {
                    let start = pos + offset;
                    match tag_end(&html[start..]) {
                        Some(g) => start + g + 1,
                        None => html.len(),
                    }
                }
                None => html.len(),
            };
            continue;
        }

        if BLOCK_ELEMENTS.contains(&name.as_str()) {
            out.push('\n');
        }
    }

    collapse_blank_lines(&out)
}

/// Offset of the `>` that closes the tag starting at `tag[0]`.
///
/// A `>` inside a quoted attribute value does not close the tag.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in tag.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(i),
            None => {}
        }
    }
    None
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&rest[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn collapse_blank_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
