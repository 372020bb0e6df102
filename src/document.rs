//! Document building: raw file bytes → front matter + normalized body.
//!
//! Markdown and plain text pass through lossy UTF-8 decoding; PDFs go
//! through `pdf-extract` first. YAML front matter (`---` fenced) becomes a
//! JSON map. The body is normalized (CRLF → LF, trailing whitespace
//! stripped, outer blank lines trimmed) before hashing so that a re-save
//! with different line endings does not count as a content change.

use serde_json::Value;

use crate::change::sha256_hex;
use crate::error::BuildError;

/// Parsed, normalized content of one file, ready to persist and chunk.
#[derive(Debug, Clone)]
pub struct BuiltDocument {
    pub title: String,
    pub doc_type: String,
    pub frontmatter: serde_json::Map<String, Value>,
    pub body: String,
    /// SHA-256 over the normalized body; equal hash ⇒ skip re-chunking.
    pub content_hash: String,
}

pub fn build(rel_path: &str, raw: &[u8], ext: Option<&str>) -> Result<BuiltDocument, BuildError> {
    let text = match ext {
        Some("pdf") => pdf_extract::extract_text_from_mem(raw)
            .map_err(|e| BuildError::Pdf(e.to_string()))?,
        _ => String::from_utf8_lossy(raw).into_owned(),
    };

    let (frontmatter, body_raw) = split_front_matter(&text)?;
    let body = normalize_body(body_raw);
    let content_hash = sha256_hex(body.as_bytes());

    let stem = rel_path
        .rsplit('/')
        .next()
        .unwrap_or(rel_path)
        .rsplit_once('.')
        .map(|(s, _)| s.to_string())
        .unwrap_or_else(|| rel_path.to_string());

    let title = frontmatter
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(stem);

    let doc_type = match ext {
        Some("md") => "md".to_string(),
        Some("pdf") => "pdf".to_string(),
        Some(other) => other.to_string(),
        None => "file".to_string(),
    };

    Ok(BuiltDocument {
        title,
        doc_type,
        frontmatter,
        body,
        content_hash,
    })
}

/// Split a leading `---` fenced YAML block from the body. A document
/// without front matter yields an empty map and the full text.
fn split_front_matter(
    text: &str,
) -> Result<(serde_json::Map<String, Value>, &str), BuildError> {
    let stripped = text.strip_prefix('\u{feff}').unwrap_or(text);

    let rest = match stripped.strip_prefix("---\n").or_else(|| stripped.strip_prefix("---\r\n")) {
        Some(r) => r,
        None => return Ok((serde_json::Map::new(), stripped)),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let map = parse_yaml_map(yaml)?;
            return Ok((map, body));
        }
        offset += line.len();
    }

    // Unterminated fence: treat the whole text as body.
    Ok((serde_json::Map::new(), stripped))
}

fn parse_yaml_map(yaml: &str) -> Result<serde_json::Map<String, Value>, BuildError> {
    if yaml.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    let parsed: serde_yaml::Value = match serde_yaml::from_str(yaml) {
        Ok(v) => v,
        // Malformed YAML is tolerated: the fence becomes part of no one's
        // metadata but the document still ingests.
        Err(_) => return Ok(serde_json::Map::new()),
    };
    match serde_json::to_value(parsed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(serde_json::Map::new()),
        Ok(_) => Err(BuildError::FrontMatterShape),
        Err(_) => Err(BuildError::FrontMatterShape),
    }
}

/// Stable body normalization: CRLF → LF, strip trailing whitespace per
/// line, trim leading/trailing blank lines.
pub fn normalize_body(body: &str) -> String {
    let unified = body.replace("\r\n", "\n");
    let mut lines: Vec<&str> = unified.lines().map(|l| l.trim_end()).collect();
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_markdown_without_front_matter() {
        let doc = build("lore/elminster.md", b"# Elminster\n\nA wizard.", Some("md")).unwrap();
        assert_eq!(doc.title, "elminster");
        assert_eq!(doc.doc_type, "md");
        assert!(doc.frontmatter.is_empty());
        assert_eq!(doc.body, "# Elminster\n\nA wizard.");
    }

    #[test]
    fn front_matter_is_split_and_typed() {
        let raw = b"---\ntitle: The Yawning Portal\nkind: location\ntags:\n  - inn\n---\nA famous tavern.";
        let doc = build("portal.md", raw, Some("md")).unwrap();
        assert_eq!(doc.title, "The Yawning Portal");
        assert_eq!(doc.frontmatter["kind"], "location");
        assert_eq!(doc.frontmatter["tags"][0], "inn");
        assert_eq!(doc.body, "A famous tavern.");
    }

    #[test]
    fn unterminated_fence_is_body() {
        let doc = build("a.md", b"---\nnot: closed\nstill text", Some("md")).unwrap();
        assert!(doc.frontmatter.is_empty());
        assert!(doc.body.contains("still text"));
    }

    #[test]
    fn crlf_and_trailing_whitespace_do_not_change_hash() {
        let unix = build("a.md", b"line one\nline two\n", Some("md")).unwrap();
        let dos = build("a.md", b"line one  \r\nline two\r\n\r\n", Some("md")).unwrap();
        assert_eq!(unix.content_hash, dos.content_hash);
    }

    #[test]
    fn content_change_changes_hash() {
        let a = build("a.md", b"version one", Some("md")).unwrap();
        let b = build("a.md", b"version two", Some("md")).unwrap();
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let doc = build("a.md", &[0x66, 0x6f, 0xff, 0x6f], Some("md")).unwrap();
        assert!(doc.body.contains('\u{fffd}'));
    }

    #[test]
    fn malformed_yaml_front_matter_is_tolerated() {
        let doc = build("a.md", b"---\n: [broken\n---\nbody text", Some("md")).unwrap();
        assert!(doc.frontmatter.is_empty());
        assert_eq!(doc.body, "body text");
    }
}
