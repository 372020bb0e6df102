//! Heading-aware deterministic chunker.
//!
//! The normalized body splits on ATX headings (`#`–`######`); each section
//! carries a human-readable `section_path` like `"Factions > The Zhentarim"`.
//! Sections over `max_chars` split further on paragraph boundaries (`\n\n`),
//! and an oversized single paragraph falls back to fixed windows with
//! `overlap` characters of carry-over. The same body always yields the same
//! chunk boundaries, independent of run history.
//!
//! Each chunk records a SHA-256 hash of its text for dedup checks.

use crate::change::sha256_hex;
use crate::models::Chunk;

struct Section {
    path: String,
    text: String,
}

/// Split a normalized body into ordered chunks. An empty body yields no
/// chunks (nothing to index).
pub fn chunk_body(body: &str, max_chars: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for section in split_sections(body) {
        for piece in split_section_text(&section.text, max_chars, overlap) {
            chunks.push(Chunk {
                chunk_index: index,
                section_path: section.path.clone(),
                hash: sha256_hex(piece.as_bytes()),
                content: piece,
            });
            index += 1;
        }
    }

    chunks
}

/// Walk the body line by line, maintaining a heading stack.
fn split_sections(body: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current = String::new();

    let flush = |sections: &mut Vec<Section>, stack: &[(usize, String)], text: &mut String| {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            sections.push(Section {
                path: stack
                    .iter()
                    .map(|(_, title)| title.as_str())
                    .collect::<Vec<_>>()
                    .join(" > "),
                text: trimmed.to_string(),
            });
        }
        text.clear();
    };

    for line in body.lines() {
        if let Some((level, title)) = parse_heading(line) {
            flush(&mut sections, &stack, &mut current);
            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            stack.push((level, title));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    flush(&mut sections, &stack, &mut current);

    sections
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes, title.to_string()))
}

/// Pack paragraphs up to `max_chars`; hard-window oversized paragraphs.
fn split_section_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(window_split(trimmed, max_chars, overlap));
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
}

/// Fixed-size windows with overlap, splitting at char boundaries and
/// preferring whitespace breaks near the window edge.
fn window_split(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_chars).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end < text.len() {
            // Back up to the last whitespace inside the window, if any.
            if let Some(pos) = text[start..end].rfind(char::is_whitespace) {
                if pos > 0 {
                    end = start + pos;
                }
            }
        }
        let piece = text[start..end].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        if end >= text.len() {
            break;
        }
        let next = end.saturating_sub(overlap).max(start + 1);
        start = next;
        while !text.is_char_boundary(start) {
            start += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_yields_no_chunks() {
        assert!(chunk_body("", 4000, 300).is_empty());
    }

    #[test]
    fn small_body_is_a_single_chunk() {
        let chunks = chunk_body("Just a short note.", 4000, 300);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].section_path, "");
        assert_eq!(chunks[0].content, "Just a short note.");
    }

    #[test]
    fn heading_sections_get_paths() {
        let body = "intro text\n\n# Factions\n\nOverview.\n\n## The Zhentarim\n\nA network of spies.\n\n# Places\n\nWaterdeep.";
        let chunks = chunk_body(body, 4000, 300);
        let paths: Vec<&str> = chunks.iter().map(|c| c.section_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["", "Factions", "Factions > The Zhentarim", "Places"]
        );
        assert!(chunks[2].content.contains("spies"));
    }

    #[test]
    fn sibling_heading_replaces_stack_level() {
        let body = "## A\n\none\n\n## B\n\ntwo";
        let chunks = chunk_body(body, 4000, 300);
        assert_eq!(chunks[0].section_path, "A");
        assert_eq!(chunks[1].section_path, "B");
    }

    #[test]
    fn indices_are_contiguous_across_sections() {
        let body = (0..20)
            .map(|i| format!("# H{}\n\nSection body number {}.", i, i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_body(&body, 4000, 300);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn long_section_splits_on_paragraphs() {
        let body = format!(
            "# Long\n\n{}\n\n{}\n\n{}",
            "a".repeat(60),
            "b".repeat(60),
            "c".repeat(60)
        );
        let chunks = chunk_body(&body, 80, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert_eq!(c.section_path, "Long");
            assert!(c.content.len() <= 80);
        }
    }

    #[test]
    fn oversized_paragraph_windows_with_overlap() {
        let para = "word ".repeat(100);
        let chunks = chunk_body(para.trim(), 120, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.len() <= 120);
        }
        // Overlap: the next window starts before the previous one ended.
        let first_tail: String = chunks[0].content.chars().rev().take(10).collect();
        assert!(!first_tail.is_empty());
    }

    #[test]
    fn deterministic_across_calls() {
        let body = "# A\n\nalpha beta gamma\n\n## B\n\ndelta epsilon";
        let a = chunk_body(body, 30, 5);
        let b = chunk_body(body, 30, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_tracks_content() {
        let a = chunk_body("one", 100, 0);
        let b = chunk_body("two", 100, 0);
        assert_ne!(a[0].hash, b[0].hash);
    }

    #[test]
    fn heading_without_space_is_body_text() {
        let chunks = chunk_body("#hashtag not a heading", 4000, 300);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_path, "");
    }
}
