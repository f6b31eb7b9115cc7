//! Plain text to Atlassian Document Format.
//!
//! Jira's v3 API only accepts rich-text fields as ADF documents. Descriptions
//! are rendered line by line: consecutive bullet lines (`- `, `* `, and
//! `- [ ] ` / `- [x] ` checklist items) become one `bulletList`, every other
//! non-blank line becomes a paragraph. Blank lines separate blocks and are
//! otherwise dropped, since ADF rejects empty text nodes.

use serde_json::{json, Value};

/// Renders `text` as an ADF `doc` node.
pub fn to_adf(text: &str) -> Value {
    let mut content = Vec::new();
    let mut bullets: Vec<Value> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end();
        match bullet_text(line) {
            Some(item) => bullets.push(list_item(item)),
            None => {
                flush(&mut bullets, &mut content);
                if !line.trim().is_empty() {
                    content.push(paragraph(line));
                }
            }
        }
    }
    flush(&mut bullets, &mut content);

    json!({ "type": "doc", "version": 1, "content": content })
}

fn bullet_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))?;
    let rest = ["[ ] ", "[x] ", "[X] "]
        .iter()
        .find_map(|marker| rest.strip_prefix(marker))
        .unwrap_or(rest)
        .trim();
    (!rest.is_empty()).then_some(rest)
}

fn flush(bullets: &mut Vec<Value>, content: &mut Vec<Value>) {
    if !bullets.is_empty() {
        content.push(json!({ "type": "bulletList", "content": std::mem::take(bullets) }));
    }
}

fn paragraph(text: &str) -> Value {
    json!({ "type": "paragraph", "content": [{ "type": "text", "text": text }] })
}

fn list_item(text: &str) -> Value {
    json!({ "type": "listItem", "content": [paragraph(text)] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_an_empty_document() {
        assert_eq!(
            to_adf(""),
            json!({ "type": "doc", "version": 1, "content": [] })
        );
    }

    #[test]
    fn lines_become_paragraphs() {
        let doc = to_adf("First line\n\nSecond line");
        let content = doc["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "paragraph");
        assert_eq!(content[1]["content"][0]["text"], "Second line");
    }

    #[test]
    fn consecutive_bullets_share_one_list() {
        let doc = to_adf("Do the thing.\n\nAcceptance criteria:\n- Given A\n* Then B\n- [ ] Check C\nDone");
        let content = doc["content"].as_array().unwrap();
        let kinds: Vec<_> = content.iter().map(|n| n["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["paragraph", "paragraph", "bulletList", "paragraph"]);

        let items = content[2]["content"].as_array().unwrap();
        let texts: Vec<_> = items
            .iter()
            .map(|item| item["content"][0]["content"][0]["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, ["Given A", "Then B", "Check C"]);
    }

    #[test]
    fn a_bare_dash_is_not_a_bullet() {
        let doc = to_adf("-\n- ");
        let content = doc["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert!(content.iter().all(|n| n["type"] == "paragraph"));
    }
}
