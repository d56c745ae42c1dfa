//! Reader for hand-edited `app_categories.json` mappings.
//!
//! The file is JSON with optional trailing `// name` comments on the lines of
//! the `app_categories` object. Comments are stripped before parsing and
//! their text is kept as the display name of that package.

use crate::models::{Category, ClassificationRecord, Source};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("mapping is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct LegacyImport {
    pub records: Vec<ClassificationRecord>,
    /// `(identifier, label)` pairs whose label is not a known category.
    pub rejected: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct LegacyDocument {
    #[serde(default)]
    app_categories: BTreeMap<String, String>,
    #[serde(default)]
    app_names: BTreeMap<String, String>,
}

pub fn parse_mapping(raw: &str) -> Result<LegacyImport, LegacyError> {
    let mut names = BTreeMap::new();
    let mut clean = String::with_capacity(raw.len());
    for line in raw.lines() {
        let (code, comment) = split_comment(line);
        if let Some(name) = comment {
            if let Some(key) = leading_key(code) {
                names.insert(key.to_string(), name.to_string());
            }
        }
        clean.push_str(code);
        clean.push('\n');
    }

    let doc: LegacyDocument = serde_json::from_str(&clean)?;
    let mut out = LegacyImport::default();
    for (identifier, label) in doc.app_categories {
        match label.parse::<Category>() {
            Ok(category) => {
                let name = names
                    .get(&identifier)
                    .or_else(|| doc.app_names.get(&identifier))
                    .cloned();
                out.records.push(
                    ClassificationRecord::resolved(identifier, category, Source::Manual)
                        .with_display_name(name),
                );
            }
            Err(_) => out.rejected.push((identifier, label)),
        }
    }
    Ok(out)
}

/// Splits at a `//` that follows the last quote on the line.
fn split_comment(line: &str) -> (&str, Option<&str>) {
    let Some(last_quote) = line.rfind('"') else {
        return (line, None);
    };
    match line[last_quote + 1..].find("//") {
        Some(offset) => {
            let at = last_quote + 1 + offset;
            let comment = line[at + 2..].trim();
            (line[..at].trim_end(), (!comment.is_empty()).then_some(comment))
        }
        None => (line, None),
    }
}

fn leading_key(code: &str) -> Option<&str> {
    let rest = code.trim_start().strip_prefix('"')?;
    let end = rest.find('"')?;
    let after = rest[end + 1..].trim_start();
    after.starts_with(':').then(|| &rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_categories_and_comment_names() {
        let raw = r#"{
  "category_order": ["社交通讯"],
  "app_categories": {
    "com.tencent.mm": "社交通讯",  // 微信
    "com.taobao.taobao": "购物电商",
    "com.example.odd": "杂项"  // Odd
  },
  "unclassified": []
}"#;
        let import = parse_mapping(raw).unwrap();
        assert_eq!(import.records.len(), 2);
        let wechat = import
            .records
            .iter()
            .find(|r| r.identifier == "com.tencent.mm")
            .unwrap();
        assert_eq!(wechat.category, Some(Category::Social));
        assert_eq!(wechat.display_name.as_deref(), Some("微信"));
        assert_eq!(
            import.rejected,
            vec![("com.example.odd".to_string(), "杂项".to_string())]
        );
    }

    #[test]
    fn comment_inside_a_string_is_kept() {
        let (code, comment) = split_comment(r#"  "url": "http://x/y","#);
        assert_eq!(code, r#"  "url": "http://x/y","#);
        assert!(comment.is_none());
    }
}
