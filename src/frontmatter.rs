use std::sync::OnceLock;

use anyhow::{Context, Result};
use log::warn;
use regex::Regex;
use serde_yaml::{Mapping, Value as YamlValue};

static FRONTMATTER: OnceLock<Regex> = OnceLock::new();
static ILLEGAL_TITLE_CHARS: OnceLock<Regex> = OnceLock::new();
static RESERVED_NAME: OnceLock<Regex> = OnceLock::new();

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex> {
    if let Some(regex) = cell.get() {
        return Ok(regex);
    }
    let compiled = Regex::new(pattern).with_context(|| format!("Compiling pattern {pattern}"))?;
    Ok(cell.get_or_init(|| compiled))
}

/// A note split at its leading `---` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitNote<'a> {
    pub frontmatter: Option<&'a str>,
    pub body: &'a str,
    /// Line ending of the note's first line, reused when the block is rewritten.
    pub newline: &'static str,
}

fn detect_newline(text: &str) -> &'static str {
    match text.find('\n') {
        Some(i) if text[..i].ends_with('\r') => "\r\n",
        _ => "\n",
    }
}

/// Accepts `\n` and `\r\n` line endings and an empty `---\n---` block.
pub fn split_frontmatter(text: &str) -> Result<SplitNote<'_>> {
    let pattern = cached(
        &FRONTMATTER,
        r"^---\r?\n(?:---|([\s\S]*?)\r?\n---)(?:\r?\n|$)",
    )?;
    let newline = detect_newline(text);
    let split = match pattern.captures(text) {
        Some(caps) => {
            let Some(whole) = caps.get(0) else {
                return Ok(SplitNote { frontmatter: None, body: text, newline });
            };
            SplitNote {
                frontmatter: Some(caps.get(1).map_or("", |inner| inner.as_str())),
                body: &text[whole.end()..],
                newline,
            }
        }
        None => SplitNote {
            frontmatter: None,
            body: text,
            newline,
        },
    };
    Ok(split)
}

/// Strict parse used before editing a note: malformed YAML is an error so
/// the note is never overwritten with a partial mapping.
pub fn parse_mapping(text: Option<&str>) -> Result<Mapping> {
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        return Ok(Mapping::new());
    };
    match serde_yaml::from_str::<YamlValue>(text).context("Parsing frontmatter")? {
        YamlValue::Mapping(mapping) => Ok(mapping),
        YamlValue::Null => Ok(Mapping::new()),
        other => anyhow::bail!("Frontmatter is not a mapping: {other:?}"),
    }
}

/// Lenient parse for reading and templates.
pub fn parse_mapping_lenient(text: Option<&str>, origin: &str) -> Mapping {
    parse_mapping(text).unwrap_or_else(|err| {
        warn!("Ignoring frontmatter in {origin}: {err:#}");
        Mapping::new()
    })
}

/// Template properties first, then `injected` on top.
pub fn merge_frontmatter(template: Option<&str>, injected: &Mapping, origin: &str) -> Mapping {
    let mut merged = parse_mapping_lenient(template, origin);
    for (key, value) in injected {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// `---\n<yaml>---\n<body>`; a note with no properties is just its body.
/// The block is written with `newline` line endings; `body` is kept as is.
pub fn render_note(frontmatter: &Mapping, body: &str, newline: &str) -> Result<String> {
    if frontmatter.is_empty() {
        return Ok(body.to_string());
    }
    let yaml = serde_yaml::to_string(frontmatter).context("Serializing frontmatter")?;
    let block = format!("---\n{yaml}---\n");
    if newline == "\n" {
        return Ok(block + body);
    }
    Ok(block.replace('\n', newline) + body)
}

/// Frontmatter-only note with each value written as a JSON literal.
pub fn render_blank_note(injected: &Mapping) -> Result<String> {
    let mut lines = vec!["---".to_string()];
    for (key, value) in injected {
        let key = match key {
            YamlValue::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        };
        lines.push(format!("{key}: {}", serde_json::to_string(value)?));
    }
    lines.push("---".to_string());
    Ok(lines.join("\n") + "\n")
}

/// File-name-safe title. Empty and reserved device names become `Untitled`.
pub fn sanitize_title(title: &str) -> Result<String> {
    let illegal = cached(&ILLEGAL_TITLE_CHARS, r#"[<>:"/\\|?*]"#)?;
    let reserved = cached(&RESERVED_NAME, r"(?i)^(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])$")?;

    let stripped = illegal.replace_all(title, "");
    let safe = stripped
        .trim_start_matches('.')
        .trim_end_matches(['.', ' '])
        .trim();
    if safe.is_empty() || reserved.is_match(safe) {
        return Ok("Untitled".to_string());
    }
    Ok(safe.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_leading_block() {
        let split = split_frontmatter("---\nstatus: todo\n---\n# Body\n").unwrap();
        assert_eq!(split.frontmatter, Some("status: todo"));
        assert_eq!(split.body, "# Body\n");

        let plain = split_frontmatter("no frontmatter\n---\n").unwrap();
        assert_eq!(plain.frontmatter, None);
        assert_eq!(plain.body, "no frontmatter\n---\n");
    }

    #[test]
    fn splits_crlf_and_empty_blocks() {
        let crlf = split_frontmatter("---\r\nstatus: todo\r\n---\r\nBody\r\n").unwrap();
        assert_eq!(crlf.frontmatter, Some("status: todo"));
        assert_eq!(crlf.body, "Body\r\n");
        assert_eq!(crlf.newline, "\r\n");
        assert_eq!(
            parse_mapping(crlf.frontmatter).unwrap().get("status"),
            Some(&YamlValue::from("todo"))
        );

        let empty = split_frontmatter("---\n---\nBody\n").unwrap();
        assert_eq!(empty.frontmatter, Some(""));
        assert_eq!(empty.body, "Body\n");
        assert_eq!(empty.newline, "\n");

        let bare = split_frontmatter("---\r\n---").unwrap();
        assert_eq!(bare.frontmatter, Some(""));
        assert_eq!(bare.body, "");
    }

    #[test]
    fn rendering_keeps_crlf_line_endings() {
        let mut mapping = Mapping::new();
        mapping.insert("status".into(), "done".into());
        assert_eq!(
            render_note(&mapping, "Body\r\n", "\r\n").unwrap(),
            "---\r\nstatus: done\r\n---\r\nBody\r\n"
        );
    }

    #[test]
    fn strict_parse_rejects_non_mappings() {
        assert!(parse_mapping(Some("- a\n- b")).is_err());
        assert!(parse_mapping(Some("key: [unclosed")).is_err());
        assert!(parse_mapping(None).unwrap().is_empty());
        assert!(parse_mapping_lenient(Some("- a"), "test").is_empty());
    }

    #[test]
    fn injected_values_win_over_template() {
        let mut injected = Mapping::new();
        injected.insert("status".into(), "doing".into());
        let merged = merge_frontmatter(Some("status: todo\nowner: ann"), &injected, "template.md");
        assert_eq!(merged.get("status"), Some(&YamlValue::from("doing")));
        assert_eq!(merged.get("owner"), Some(&YamlValue::from("ann")));

        let rendered = render_note(&merged, "Body\n", "\n").unwrap();
        assert!(rendered.starts_with("---\n"));
        assert!(rendered.ends_with("---\nBody\n"));
        let reparsed = split_frontmatter(&rendered).unwrap();
        assert_eq!(parse_mapping(reparsed.frontmatter).unwrap(), merged);
    }

    #[test]
    fn blank_note_uses_json_literals() {
        let mut injected = Mapping::new();
        injected.insert("status".into(), "to do".into());
        assert_eq!(render_blank_note(&injected).unwrap(), "---\nstatus: \"to do\"\n---\n");
        assert_eq!(render_blank_note(&Mapping::new()).unwrap(), "---\n---\n");
    }

    #[test]
    fn titles_are_sanitized() {
        assert_eq!(sanitize_title("a/b:c?").unwrap(), "abc");
        assert_eq!(sanitize_title("..hidden. . ").unwrap(), "hidden");
        assert_eq!(sanitize_title("  ").unwrap(), "Untitled");
        assert_eq!(sanitize_title("com1").unwrap(), "Untitled");
        assert_eq!(sanitize_title("Console").unwrap(), "Console");
    }
}
