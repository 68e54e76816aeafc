//! Recovery pipeline for model replies that are almost, but not quite,
//! JSON: code fences, prose around the object, stray control characters
//! inside string literals.

use serde::de::DeserializeOwned;

use super::LlmError;

pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let stripped = strip_code_fences(raw);
    let body = last_balanced_object(stripped).unwrap_or(stripped);
    let cleaned = remove_problem_chars(body);
    let escaped = escape_control_chars_in_strings(&cleaned);

    serde_json::from_str(escaped.trim()).map_err(|err| LlmError::Parse(err.to_string()))
}

/// Cuts the payload out of ```json fences, or plain ``` fences, when the
/// model wrapped its answer.
fn strip_code_fences(raw: &str) -> &str {
    if let Some(after) = raw.split_once("```json").map(|(_, rest)| rest) {
        return after.split("```").next().unwrap_or(after).trim();
    }
    if let Some(after) = raw.split_once("```").map(|(_, rest)| rest) {
        return after.split("```").next().unwrap_or(after).trim();
    }
    raw.trim()
}

/// The last complete top-level `{...}` in the text. Models sometimes echo an
/// example object first and the real answer last, so the last one wins.
fn last_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    let mut last_range = None;

    for (i, b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *b == b'\\' {
                escaped = true;
            } else if *b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0
                        && let Some(s) = start
                    {
                        last_range = Some((s, i + 1));
                    }
                }
            }
            _ => {}
        }
    }

    last_range.map(|(s, e)| &text[s..e])
}

/// BOM and NUL vanish, vertical tab and form feed become spaces.
fn remove_problem_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\0'))
        .map(|c| match c {
            '\u{000B}' | '\u{000C}' => ' ',
            other => other,
        })
        .collect()
}

/// serde_json refuses raw control characters inside string literals, which
/// models emit freely (unescaped newlines in card text). Escape the common
/// ones and drop the rest, leaving everything outside strings untouched.
fn escape_control_chars_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => {
                    out.push(c);
                    escaped = true;
                }
                '"' => {
                    out.push(c);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {}
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Reply {
        hotness: f64,
        #[serde(default)]
        text: String,
    }

    #[test]
    fn parses_plain_json() {
        let reply: Reply = parse_json_reply(r#"{"hotness": 0.5}"#).unwrap();
        assert_eq!(reply.hotness, 0.5);
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Sure, here you go:\n```json\n{\"hotness\": 0.7}\n```\nHope it helps!";
        let reply: Reply = parse_json_reply(raw).unwrap();
        assert_eq!(reply.hotness, 0.7);
    }

    #[test]
    fn takes_the_last_balanced_object() {
        let raw = r#"Example: {"hotness": 0.1}. Final answer: {"hotness": 0.9}"#;
        let reply: Reply = parse_json_reply(raw).unwrap();
        assert_eq!(reply.hotness, 0.9);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let raw = r#"{"hotness": 0.4, "text": "see {this}"}"#;
        let reply: Reply = parse_json_reply(raw).unwrap();
        assert_eq!(reply.text, "see {this}");
    }

    #[test]
    fn tolerates_raw_control_characters_in_strings() {
        let raw = "{\"hotness\": 0.3, \"text\": \"line one\nline two\u{0}\"}";
        let reply: Reply = parse_json_reply(raw).unwrap();
        assert_eq!(reply.text, "line one\nline two");
    }

    #[test]
    fn strips_bom_and_vertical_tab() {
        let raw = "\u{FEFF}{\"hotness\": 0.2, \"text\": \"a\u{000B}b\"}";
        let reply: Reply = parse_json_reply(raw).unwrap();
        assert_eq!(reply.text, "a b");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_json_reply::<Reply>("no json here").unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }
}
