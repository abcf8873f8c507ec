//! Lossless editing of JSON files that may contain comments.
//!
//! `lean.json` is meant to be edited by hand and commonly carries `//` comments and
//! trailing commas. Rather than re-serializing the whole document, edits work on a
//! token stream: replacing a member only swaps the byte span of its value, and new
//! members are inserted after the last one with the same indentation. Everything
//! else (comments, whitespace, key order) is left exactly as it was.

use serde_json::{Map, Value};

/// Error produced by the tokenizer or the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsoncError {
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for JsoncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at byte {}", self.message, self.offset)
    }
}

impl std::error::Error for JsoncError {}

fn error(offset: usize, message: impl Into<String>) -> JsoncError {
    JsoncError {
        offset,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Whitespace,
    LineComment,
    BlockComment,
    String,
    Punct(u8),
    Literal,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

impl Token {
    fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, JsoncError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let kind = match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' => {
                while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n') {
                    i += 1;
                }
                TokenKind::Whitespace
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                TokenKind::LineComment
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = src[i + 2..]
                    .find("*/")
                    .ok_or_else(|| error(start, "unterminated block comment"))?;
                i += 2 + close + 2;
                TokenKind::BlockComment
            }
            b'"' => {
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(error(start, "unterminated string")),
                        Some(b'\\') => i += 2,
                        Some(b'"') => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                TokenKind::String
            }
            b @ (b'{' | b'}' | b'[' | b']' | b':' | b',') => {
                i += 1;
                TokenKind::Punct(b)
            }
            _ => {
                while i < bytes.len()
                    && !matches!(
                        bytes[i],
                        b' ' | b'\t' | b'\r' | b'\n' | b'{' | b'}' | b'[' | b']' | b':' | b',' | b'"' | b'/'
                    )
                {
                    i += 1;
                }
                if i == start {
                    return Err(error(start, "unexpected character"));
                }
                TokenKind::Literal
            }
        };
        tokens.push(Token { kind, start, end: i });
    }

    Ok(tokens)
}

/// Remove comments and trailing commas so the result is plain JSON.
pub fn strip(src: &str) -> Result<String, JsoncError> {
    let tokens = tokenize(src)?;
    let mut out = String::with_capacity(src.len());

    for (idx, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LineComment | TokenKind::BlockComment => {
                out.push(' ');
                continue;
            }
            TokenKind::Punct(b',') => {
                let next = tokens[idx + 1..].iter().find(|t| !t.is_trivia());
                if matches!(
                    next.map(|t| t.kind),
                    Some(TokenKind::Punct(b'}')) | Some(TokenKind::Punct(b']')) | None
                ) {
                    continue;
                }
            }
            _ => {}
        }
        out.push_str(&src[token.start..token.end]);
    }

    Ok(out)
}

/// Parse a JSONC document whose top level is an object.
pub fn parse_object(src: &str) -> Result<Map<String, Value>, JsoncError> {
    let plain = strip(src)?;
    match serde_json::from_str::<Value>(&plain) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(error(0, "top level value is not an object")),
        Err(e) => Err(error(0, e.to_string())),
    }
}

/// A member of the top-level object.
#[derive(Debug)]
struct Member {
    key: String,
    key_start: usize,
    value_start: usize,
    value_end: usize,
}

struct TopLevel {
    open_end: usize,
    close_start: usize,
    members: Vec<Member>,
    trailing_comma_end: Option<usize>,
}

fn scan_top_level(src: &str, tokens: &[Token]) -> Result<TopLevel, JsoncError> {
    let significant: Vec<&Token> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    let open = significant
        .first()
        .filter(|t| t.kind == TokenKind::Punct(b'{'))
        .ok_or_else(|| error(0, "expected an object"))?;

    let mut members = Vec::new();
    let mut trailing_comma_end = None;
    let mut pos = 1;

    loop {
        let token = significant
            .get(pos)
            .ok_or_else(|| error(src.len(), "unterminated object"))?;

        match token.kind {
            TokenKind::Punct(b'}') => {
                return Ok(TopLevel {
                    open_end: open.end,
                    close_start: token.start,
                    members,
                    trailing_comma_end,
                });
            }
            TokenKind::String => {
                let key: String = serde_json::from_str(&src[token.start..token.end])
                    .map_err(|e| error(token.start, format!("invalid key: {e}")))?;
                let colon = significant
                    .get(pos + 1)
                    .filter(|t| t.kind == TokenKind::Punct(b':'))
                    .ok_or_else(|| error(token.end, "expected ':'"))?;
                let value_first = significant
                    .get(pos + 2)
                    .ok_or_else(|| error(colon.end, "expected a value"))?;

                // Walk to the end of the value, tracking nesting.
                let mut depth = 0usize;
                let mut end_idx = pos + 2;
                loop {
                    let t = significant
                        .get(end_idx)
                        .ok_or_else(|| error(src.len(), "unterminated value"))?;
                    match t.kind {
                        TokenKind::Punct(b'{') | TokenKind::Punct(b'[') => depth += 1,
                        TokenKind::Punct(b'}') | TokenKind::Punct(b']') => {
                            if depth == 0 {
                                break;
                            }
                            depth -= 1;
                        }
                        TokenKind::Punct(b',') if depth == 0 => break,
                        _ => {}
                    }
                    end_idx += 1;
                }
                if end_idx == pos + 2 {
                    return Err(error(value_first.start, "expected a value"));
                }

                members.push(Member {
                    key,
                    key_start: token.start,
                    value_start: value_first.start,
                    value_end: significant[end_idx - 1].end,
                });

                let after = significant[end_idx];
                trailing_comma_end = None;
                if after.kind == TokenKind::Punct(b',') {
                    trailing_comma_end = Some(after.end);
                    pos = end_idx + 1;
                } else {
                    pos = end_idx;
                }
            }
            _ => return Err(error(token.start, "expected a key")),
        }
    }
}

/// Indentation of the line that `offset` sits on.
fn indentation_at(src: &str, offset: usize) -> Option<&str> {
    let line_start = src[..offset].rfind('\n').map(|i| i + 1)?;
    let indent = &src[line_start..offset];
    indent
        .chars()
        .all(|c| c == ' ' || c == '\t')
        .then_some(indent)
}

/// Set top-level `key` to `value`, preserving everything else in `src`.
pub fn set_member(src: &str, key: &str, value: &Value) -> Result<String, JsoncError> {
    let tokens = tokenize(src)?;
    let top = scan_top_level(src, &tokens)?;
    let rendered = serde_json::to_string(value).map_err(|e| error(0, e.to_string()))?;

    if let Some(member) = top.members.iter().rev().find(|m| m.key == key) {
        let mut out = String::with_capacity(src.len() + rendered.len());
        out.push_str(&src[..member.value_start]);
        out.push_str(&rendered);
        out.push_str(&src[member.value_end..]);
        return Ok(out);
    }

    let key_json = serde_json::to_string(key).map_err(|e| error(0, e.to_string()))?;

    let Some(last) = top.members.last() else {
        let mut out = String::with_capacity(src.len() + rendered.len() + key_json.len() + 8);
        out.push_str(&src[..top.open_end]);
        out.push_str(&format!("\n    {key_json}: {rendered}\n"));
        out.push_str(src[top.open_end..].trim_start_matches([' ', '\t', '\r', '\n']));
        return Ok(out);
    };

    let indent = indentation_at(src, last.key_start).unwrap_or("    ");
    let member_text = format!("\n{indent}{key_json}: {rendered}");

    let mut out = String::with_capacity(src.len() + member_text.len() + 1);
    match top.trailing_comma_end {
        Some(comma_end) => {
            // Keep the trailing comma style: the new member gets one as well.
            let insert_at = line_end_before(src, comma_end, top.close_start);
            out.push_str(&src[..insert_at]);
            out.push_str(&member_text);
            out.push(',');
            out.push_str(&src[insert_at..]);
        }
        None => {
            let insert_at = line_end_before(src, last.value_end, top.close_start);
            out.push_str(&src[..last.value_end]);
            out.push(',');
            out.push_str(&src[last.value_end..insert_at]);
            out.push_str(&member_text);
            out.push_str(&src[insert_at..]);
        }
    }
    Ok(out)
}

/// End of the line starting at `from`, unless the object closes on that line.
fn line_end_before(src: &str, from: usize, close_start: usize) -> usize {
    match src[from..].find('\n') {
        Some(rel) if from + rel < close_start => {
            let end = from + rel;
            // Keep a "\r\n" pair together.
            if end > from && src.as_bytes()[end - 1] == b'\r' {
                end - 1
            } else {
                end
            }
        }
        _ => from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
    // The id of the organization
    "organization-id": "abc",

    /* data folder */
    "data-folder": "data", // trailing note
    "job-user-id": "0"
}
"#;

    #[test]
    fn test_parse_with_comments_and_trailing_comma() {
        let map = parse_object("{\n  // note\n  \"a\": 1,\n  \"b\": [1, 2,],\n}\n").unwrap();
        assert_eq!(map["a"], json!(1));
        assert_eq!(map["b"], json!([1, 2]));
    }

    #[test]
    fn test_replace_keeps_comments() {
        let edited = set_member(SAMPLE, "organization-id", &json!("xyz")).unwrap();
        assert!(edited.contains("// The id of the organization"));
        assert!(edited.contains("/* data folder */"));
        assert!(edited.contains("\"organization-id\": \"xyz\","));
        assert!(edited.contains("// trailing note"));
        assert_eq!(parse_object(&edited).unwrap()["organization-id"], json!("xyz"));
    }

    #[test]
    fn test_value_with_quote_comma_sequence() {
        let src = "{\n    \"description\": \"a\\\", b\",\n    \"organization-id\": \"1\"\n}\n";
        let edited = set_member(src, "description", &json!("x\", y")).unwrap();
        let map = parse_object(&edited).unwrap();
        assert_eq!(map["description"], json!("x\", y"));
        assert_eq!(map["organization-id"], json!("1"));
    }

    #[test]
    fn test_insert_new_member_uses_indentation() {
        let edited = set_member(SAMPLE, "python-venv", &json!(3)).unwrap();
        assert!(edited.contains("\"job-user-id\": \"0\",\n    \"python-venv\": 3\n}"));
        assert_eq!(parse_object(&edited).unwrap()["python-venv"], json!(3));
    }

    #[test]
    fn test_insert_after_trailing_comment() {
        let src = "{\n  \"a\": 1 // one\n}\n";
        let edited = set_member(src, "b", &json!(2)).unwrap();
        assert_eq!(edited, "{\n  \"a\": 1, // one\n  \"b\": 2\n}\n");
    }

    #[test]
    fn test_insert_with_trailing_comma() {
        let src = "{\n  \"a\": 1,\n}\n";
        let edited = set_member(src, "b", &json!(2)).unwrap();
        assert_eq!(edited, "{\n  \"a\": 1,\n  \"b\": 2,\n}\n");
    }

    #[test]
    fn test_insert_into_empty_object() {
        let edited = set_member("{}", "a", &json!(true)).unwrap();
        assert_eq!(edited, "{\n    \"a\": true\n}");
    }

    #[test]
    fn test_replace_nested_value() {
        let src = "{\"a\": {\"x\": [1, {\"y\": 2}]}, \"b\": 3}";
        let edited = set_member(src, "a", &json!(null)).unwrap();
        assert_eq!(edited, "{\"a\": null, \"b\": 3}");
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(set_member("{\"a\": \"oops}", "a", &json!(1)).is_err());
    }
}
