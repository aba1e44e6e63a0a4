use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+\-]*").expect("valid fence regex"));

static SHELL_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:mkdir|touch|echo)\b|\brm\s+-rf\b|\bmv\s+").expect("valid shell hint regex")
});

static ECHO_APPEND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^echo\s+(?:"(.*)"|'(.*)'|(.*?))\s*>>\s*(.+)$"#).expect("valid echo regex")
});

static ECHO_WRITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^echo\s+(?:"(.*)"|'(.*)'|(.*?))\s*>\s*(.+)$"#).expect("valid echo regex")
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedActions {
    pub actions: Vec<Value>,
    pub reply_prefix: String,
}

/// Removes Markdown code fence markers (with any language tag) and trims.
pub fn strip_fences(text: &str) -> String {
    FENCE_RE.replace_all(text, "").trim().to_string()
}

/// Pulls a JSON action list out of free-form model output. Never fails: any
/// parse problem degrades to an empty list with the text kept as the reply.
pub fn parse_actions_from_text(text: &str) -> ParsedActions {
    let cleaned = strip_fences(text);

    if let Some(start) = cleaned.find('[')
        && let Some(end) = find_matching(&cleaned, start, b'[', b']')
        && let Some(actions) = parse_action_json(&cleaned[start..=end])
    {
        return ParsedActions {
            actions,
            reply_prefix: cleaned[..start].trim().to_string(),
        };
    }

    if let Some(actions) = parse_action_json(&cleaned) {
        return ParsedActions {
            actions,
            reply_prefix: String::new(),
        };
    }

    salvage_objects(&cleaned)
}

fn parse_action_json(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Array(items) => Some(items),
        obj @ Value::Object(_) => Some(vec![obj]),
        _ => None,
    }
}

fn salvage_objects(cleaned: &str) -> ParsedActions {
    let bytes = cleaned.as_bytes();
    let mut actions = Vec::new();
    let mut reply = String::new();
    let mut copied_to = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let Some(end) = find_matching(cleaned, i, b'{', b'}') else {
            i += 1;
            continue;
        };
        match serde_json::from_str::<Value>(&cleaned[i..=end]) {
            Ok(value @ Value::Object(_)) => {
                actions.push(value);
                reply.push_str(&cleaned[copied_to..i]);
                copied_to = end + 1;
                i = end + 1;
            }
            _ => i += 1,
        }
    }
    reply.push_str(&cleaned[copied_to..]);
    ParsedActions {
        actions,
        reply_prefix: reply.trim().to_string(),
    }
}

/// Index of the bracket closing the one at `start`, skipping brackets inside
/// JSON string literals.
pub fn find_matching(text: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start).copied() != Some(open) {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            if depth == 0 {
                return None;
            }
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Flattens nested arrays and `{"actions": [...]}` wrappers into a flat list.
pub fn flatten_actions(values: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::new();
    for value in values {
        collect_flat(value, &mut out);
    }
    out
}

fn collect_flat(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_flat(item, out);
            }
        }
        Value::Object(mut map)
            if !map.contains_key("action") && map.get("actions").is_some_and(Value::is_array) =>
        {
            if let Some(inner) = map.remove("actions") {
                collect_flat(inner, out);
            }
        }
        other => out.push(other),
    }
}

/// True when the text mentions one of the shell verbs the recognizer or the
/// conversion pass can turn into actions.
pub fn looks_shell_like(text: &str) -> bool {
    SHELL_HINT_RE.is_match(text)
}

/// Converts common shell one-liners into action descriptors without asking
/// the model again.
pub fn quick_shell_to_actions(text: &str) -> Vec<Value> {
    let cleaned = strip_fences(text);
    let mut actions = Vec::new();
    for line in cleaned.lines() {
        for command in split_chain(line) {
            shell_line_to_actions(&command, &mut actions);
        }
    }
    actions
}

fn split_chain(line: &str) -> Vec<String> {
    let line = line.trim();
    let line = line.strip_prefix("$ ").unwrap_or(line);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, ';') => out.push(std::mem::take(&mut current)),
            (None, '&') if chars.peek() == Some(&'&') => {
                chars.next();
                out.push(std::mem::take(&mut current));
            }
            (None, c) => current.push(c),
        }
    }
    out.push(current);
    out.into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn shell_line_to_actions(line: &str, out: &mut Vec<Value>) {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return;
    };
    let rest = line[verb.len()..].trim();

    match verb.to_ascii_lowercase().as_str() {
        "mkdir" => {
            for path in split_args(rest).into_iter().filter(|a| !a.starts_with('-')) {
                out.push(json!({"action": "mkdir", "path": path}));
            }
        }
        "touch" => {
            for path in split_args(rest).into_iter().filter(|a| !a.starts_with('-')) {
                out.push(json!({"action": "write", "path": path, "content": ""}));
            }
        }
        "echo" => {
            if let Some((content, path)) = echo_redirect(&ECHO_APPEND_RE, line) {
                out.push(json!({"action": "append", "path": path, "content": content}));
            } else if let Some((content, path)) = echo_redirect(&ECHO_WRITE_RE, line) {
                out.push(json!({"action": "write", "path": path, "content": content}));
            }
        }
        "rm" => {
            let args = split_args(rest);
            let recursive = args
                .iter()
                .any(|a| a.starts_with('-') && a.contains('r') && a.contains('f'));
            if recursive {
                for path in args.into_iter().filter(|a| !a.starts_with('-')) {
                    out.push(json!({"action": "delete", "path": path}));
                }
            }
        }
        "mv" => {
            let args: Vec<String> = split_args(rest)
                .into_iter()
                .filter(|a| !a.starts_with('-'))
                .collect();
            if let [src, dest] = args.as_slice() {
                out.push(json!({"action": "move", "path": src, "dest": dest}));
            }
        }
        _ => {}
    }
}

fn echo_redirect(re: &Regex, line: &str) -> Option<(String, String)> {
    let caps = re.captures(line)?;
    let content = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let path = unquote(caps.get(4)?.as_str().trim());
    if path.is_empty() || path.starts_with('>') {
        return None;
    }
    Some((content, path))
}

fn split_args(rest: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in rest.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => quote = Some(ch),
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            (None, c) => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}
