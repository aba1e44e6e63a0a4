use std::io::{self, IsTerminal, Read, Write};

use anyhow::{Context, Result, bail};

/// Positional argument, or all of stdin when it is piped in.
pub fn arg_or_stdin(arg: Option<String>, what: &str) -> Result<String> {
    if let Some(v) = arg {
        return Ok(v);
    }
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        bail!("No {what} given (pass it as an argument or pipe it on stdin)");
    }
    let mut input = String::new();
    stdin
        .read_to_string(&mut input)
        .context("Failed to read stdin")?;
    Ok(input)
}

pub fn print_flush(text: &str) {
    print!("{text}");
    let _ = io::stdout().flush();
}

pub fn truncate_preview(text: &str, max_len: usize) -> String {
    truncate_with_suffix(text, max_len, "...")
}

pub fn truncate_with_suffix(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut_at, _)) => format!("{}{}", &text[..cut_at], suffix),
        None => text.to_string(),
    }
}

pub fn prefix_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut_at, _)) => text[..cut_at].to_string(),
        None => text.to_string(),
    }
}
