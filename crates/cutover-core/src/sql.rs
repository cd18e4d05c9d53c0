//! Splitting SQL files into statements.
//!
//! A statement ends at a `;` that terminates a line. Leading `--` lines and
//! `/* */` blocks are stripped, and chunks that are only comments are
//! dropped. Dollar-quoted bodies (`$$ ... $$`, `$fn$ ... $fn$`) are never
//! split, so function definitions survive intact.

/// Maximum length of a statement preview in logs and errors.
const PREVIEW_LEN: usize = 100;

/// Split a SQL script into executable statements, without trailing `;`.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut dollar: Option<String> = None;

    for line in sql.lines() {
        dollar = scan_dollar_quotes(line, dollar);
        if dollar.is_none() {
            if let Some(body) = line.trim_end().strip_suffix(';') {
                current.push_str(body);
                push_statement(&mut statements, &current);
                current.clear();
                continue;
            }
        }
        current.push_str(line);
        current.push('\n');
    }
    push_statement(&mut statements, &current);
    statements
}

/// Whether a statement changes schema. Failures of these halt a phase.
pub fn is_ddl(statement: &str) -> bool {
    let upper = statement.to_uppercase();
    ["CREATE", "ALTER", "DROP"].iter().any(|kw| upper.contains(kw))
}

/// A single-line prefix of a statement for logs.
pub fn preview(statement: &str) -> String {
    let flat = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_LEN) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

fn push_statement(out: &mut Vec<String>, chunk: &str) {
    let body = strip_leading_comments(chunk).trim();
    if !body.is_empty() {
        out.push(body.to_string());
    }
}

fn strip_leading_comments(mut text: &str) -> &str {
    loop {
        text = text.trim_start();
        if let Some(rest) = text.strip_prefix("--") {
            text = rest.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(rest) = text.strip_prefix("/*") {
            text = rest.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            return text;
        }
    }
}

/// Track dollar-quote state across one line. Returns the open tag, if any.
fn scan_dollar_quotes(line: &str, mut open: Option<String>) -> Option<String> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if open.is_none() && bytes[i..].starts_with(b"--") {
            break;
        }
        if bytes[i] == b'$' {
            if let Some(len) = dollar_tag_len(&bytes[i..]) {
                let tag = &line[i..i + len];
                open = match open {
                    None => Some(tag.to_string()),
                    Some(current) if current == tag => None,
                    still_open => still_open,
                };
                i += len;
                continue;
            }
        }
        i += 1;
    }
    open
}

/// Length of a `$tag$` token at the start of `bytes`, if there is one.
fn dollar_tag_len(bytes: &[u8]) -> Option<usize> {
    let inner = &bytes[1..];
    let end = inner.iter().position(|&b| b == b'$')?;
    let tag = &inner[..end];
    let valid = tag.first().map_or(true, |b| !b.is_ascii_digit())
        && tag.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_');
    valid.then_some(end + 2)
}
