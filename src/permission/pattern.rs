//! Permission pattern matching and inference.
//!
//! A pattern has the textual form `Tool(arg)`. The prefix before the first
//! `(` is a regex over the tool name; the argument region (up to the last
//! `)`) is interpreted per tool kind: a command matcher for shell tools, a
//! glob for file tools, `domain:`/`query:` forms for web tools, and a bare
//! `*` that matches any input.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::command::{
    first_token, is_cd_within_working_dir, is_safe_filter, split_pipeline, split_sequence,
    tokenize,
};

static FILE_TOOLS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["Write", "Edit", "MultiEdit", "Read", "NotebookEdit", "Glob"]);

/// A parsed `Tool(arg)` permission pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPattern {
    pub tool: String,
    pub arg: Option<String>,
}

impl PermissionPattern {
    /// Parse the textual form. `Bash(find:*)` → tool `Bash`, arg `find:*`;
    /// a bare `WebFetch` has no argument constraint.
    pub fn parse(pattern: &str) -> Self {
        match pattern.split_once('(') {
            Some((tool, rest)) => {
                let arg = rest.rfind(')').map(|end| rest[..end].to_string());
                Self {
                    tool: tool.trim().to_string(),
                    arg: arg.or_else(|| Some(rest.to_string())),
                }
            }
            None => Self {
                tool: pattern.trim().to_string(),
                arg: None,
            },
        }
    }

    fn tool_matches(&self, tool_name: &str) -> bool {
        if self.tool == tool_name {
            return true;
        }
        Regex::new(&format!("^(?:{})$", self.tool))
            .map(|re| re.is_match(tool_name))
            .unwrap_or(false)
    }
}

/// Match a pattern against a concrete `(tool, input)` invocation.
pub fn matches(
    pattern: &str,
    tool_name: &str,
    input: &Value,
    working_directory: &Path,
) -> bool {
    let parsed = PermissionPattern::parse(pattern);
    if !parsed.tool_matches(tool_name) {
        return false;
    }
    let Some(arg) = parsed.arg.as_deref() else {
        return true;
    };
    if arg == "*" || arg.is_empty() {
        return true;
    }

    if is_shell_tool(tool_name) {
        let command = input.get("command").and_then(Value::as_str).unwrap_or("");
        return bash_arg_matches(arg, command, working_directory);
    }
    if is_file_tool(tool_name) {
        let Some(path) = file_path_from_input(input) else {
            return false;
        };
        return glob_match(arg, &path);
    }
    if tool_name == "WebFetch" {
        let url = input.get("url").and_then(Value::as_str).unwrap_or("");
        if let Some(domain) = arg.strip_prefix("domain:") {
            let Some(host) = url_host(url) else {
                return false;
            };
            return host == domain || host.ends_with(&format!(".{}", domain));
        }
        return regex_search(arg, url);
    }
    if tool_name == "WebSearch" {
        if let Some(query_pattern) = arg.strip_prefix("query:") {
            let query = input.get("query").and_then(Value::as_str).unwrap_or("");
            return regex_search(query_pattern, query);
        }
        let url = input.get("url").and_then(Value::as_str).unwrap_or("");
        return regex_search(arg, url);
    }

    // Other tools: match the argument regex against the serialized input.
    regex_search(arg, &input.to_string())
}

pub fn is_shell_tool(tool_name: &str) -> bool {
    tool_name == "Bash" || tool_name.to_ascii_lowercase().contains("bash")
}

pub fn is_file_tool(tool_name: &str) -> bool {
    FILE_TOOLS.contains(&tool_name)
}

pub fn file_path_from_input(input: &Value) -> Option<String> {
    for key in [
        "file_path",
        "filePath",
        "notebook_path",
        "notebookPath",
        "path",
    ] {
        if let Some(path) = input.get(key).and_then(Value::as_str) {
            return Some(path.to_string());
        }
    }
    None
}

/// Shell-argument matching over the parsed compound command.
///
/// Every sequenced part must either be a `cd` that stays in the working
/// directory or match the argument; a pipeline matches when at least one
/// segment matches and every other segment is a safe filter.
fn bash_arg_matches(arg: &str, command: &str, working_directory: &Path) -> bool {
    let sequenced = split_sequence(command);
    if sequenced.is_empty() {
        return false;
    }
    for part in sequenced {
        if first_token(&part).as_deref() == Some("cd")
            && is_cd_within_working_dir(&part, working_directory)
        {
            continue;
        }
        let pipeline = split_pipeline(&part);
        let mut matched_any = false;
        let mut rest_safe = true;
        for segment in &pipeline {
            if command_arg_matches(arg, segment) {
                matched_any = true;
            } else if !is_safe_filter(segment) {
                rest_safe = false;
            }
        }
        if !(matched_any && rest_safe) {
            return false;
        }
    }
    true
}

/// Match one pipeline segment against the pattern argument.
///
/// The `prefix:*` form means "this command, any arguments"; anything else
/// is a regex searched over the segment text.
fn command_arg_matches(arg: &str, segment: &str) -> bool {
    if let Some(prefix) = arg.strip_suffix(":*") {
        return segment == prefix || segment.starts_with(&format!("{} ", prefix));
    }
    regex_search(arg, segment)
}

fn regex_search(pattern: &str, text: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Glob matching with `**` spanning separators, `*` stopping at them and
/// `?` matching one character.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let mut regex = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                regex.push_str(".*");
                i += 2;
            }
            '*' => {
                regex.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex.push_str("[^/]");
                i += 1;
            }
            c => {
                regex.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    regex.push('$');
    Regex::new(&regex)
        .map(|re| re.is_match(path))
        .unwrap_or(false)
}

/// Extract the host from a URL without a full parser.
pub fn url_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Infer the narrowest reusable pattern for a concrete invocation.
pub fn infer_pattern(tool_name: &str, input: &Value) -> String {
    if is_shell_tool(tool_name) {
        let command = input.get("command").and_then(Value::as_str).unwrap_or("");
        return infer_bash_pattern(tool_name, command);
    }
    if is_file_tool(tool_name) {
        let Some(path) = file_path_from_input(input) else {
            return format!("{}(*)", tool_name);
        };
        let dir = Path::new(&path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if dir.is_empty() || dir == "." {
            return format!("{}(**)", tool_name);
        }
        return format!("{}({}/**)", tool_name, dir);
    }
    if tool_name == "WebFetch" {
        if let Some(host) = input
            .get("url")
            .and_then(Value::as_str)
            .and_then(url_host)
        {
            return format!("WebFetch(domain:{})", host);
        }
    }
    format!("{}(*)", tool_name)
}

/// Take the leading tokens of the first non-`cd` part up to the first flag
/// or path argument.
fn infer_bash_pattern(tool_name: &str, command: &str) -> String {
    let part = split_sequence(command)
        .into_iter()
        .find(|part| first_token(part).as_deref() != Some("cd"));
    let Some(part) = part else {
        return format!("{}(*)", tool_name);
    };
    let segment = split_pipeline(&part).into_iter().next().unwrap_or(part);

    let mut kept = Vec::new();
    for (index, token) in tokenize(&segment).into_iter().enumerate() {
        if index > 0 && looks_like_flag_or_path(&token) {
            break;
        }
        kept.push(token);
    }
    if kept.is_empty() {
        return format!("{}(*)", tool_name);
    }
    format!("{}({}:*)", tool_name, kept.join(" "))
}

fn looks_like_flag_or_path(token: &str) -> bool {
    token.starts_with('-')
        || token.starts_with('/')
        || token.starts_with('.')
        || token.starts_with('~')
        || token.starts_with('$')
        || token.contains('/')
        || token.contains('=')
}
