//! User-defined agent definition files.
//!
//! A definition is plain text: a key/value header block delimited by
//! `---` lines, then a free-form body that becomes the system prompt.
//!
//! ```text
//! ---
//! name: reviewer
//! description: Reviews diffs for style and correctness
//! tools: Read, Grep, Glob
//! mcpServers: memory, task-management
//! model: sonnet
//! ---
//! You review changes before they land…
//! ```
//!
//! Recognized keys: `name`, `description`, `mcpServers`, `tools`,
//! `model`. Lists may be comma-separated or bracketed. Missing `name`,
//! missing `description` or an empty body is a parse error.

use serde::{Deserialize, Serialize};

use super::{AgentConfiguration, PermissionMode};
use crate::error::{Result, StarlingError};

/// Parsed user-defined agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub mcp_servers: Vec<String>,
    pub tools: Vec<String>,
    pub model: Option<String>,
    pub body: String,
}

impl AgentDefinition {
    pub fn parse(text: &str) -> Result<Self> {
        let (header, body) = split_header(text)?;

        let mut name = None;
        let mut description = None;
        let mut mcp_servers = Vec::new();
        let mut tools = Vec::new();
        let mut model = None;

        for line in header.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "name" => name = Some(value.to_string()),
                "description" => description = Some(value.to_string()),
                "mcpServers" => mcp_servers = parse_list(value),
                "tools" => tools = parse_list(value),
                "model" => model = Some(value.to_string()),
                _ => {}
            }
        }

        let name = name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StarlingError::config("agent definition is missing name"))?;
        let description = description
            .filter(|description| !description.is_empty())
            .ok_or_else(|| StarlingError::config("agent definition is missing description"))?;
        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(StarlingError::config("agent definition has an empty body"));
        }

        Ok(Self {
            name,
            description,
            mcp_servers,
            tools,
            model,
            body,
        })
    }

    /// Convert into a launchable configuration.
    pub fn into_configuration(self) -> AgentConfiguration {
        let mut configuration =
            AgentConfiguration::new(format!("user:{}", self.name), self.body);
        if !self.mcp_servers.is_empty() {
            configuration.tool_servers = self.mcp_servers;
        }
        if !self.tools.is_empty() {
            configuration.allowed_tools = Some(self.tools);
        }
        configuration.model = self.model;
        configuration.permission_mode = PermissionMode::Default;
        configuration
    }
}

/// Split the header block from the body. The leading `---` is optional;
/// the closing one is required when a header exists.
fn split_header(text: &str) -> Result<(String, String)> {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("---") {
        let Some(end) = rest.find("\n---") else {
            return Err(StarlingError::config(
                "agent definition header is not closed",
            ));
        };
        let header = rest[..end].to_string();
        let body = rest[end + 4..].to_string();
        return Ok((header, body));
    }
    // Headerless form: key/value lines until the first blank line.
    match trimmed.split_once("\n\n") {
        Some((header, body)) => Ok((header.to_string(), body.to_string())),
        None => Ok((trimmed.to_string(), String::new())),
    }
}

/// Parse `a, b, c` or `[a, b, c]` into a list.
fn parse_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "---\nname: reviewer\ndescription: Reviews diffs\ntools: Read, Grep\nmcpServers: [memory, task-management]\nmodel: sonnet\n---\nYou review changes before they land.\n";

    #[test]
    fn parses_complete_definition() {
        let definition = AgentDefinition::parse(VALID).unwrap();
        assert_eq!(definition.name, "reviewer");
        assert_eq!(definition.description, "Reviews diffs");
        assert_eq!(definition.tools, vec!["Read", "Grep"]);
        assert_eq!(definition.mcp_servers, vec!["memory", "task-management"]);
        assert_eq!(definition.model.as_deref(), Some("sonnet"));
        assert_eq!(definition.body, "You review changes before they land.");
    }

    #[test]
    fn missing_name_is_rejected() {
        let text = "---\ndescription: d\n---\nbody\n";
        assert!(AgentDefinition::parse(text).is_err());
    }

    #[test]
    fn missing_description_is_rejected() {
        let text = "---\nname: n\n---\nbody\n";
        assert!(AgentDefinition::parse(text).is_err());
    }

    #[test]
    fn empty_body_is_rejected() {
        let text = "---\nname: n\ndescription: d\n---\n   \n";
        assert!(AgentDefinition::parse(text).is_err());
    }

    #[test]
    fn unclosed_header_is_rejected() {
        let text = "---\nname: n\ndescription: d\nbody without closing";
        assert!(AgentDefinition::parse(text).is_err());
    }

    #[test]
    fn headerless_form_splits_on_blank_line() {
        let text = "name: quick\ndescription: short\n\nthe prompt body";
        let definition = AgentDefinition::parse(text).unwrap();
        assert_eq!(definition.name, "quick");
        assert_eq!(definition.body, "the prompt body");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let text = "---\nname: n\ndescription: d\ncolor: blue\n---\nbody\n";
        let definition = AgentDefinition::parse(text).unwrap();
        assert_eq!(definition.name, "n");
    }

    #[test]
    fn converts_into_configuration() {
        let configuration = AgentDefinition::parse(VALID).unwrap().into_configuration();
        assert_eq!(configuration.id, "user:reviewer");
        assert_eq!(configuration.system_prompt, "You review changes before they land.");
        assert_eq!(
            configuration.allowed_tools,
            Some(vec!["Read".to_string(), "Grep".to_string()])
        );
        assert_eq!(configuration.tool_servers, vec!["memory", "task-management"]);
    }
}
