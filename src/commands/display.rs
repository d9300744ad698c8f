//! Terminal rendering of flow state, history and discovery results

use std::collections::BTreeMap;

use colored::Colorize;
use prettytable::{format, row, Table};
use serde_json::Value;

use crate::auth::discovery::DiscoveryResult;
use crate::error::PlaygroundError;
use crate::flow::{FlowState, HistoryEntry, Playground, Step};
use crate::mcp::ToolDescriptor;

/// Number of history entries per step, for diffing before/after a command
pub fn history_counts(state: &FlowState) -> BTreeMap<u8, usize> {
    state
        .history
        .iter()
        .map(|(step, entries)| (*step, entries.len()))
        .collect()
}

/// Print every entry appended since `before` was taken
pub fn print_new_entries(state: &FlowState, before: &BTreeMap<u8, usize>) {
    for (step, entries) in &state.history {
        let seen = before.get(step).copied().unwrap_or(0);
        for entry in entries.iter().skip(seen) {
            print_entry(*step, entry);
        }
    }
}

/// Pretty JSON, or the raw text for string bodies
pub fn render_body(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn print_entry(step: u8, entry: &HistoryEntry) {
    let kind = entry
        .kind
        .map(|k| k.to_string())
        .unwrap_or_else(|| "request".to_string());
    let label = match &entry.tool {
        Some(tool) => format!("{} ({})", kind, tool),
        None => kind,
    };

    println!();
    println!("{} {}", format!("[step {}]", step).dimmed(), label.bold());
    println!(
        "{} {} {}",
        "→".cyan(),
        entry.request.method.cyan().bold(),
        entry.request.url
    );
    for (name, value) in &entry.request.headers {
        println!("  {}: {}", name.dimmed(), value);
    }
    if let Some(body) = &entry.request.body {
        if !body.is_null() {
            println!("{}", indent(&render_body(body)));
        }
    }

    let status = format!("{} {}", entry.response.status, entry.response.status_text);
    let status = if entry.response.is_success() {
        status.green().bold()
    } else if entry.response.status >= 400 {
        status.red().bold()
    } else {
        status.yellow().bold()
    };
    println!("{} {}", "←".cyan(), status);
    for (name, value) in &entry.response.headers {
        println!("  {}: {}", name.dimmed(), value);
    }
    if !entry.response.body.is_null() {
        println!("{}", indent(&render_body(&entry.response.body)));
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Table of fallback discovery results, numbered from 1
pub fn print_discovery_results(results: &[DiscoveryResult]) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["#".bold(), "URL".bold(), "Status".bold(), "Type".bold(), "Usable".bold()]);

    for (i, result) in results.iter().enumerate() {
        let kind = result.metadata_type.map(|t| t.label()).unwrap_or("-");
        let usable = if result.success {
            "yes".green()
        } else {
            "no".red()
        };
        table.add_row(row![i + 1, result.url, result.status, kind, usable]);
    }

    println!();
    table.printstd();
    if results.iter().any(|r| r.success) {
        println!(
            "Adopt one with {}",
            "discover --select <#>".cyan()
        );
    } else {
        println!("{}", "No metadata document was found.".yellow());
    }
}

/// Steps with their reachability, and the values collected so far
pub fn print_status(playground: &Playground) {
    let state = playground.state();
    let furthest = playground.furthest_step();

    println!();
    for step in Step::ALL {
        let marker = if step.index() == state.current_step {
            "▶".green().bold()
        } else if step.index() <= furthest {
            "✓".cyan()
        } else {
            "·".dimmed()
        };
        let title = step.to_string();
        let title = if step.index() <= furthest {
            title.normal()
        } else {
            title.dimmed()
        };
        println!("  {} {}", marker, title);
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);
    let mut field = |name: &str, value: Option<String>| {
        let value = value.unwrap_or_else(|| "-".dimmed().to_string());
        table.add_row(row![name.bold(), value]);
    };

    field("Server", Some(state.mcp_server_url.clone()).filter(|s| !s.is_empty()));
    field("Request mode", Some(state.request_mode.to_string()));
    field("WWW-Authenticate", state.www_authenticate.clone());
    field("Resource metadata URL", state.resource_metadata_url.clone());
    field("Authorization server", state.authorization_server_url.clone());
    field(
        "OAuth metadata",
        state.oauth_metadata.as_ref().map(|_| {
            if state.oauth_metadata_from_fallback {
                "loaded (fallback discovery)".to_string()
            } else {
                "loaded".to_string()
            }
        }),
    );
    field("Client ID", state.client_id.clone());
    field("Client secret", state.client_secret.as_ref().map(|_| "set".to_string()));
    field("Code challenge", state.code_challenge.clone());
    field("Authorization code", state.authorization_code.clone());
    field("Access token", state.access_token.clone());
    field("Token type", state.token_type.clone());
    field("Expires in", state.expires_in.map(|s| format!("{}s", s)));
    field("MCP session", state.mcp_session_id.clone());
    field(
        "Tools",
        (!state.tools.is_empty()).then(|| state.tools.len().to_string()),
    );
    field(
        "Selected tool",
        state.selected_tool.as_ref().map(|t| t.name.clone()),
    );
    field("History entries", Some(state.history_len().to_string()));

    println!();
    table.printstd();
    if playground.persistence_degraded() {
        println!("{}", "State could not be saved; changes are kept in memory only.".yellow());
    }
}

/// Recorded exchanges, for one step or all of them
pub fn print_history(state: &FlowState, step: Option<u8>) {
    let mut printed = 0;
    for (entry_step, entries) in &state.history {
        if step.is_some_and(|s| s != *entry_step) {
            continue;
        }
        for entry in entries {
            print_entry(*entry_step, entry);
            printed += 1;
        }
    }
    if printed == 0 {
        println!("{}", "No requests recorded.".yellow());
    }
}

/// Table of listed tools
pub fn print_tools(tools: &[ToolDescriptor]) {
    if tools.is_empty() {
        println!("{}", "The server lists no tools.".yellow());
        return;
    }
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Name".bold(), "Description".bold()]);
    for tool in tools {
        table.add_row(row![tool.name.cyan(), tool.description.as_deref().unwrap_or("")]);
    }
    println!();
    table.printstd();
}

/// Print an error with a recovery hint where one applies
pub fn print_error(error: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let Some(error) = error.downcast_ref::<PlaygroundError>() else {
        return;
    };
    let hint = match error {
        e if e.suggests_mode_switch() => Some("try `mode proxy` or `mode extension`"),
        PlaygroundError::RegistrationUnsupported | PlaygroundError::RegistrationFailed { .. } => {
            Some("enter credentials with `credentials --client-id <ID>`")
        }
        PlaygroundError::StateMismatch { .. } => Some("run `prepare` again and restart authorization"),
        PlaygroundError::StepLocked { .. } | PlaygroundError::GateNotSatisfied { .. } => {
            Some("`status` shows which steps are reachable")
        }
        _ => None,
    };
    if let Some(hint) = hint {
        eprintln!("{} {}", "Hint:".yellow(), hint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::HistoryKind;
    use crate::transport::{Exchange, OutboundRequest, ResponseRecord};
    use serde_json::json;

    fn entry() -> HistoryEntry {
        HistoryEntry::new(
            HistoryKind::Probe,
            Exchange {
                request: OutboundRequest::get_json("https://mcp.example.com"),
                response: ResponseRecord {
                    status: 401,
                    status_text: "Unauthorized".to_string(),
                    headers: BTreeMap::new(),
                    body: Value::Null,
                },
                duration: 1,
            },
        )
    }

    #[test]
    fn test_history_counts() {
        let mut state = FlowState::default();
        state.history.insert(1, vec![entry(), entry()]);
        state.history.insert(6, vec![entry()]);
        let counts = history_counts(&state);
        assert_eq!(counts.get(&1), Some(&2));
        assert_eq!(counts.get(&6), Some(&1));
        assert_eq!(counts.get(&2), None);
    }

    #[test]
    fn test_render_body() {
        assert_eq!(render_body(&json!("plain text")), "plain text");
        assert_eq!(render_body(&json!({"a": 1})), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent("a\nb"), "  a\n  b");
    }
}
