use crate::env::optional_trimmed_path_from_env;
use anyhow::{Context as _, anyhow};
use std::path::PathBuf;
use std::process::Command;
use tiller_domain::{EngineKind, McpServerInfo, paths};

pub(super) fn engine_binary(engine: EngineKind) -> PathBuf {
    let env_name = match engine {
        EngineKind::Claude => paths::TILLER_CLAUDE_BIN_ENV,
        EngineKind::Codex => paths::TILLER_CODEX_BIN_ENV,
        EngineKind::Opencode => paths::TILLER_OPENCODE_BIN_ENV,
    };
    optional_trimmed_path_from_env(env_name)
        .ok()
        .flatten()
        .unwrap_or_else(|| PathBuf::from(engine.as_str()))
}

/// Probe `<binary> --version`. Returns the version line on success.
pub(super) fn check_cli_version(binary: &PathBuf, tool_name: &str) -> anyhow::Result<String> {
    let output = Command::new(binary)
        .args(["--version"])
        .output()
        .with_context(|| format!("failed to spawn {}", binary.display()))?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next().unwrap_or("").trim().to_owned();
        return Ok(line);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if !stderr.is_empty() {
        return Err(anyhow!("{stderr}"));
    }
    if !stdout.is_empty() {
        return Err(anyhow!("{stdout}"));
    }
    Err(anyhow!("{tool_name} exited with status {}", output.status))
}

/// `<binary> mcp list` output, one server per line. Both the claude and
/// codex CLIs print `name: transport ... - ✓ Connected` style rows; rows
/// that do not look like that are skipped.
pub(super) fn list_mcp_servers(engine: EngineKind) -> anyhow::Result<Vec<McpServerInfo>> {
    let binary = engine_binary(engine);
    let output = Command::new(&binary)
        .args(["mcp", "list"])
        .output()
        .with_context(|| format!("failed to spawn {}", binary.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        return Err(anyhow!(
            "{} mcp list failed: {stderr}",
            engine.as_str()
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_mcp_list(&stdout))
}

fn parse_mcp_list(raw: &str) -> Vec<McpServerInfo> {
    let mut servers = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            continue;
        }
        let rest = rest.trim();
        let connected = rest.contains("Connected") || rest.contains("connected");
        let transport = rest
            .split_whitespace()
            .next()
            .unwrap_or("stdio")
            .trim_end_matches(" -")
            .to_owned();
        servers.push(McpServerInfo {
            name: name.to_owned(),
            transport,
            connected,
        });
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mcp_list_reads_name_transport_and_state() {
        let raw = "Checking MCP server health...\n\nplaywright: npx @playwright/mcp@latest - ✓ Connected\nlinear: https://mcp.linear.app/sse (SSE) - ✗ Failed to connect\n";
        let servers = parse_mcp_list(raw);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].name, "playwright");
        assert!(servers[0].connected);
        assert_eq!(servers[1].name, "linear");
        assert!(!servers[1].connected);
    }

    #[test]
    fn parse_mcp_list_skips_prose_lines() {
        let servers = parse_mcp_list("No MCP servers configured.\n");
        assert!(servers.is_empty());
    }
}
