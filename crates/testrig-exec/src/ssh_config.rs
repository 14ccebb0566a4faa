//! OpenSSH client configuration lookup
//!
//! Parses the subset of `~/.ssh/config` the rig cares about: `Host` blocks
//! with `Hostname`, `User`, `Port`, `IdentityFile` and `ProxyJump`
//! directives. Values merge across matching blocks with OpenSSH semantics,
//! first obtained value wins.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::ExecError;

/// Directives collected for one `Host` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostEntry {
    /// `Hostname` directive
    pub hostname: Option<String>,
    /// `User` directive
    pub user: Option<String>,
    /// `Port` directive
    pub port: Option<u16>,
    /// First `IdentityFile` directive
    pub identity_file: Option<PathBuf>,
    /// `ProxyJump` directive (a host alias)
    pub proxy_jump: Option<String>,
}

impl HostEntry {
    /// Fill unset fields from a later matching block
    fn merge_from(&mut self, other: &HostEntry) {
        if self.hostname.is_none() {
            self.hostname = other.hostname.clone();
        }
        if self.user.is_none() {
            self.user = other.user.clone();
        }
        if self.port.is_none() {
            self.port = other.port;
        }
        if self.identity_file.is_none() {
            self.identity_file = other.identity_file.clone();
        }
        if self.proxy_jump.is_none() {
            self.proxy_jump = other.proxy_jump.clone();
        }
    }
}

/// Parsed SSH client configuration
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    blocks: Vec<(Vec<String>, HostEntry)>,
}

impl SshConfig {
    /// Parse configuration text
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut blocks: Vec<(Vec<String>, HostEntry)> = Vec::new();
        let mut current: Option<(Vec<String>, HostEntry)> = None;

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (keyword, value) = match split_directive(line) {
                Some(parts) => parts,
                None => continue,
            };

            if keyword.eq_ignore_ascii_case("host") {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                let patterns = value.split_whitespace().map(str::to_string).collect();
                current = Some((patterns, HostEntry::default()));
                continue;
            }

            let Some((_, entry)) = current.as_mut() else {
                // Directives before the first Host block apply globally in
                // OpenSSH; the rig only resolves aliased hosts.
                continue;
            };

            match keyword.to_ascii_lowercase().as_str() {
                "hostname" => entry.hostname = Some(value.to_string()),
                "user" => entry.user = Some(value.to_string()),
                "port" => match value.parse::<u16>() {
                    Ok(port) => entry.port = Some(port),
                    Err(_) => warn!(value, "ignoring unparsable Port directive"),
                },
                "identityfile" => entry.identity_file = Some(expand_tilde(value)),
                "proxyjump" => entry.proxy_jump = Some(value.to_string()),
                _ => {}
            }
        }

        if let Some(block) = current.take() {
            blocks.push(block);
        }

        Self { blocks }
    }

    /// Load a configuration file
    ///
    /// A missing file is not an error; the rig then falls back to the
    /// executor's explicit parameters.
    ///
    /// # Errors
    /// Returns `Io` when the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Option<Self>, ExecError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExecError::Io(format!(
                "reading SSH config {}: {e}",
                path.display()
            ))),
        }
    }

    /// Effective directives for `alias`, merged across matching blocks
    #[must_use]
    pub fn lookup(&self, alias: &str) -> HostEntry {
        let mut result = HostEntry::default();
        for (patterns, entry) in &self.blocks {
            if patterns.iter().any(|p| pattern_matches(p, alias)) {
                result.merge_from(entry);
            }
        }
        result
    }
}

fn split_directive(line: &str) -> Option<(&str, &str)> {
    let (keyword, value) = line
        .split_once(|c: char| c.is_whitespace() || c == '=')
        .map(|(k, v)| (k, v.trim_start_matches(['=', ' ', '\t'])))?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((keyword, value))
}

fn expand_tilde(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(value)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// OpenSSH-style pattern match supporting `*` and `?`
fn pattern_matches(pattern: &str, host: &str) -> bool {
    fn matches(p: &[u8], h: &[u8]) -> bool {
        match (p.first(), h.first()) {
            (None, None) => true,
            (Some(b'*'), _) => matches(&p[1..], h) || (!h.is_empty() && matches(p, &h[1..])),
            (Some(b'?'), Some(_)) => matches(&p[1..], &h[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &h[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), host.as_bytes())
}

/// Effective connection parameters for one hop
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// The alias the lookup started from
    pub alias: String,
    /// Hostname to dial (the alias itself when no `Hostname` directive)
    pub hostname: String,
    /// Login user
    pub user: String,
    /// TCP port
    pub port: u16,
    /// Identity file, when one is configured for this hop
    pub identity_file: Option<PathBuf>,
    /// Jump hop to establish first, when configured
    pub proxy: Option<Box<ResolvedTarget>>,
}

/// Resolve effective parameters for `alias`
///
/// Precedence per field: explicit override, then SSH config, then the
/// executor's defaults. A `ProxyJump` alias is resolved against the same
/// configuration; its own parameters fall back to the same defaults.
///
/// # Errors
/// `Config` when the jump host itself names a `ProxyJump` (only one level
/// of chaining is supported).
pub fn resolve_target(
    config: Option<&SshConfig>,
    alias: &str,
    user_override: Option<&str>,
    port_override: Option<u16>,
    default_user: &str,
    default_port: u16,
    default_identity: Option<&Path>,
) -> Result<ResolvedTarget, ExecError> {
    let entry = config.map(|c| c.lookup(alias)).unwrap_or_default();

    let proxy = match &entry.proxy_jump {
        None => None,
        Some(jump_alias) => {
            let jump_entry = config
                .map(|c| c.lookup(jump_alias))
                .unwrap_or_default();
            if jump_entry.proxy_jump.is_some() {
                return Err(ExecError::Config(format!(
                    "jump host {jump_alias} has its own ProxyJump; nested jumps are not supported"
                )));
            }
            Some(Box::new(ResolvedTarget {
                alias: jump_alias.clone(),
                hostname: jump_entry.hostname.unwrap_or_else(|| jump_alias.clone()),
                user: jump_entry.user.unwrap_or_else(|| default_user.to_string()),
                port: jump_entry.port.unwrap_or(22),
                identity_file: jump_entry.identity_file,
                proxy: None,
            }))
        }
    };

    Ok(ResolvedTarget {
        alias: alias.to_string(),
        hostname: entry.hostname.unwrap_or_else(|| alias.to_string()),
        user: user_override
            .map(str::to_string)
            .or(entry.user)
            .unwrap_or_else(|| default_user.to_string()),
        port: port_override.or(entry.port).unwrap_or(default_port),
        identity_file: entry
            .identity_file
            .or_else(|| default_identity.map(Path::to_path_buf)),
        proxy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
# lab hosts
Host dut1
    Hostname 192.168.50.11
    User root
    Port 2022
    IdentityFile /keys/dut1_ed25519

Host dut2
    Hostname dut2.lab.internal
    ProxyJump bastion

Host bastion
    Hostname bastion.lab.internal
    User jumper
    Port 2222

Host *.lab.internal
    User labuser

Host chained
    Hostname chained.lab.internal
    ProxyJump dut2
";

    #[test]
    fn test_lookup_basic_block() {
        let config = SshConfig::parse(SAMPLE);
        let entry = config.lookup("dut1");
        assert_eq!(entry.hostname.as_deref(), Some("192.168.50.11"));
        assert_eq!(entry.user.as_deref(), Some("root"));
        assert_eq!(entry.port, Some(2022));
        assert_eq!(
            entry.identity_file,
            Some(PathBuf::from("/keys/dut1_ed25519"))
        );
        assert!(entry.proxy_jump.is_none());
    }

    #[test]
    fn test_lookup_unknown_host_is_empty() {
        let config = SshConfig::parse(SAMPLE);
        assert_eq!(config.lookup("unknown"), HostEntry::default());
    }

    #[test]
    fn test_glob_patterns_merge_first_wins() {
        let config = SshConfig::parse(SAMPLE);
        let entry = config.lookup("bastion.lab.internal");
        assert_eq!(entry.user.as_deref(), Some("labuser"));

        // An exact block earlier in the file wins over the glob.
        let bastion = config.lookup("bastion");
        assert_eq!(entry.hostname, None);
        assert_eq!(bastion.user.as_deref(), Some("jumper"));
    }

    #[test]
    fn test_key_value_with_equals() {
        let config = SshConfig::parse("Host a\n  Port=2200\n  User=tester\n");
        let entry = config.lookup("a");
        assert_eq!(entry.port, Some(2200));
        assert_eq!(entry.user.as_deref(), Some("tester"));
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("dut?", "dut1"));
        assert!(!pattern_matches("dut?", "dut10"));
        assert!(pattern_matches("*.lab.internal", "x.lab.internal"));
        assert!(!pattern_matches("*.lab.internal", "x.other.internal"));
    }

    #[test]
    fn test_resolve_explicit_overrides_win() {
        let config = SshConfig::parse(SAMPLE);
        let target = resolve_target(
            Some(&config),
            "dut1",
            Some("admin"),
            Some(22),
            "fallback",
            22,
            None,
        )
        .unwrap();
        assert_eq!(target.hostname, "192.168.50.11");
        assert_eq!(target.user, "admin");
        assert_eq!(target.port, 22);
    }

    #[test]
    fn test_resolve_defaults_fill_gaps() {
        let config = SshConfig::parse(SAMPLE);
        let target = resolve_target(
            Some(&config),
            "plainhost",
            None,
            None,
            "root",
            22,
            Some(Path::new("/keys/default")),
        )
        .unwrap();
        assert_eq!(target.hostname, "plainhost");
        assert_eq!(target.user, "root");
        assert_eq!(target.port, 22);
        assert_eq!(target.identity_file, Some(PathBuf::from("/keys/default")));
        assert!(target.proxy.is_none());
    }

    #[test]
    fn test_resolve_proxy_jump_chain() {
        let config = SshConfig::parse(SAMPLE);
        let target = resolve_target(Some(&config), "dut2", None, None, "root", 22, None).unwrap();
        assert_eq!(target.hostname, "dut2.lab.internal");
        // Patterns match the alias, not the Hostname it maps to.
        assert_eq!(target.user, "root");

        let proxy = target.proxy.expect("proxy hop expected");
        assert_eq!(proxy.hostname, "bastion.lab.internal");
        assert_eq!(proxy.user, "jumper");
        assert_eq!(proxy.port, 2222);
        assert!(proxy.proxy.is_none());
    }

    #[test]
    fn test_resolve_nested_jump_is_config_error() {
        let config = SshConfig::parse(SAMPLE);
        let result = resolve_target(Some(&config), "chained", None, None, "root", 22, None);
        assert!(matches!(result, Err(ExecError::Config(_))));
    }

    #[test]
    fn test_resolve_without_config() {
        let target = resolve_target(None, "10.0.0.5", None, None, "root", 22, None).unwrap();
        assert_eq!(target.hostname, "10.0.0.5");
        assert_eq!(target.user, "root");
    }
}
