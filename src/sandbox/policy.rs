//! Security Sandbox Policy
//!
//! Inspects a parsed command before execution and rejects it if it
//! matches a dangerous-command list, a network-tooling list, a
//! sensitive-path list, or an injection/exfiltration pattern.
//!
//! The policy is an explicit value owned by the execution engine and
//! handed by reference to every check call; all four rule sets are
//! mutable at runtime behind a single `RwLock`, safe under concurrent
//! readers from in-flight scripts.

use lazy_static::lazy_static;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::ast::types::CommandNode;
use crate::sandbox::types::{SandboxConfig, SecurityReport, SecurityViolation, ViolationRule};

const DEFAULT_DANGEROUS_COMMANDS: &[&str] = &[
    "dd", "mkfs", "fdisk", "parted", "shred", "shutdown", "reboot", "halt", "poweroff",
    "init", "chown", "chgrp", "chmod", "useradd", "userdel", "usermod", "groupadd",
    "groupdel", "passwd", "sudo", "su", "mount", "umount", "sysctl", "insmod", "rmmod",
];

const DEFAULT_NETWORK_TOOLS: &[&str] = &[
    "iptables", "ip6tables", "ufw", "firewall-cmd", "ifconfig", "route", "tcpdump",
    "wireshark", "tshark", "nmap", "netcat", "nc", "arp", "ethtool",
];

const DEFAULT_SENSITIVE_PATHS: &[&str] = &[
    "/etc/passwd", "/etc/shadow", "/etc/sudoers", "/root/", "/boot/", "/dev/", "/proc/",
    "/sys/", "/var/log/",
];

// Commands exempt from the shell-metacharacter injection check. The
// sandbox runs before expansion, so `$`-bearing arguments are still
// raw; these internal commands routinely carry them.
const DEFAULT_TRUSTED_COMMANDS: &[&str] = &[
    "echo", "printf", "test", "[", "export", "read", "set", "local", "true", "false",
];

lazy_static! {
    static ref RECURSIVE_ROOT_DELETE: Regex =
        Regex::new(r"(?i)(^|\s)rm\s(.*\s)?-[a-zA-Z-]*r[a-zA-Z-]*\s+/+\*?\s*($|\s)")
            .expect("recursive-root-delete pattern");
    static ref PASSWORD_IN_ARGV: Regex =
        Regex::new(r"(?i)(^|\s)(-p|--password|passwd)[=\s]+\S+").expect("password pattern");
    static ref SHELL_METACHARACTERS: Regex =
        Regex::new(r"[;&|`$()]").expect("metacharacter pattern");
}

#[derive(Debug)]
struct PolicyRules {
    dangerous_commands: HashSet<String>,
    network_tools: HashSet<String>,
    sensitive_paths: Vec<String>,
    trusted_commands: HashSet<String>,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            dangerous_commands: DEFAULT_DANGEROUS_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            network_tools: DEFAULT_NETWORK_TOOLS.iter().map(|s| s.to_string()).collect(),
            sensitive_paths: DEFAULT_SENSITIVE_PATHS.iter().map(|s| s.to_string()).collect(),
            trusted_commands: DEFAULT_TRUSTED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// The security policy gate. Cheap to clone; clones share rule sets.
#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    rules: Arc<RwLock<PolicyRules>>,
}

impl SandboxPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from seed configuration. Seed entries extend the
    /// default rule sets.
    pub fn from_config(config: &SandboxConfig) -> Self {
        let policy = Self::new();
        {
            let mut rules = policy.rules.write().expect("sandbox rules poisoned");
            for c in &config.dangerous_commands {
                rules.dangerous_commands.insert(c.to_lowercase());
            }
            for t in &config.network_tools {
                rules.network_tools.insert(t.to_lowercase());
            }
            for p in &config.sensitive_paths {
                rules.sensitive_paths.push(p.clone());
            }
            for t in &config.trusted_commands {
                rules.trusted_commands.insert(t.to_lowercase());
            }
        }
        policy
    }

    /// Vet a command against all rule sets, in order. The first match
    /// short-circuits with a descriptive violation.
    pub fn check(&self, command: &CommandNode) -> Result<(), SecurityViolation> {
        let rules = self.rules.read().expect("sandbox rules poisoned");
        let name = command.name.to_lowercase();

        if rules.dangerous_commands.contains(&name) {
            return Err(SecurityViolation::new(
                ViolationRule::DangerousCommand,
                format!("`{}` is a restricted command", command.name),
                &command.name,
            ));
        }

        if rules.network_tools.contains(&name) {
            return Err(SecurityViolation::new(
                ViolationRule::NetworkTool,
                format!("`{}` is restricted network tooling", command.name),
                &command.name,
            ));
        }

        for arg in &command.args {
            if let Some(matched) = match_sensitive_path(&rules.sensitive_paths, arg) {
                return Err(SecurityViolation::new(
                    ViolationRule::SensitivePath,
                    format!("argument `{}` touches sensitive path `{}`", arg, matched),
                    &command.name,
                ));
            }
        }

        let combined = combined_line(command);

        if RECURSIVE_ROOT_DELETE.is_match(&combined) {
            return Err(SecurityViolation::new(
                ViolationRule::RecursiveRootDelete,
                "recursive delete targeting the filesystem root",
                &command.name,
            ));
        }

        if PASSWORD_IN_ARGV.is_match(&combined) {
            return Err(SecurityViolation::new(
                ViolationRule::PasswordInArguments,
                "password material passed on the command line",
                &command.name,
            ));
        }

        if !rules.trusted_commands.contains(&name) && SHELL_METACHARACTERS.is_match(&combined) {
            return Err(SecurityViolation::new(
                ViolationRule::ShellInjection,
                "shell metacharacters in arguments of an untrusted command",
                &command.name,
            ));
        }

        Ok(())
    }

    /// Structured, non-raising summary used for diagnostics.
    pub fn report(&self, command: &CommandNode) -> SecurityReport {
        let rules = self.rules.read().expect("sandbox rules poisoned");
        let name = command.name.to_lowercase();
        let matched_sensitive_paths = command
            .args
            .iter()
            .filter_map(|arg| match_sensitive_path(&rules.sensitive_paths, arg))
            .collect();
        SecurityReport {
            dangerous: rules.dangerous_commands.contains(&name),
            network_tool: rules.network_tools.contains(&name),
            matched_sensitive_paths,
        }
    }

    // Runtime rule mutation. All writes go through the lock, so
    // in-flight readers observe a consistent rule set.

    pub fn register_dangerous_command(&self, name: &str) {
        self.rules
            .write()
            .expect("sandbox rules poisoned")
            .dangerous_commands
            .insert(name.to_lowercase());
    }

    pub fn unregister_dangerous_command(&self, name: &str) {
        self.rules
            .write()
            .expect("sandbox rules poisoned")
            .dangerous_commands
            .remove(&name.to_lowercase());
    }

    pub fn register_network_tool(&self, name: &str) {
        self.rules
            .write()
            .expect("sandbox rules poisoned")
            .network_tools
            .insert(name.to_lowercase());
    }

    pub fn unregister_network_tool(&self, name: &str) {
        self.rules
            .write()
            .expect("sandbox rules poisoned")
            .network_tools
            .remove(&name.to_lowercase());
    }

    pub fn add_sensitive_path(&self, path: &str) {
        let mut rules = self.rules.write().expect("sandbox rules poisoned");
        if !rules.sensitive_paths.iter().any(|p| p == path) {
            rules.sensitive_paths.push(path.to_string());
        }
    }

    pub fn remove_sensitive_path(&self, path: &str) {
        self.rules
            .write()
            .expect("sandbox rules poisoned")
            .sensitive_paths
            .retain(|p| p != path);
    }

    pub fn trust_command(&self, name: &str) {
        self.rules
            .write()
            .expect("sandbox rules poisoned")
            .trusted_commands
            .insert(name.to_lowercase());
    }

    pub fn untrust_command(&self, name: &str) {
        self.rules
            .write()
            .expect("sandbox rules poisoned")
            .trusted_commands
            .remove(&name.to_lowercase());
    }
}

fn match_sensitive_path(paths: &[String], arg: &str) -> Option<String> {
    paths
        .iter()
        .find(|p| arg == p.as_str() || arg.starts_with(p.as_str()))
        .cloned()
}

fn combined_line(command: &CommandNode) -> String {
    if command.args.is_empty() {
        command.name.clone()
    } else {
        format!("{} {}", command.name, command.args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::types::Position;

    fn cmd(name: &str, args: &[&str]) -> CommandNode {
        CommandNode::new(
            name,
            args.iter().map(|s| s.to_string()).collect(),
            Position::default(),
        )
    }

    #[test]
    fn test_plain_command_passes() {
        let policy = SandboxPolicy::new();
        assert!(policy.check(&cmd("echo", &["hi"])).is_ok());
        assert!(policy.check(&cmd("ls", &["-la"])).is_ok());
    }

    #[test]
    fn test_recursive_root_delete_rejected() {
        let policy = SandboxPolicy::new();
        let err = policy.check(&cmd("rm", &["-rf", "/"])).unwrap_err();
        assert_eq!(err.rule, ViolationRule::RecursiveRootDelete);
    }

    #[test]
    fn test_recursive_delete_of_subdir_allowed() {
        let policy = SandboxPolicy::new();
        assert!(policy.check(&cmd("rm", &["-rf", "/tmp/scratch"])).is_ok());
    }

    #[test]
    fn test_dangerous_command_rejected_case_insensitive() {
        let policy = SandboxPolicy::new();
        let err = policy.check(&cmd("Shutdown", &["-h", "now"])).unwrap_err();
        assert_eq!(err.rule, ViolationRule::DangerousCommand);
    }

    #[test]
    fn test_network_tool_rejected() {
        let policy = SandboxPolicy::new();
        let err = policy.check(&cmd("iptables", &["-F"])).unwrap_err();
        assert_eq!(err.rule, ViolationRule::NetworkTool);
    }

    #[test]
    fn test_sensitive_path_exact_and_prefix() {
        let policy = SandboxPolicy::new();
        let err = policy.check(&cmd("cat", &["/etc/shadow"])).unwrap_err();
        assert_eq!(err.rule, ViolationRule::SensitivePath);
        let err = policy.check(&cmd("cat", &["/root/.ssh/id_rsa"])).unwrap_err();
        assert_eq!(err.rule, ViolationRule::SensitivePath);
    }

    #[test]
    fn test_password_in_argv_rejected() {
        let policy = SandboxPolicy::new();
        let err = policy
            .check(&cmd("mysql", &["--password", "hunter2"]))
            .unwrap_err();
        assert_eq!(err.rule, ViolationRule::PasswordInArguments);
    }

    #[test]
    fn test_injection_rejected_for_untrusted() {
        let policy = SandboxPolicy::new();
        let err = policy.check(&cmd("curl", &["http://x; rm -r y"])).unwrap_err();
        assert_eq!(err.rule, ViolationRule::ShellInjection);
    }

    #[test]
    fn test_trusted_command_exempt_from_injection() {
        let policy = SandboxPolicy::new();
        // echo routinely carries unexpanded `$NAME` arguments
        assert!(policy.check(&cmd("echo", &["$HOME"])).is_ok());
    }

    #[test]
    fn test_register_then_unregister_dangerous() {
        let policy = SandboxPolicy::new();
        assert!(policy.check(&cmd("docker", &["ps"])).is_ok());
        policy.register_dangerous_command("docker");
        assert!(policy.check(&cmd("docker", &["ps"])).is_err());
        policy.unregister_dangerous_command("docker");
        assert!(policy.check(&cmd("docker", &["ps"])).is_ok());
    }

    #[test]
    fn test_sensitive_path_mutation() {
        let policy = SandboxPolicy::new();
        assert!(policy.check(&cmd("cat", &["/srv/secrets/key"])).is_ok());
        policy.add_sensitive_path("/srv/secrets/");
        assert!(policy.check(&cmd("cat", &["/srv/secrets/key"])).is_err());
        policy.remove_sensitive_path("/srv/secrets/");
        assert!(policy.check(&cmd("cat", &["/srv/secrets/key"])).is_ok());
    }

    #[test]
    fn test_report_never_raises() {
        let policy = SandboxPolicy::new();
        let report = policy.report(&cmd("dd", &["/dev/zero"]));
        assert!(report.dangerous);
        assert!(!report.network_tool);
        assert_eq!(report.matched_sensitive_paths, vec!["/dev/"]);
    }

    #[test]
    fn test_from_config_extends_defaults() {
        let config = SandboxConfig {
            dangerous_commands: vec!["terraform".to_string()],
            ..Default::default()
        };
        let policy = SandboxPolicy::from_config(&config);
        assert!(policy.check(&cmd("terraform", &["apply"])).is_err());
        // Defaults still present
        assert!(policy.check(&cmd("dd", &[])).is_err());
    }

    #[test]
    fn test_clones_share_rules() {
        let policy = SandboxPolicy::new();
        let clone = policy.clone();
        policy.register_dangerous_command("docker");
        assert!(clone.check(&cmd("docker", &[])).is_err());
    }
}
