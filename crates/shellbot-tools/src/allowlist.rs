//! Programs a sanitized command may start a segment with.
//!
//! This list is the trust boundary of the shell agent. It is compiled in and
//! never read from configuration; widening it is a code change.
//!
//! Interpreters and package managers (`awk`, `npm`, `cargo`, `pip`) are left
//! out: running code is their job. Members that can start other programs
//! through an option are covered by the argument checks in `guards`.

/// Sorted, lowercase program names.
pub const ALLOWED_COMMANDS: &[&str] = &[
    "basename", "cat", "column", "cp", "curl", "cut", "date", "df", "diff", "dig", "dirname",
    "du", "echo", "file", "find", "free", "git", "grep", "gunzip", "gzip", "head", "hostname",
    "hyprctl", "id", "ip", "jq", "journalctl", "ls", "lsblk", "lscpu", "md5sum", "mkdir", "mv",
    "nl", "pgrep", "ping", "playerctl", "printf", "ps", "pwd", "readlink", "realpath", "rg",
    "rm", "sed", "sha256sum", "sort", "ss", "stat", "systemctl", "tail", "tar", "touch", "tr",
    "tree", "uname", "uniq", "unzip", "uptime", "wc", "wget", "which", "whoami", "zip",
];

/// Exact, case-sensitive membership test. `/bin/ls` and `LS` are not `ls`.
pub fn is_allowed(binary: &str) -> bool {
    ALLOWED_COMMANDS.binary_search(&binary).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_set() {
        let expected = [
            "basename", "cat", "column", "cp", "curl", "cut", "date", "df", "diff", "dig",
            "dirname", "du", "echo", "file", "find", "free", "git", "grep", "gunzip", "gzip",
            "head", "hostname", "hyprctl", "id", "ip", "jq", "journalctl", "ls", "lsblk", "lscpu",
            "md5sum", "mkdir", "mv", "nl", "pgrep", "ping", "playerctl", "printf", "ps", "pwd",
            "readlink", "realpath", "rg", "rm", "sed", "sha256sum", "sort", "ss", "stat",
            "systemctl", "tail", "tar", "touch", "tr", "tree", "uname", "uniq", "unzip", "uptime",
            "wc", "wget", "which", "whoami", "zip",
        ];
        assert_eq!(ALLOWED_COMMANDS, expected.as_slice());
    }

    #[test]
    fn test_sorted_and_unique() {
        assert!(ALLOWED_COMMANDS.windows(2).all(|w| w[0] < w[1]));
        assert!(ALLOWED_COMMANDS
            .iter()
            .all(|c| c.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())));
    }

    #[test]
    fn test_members() {
        for name in ["ls", "cat", "grep", "rg", "git", "curl", "jq", "systemctl", "playerctl", "hyprctl", "rm"] {
            assert!(is_allowed(name), "{name} should be allowed");
        }
    }

    #[test]
    fn test_non_members() {
        for name in [
            "sudo", "su", "doas", "bash", "sh", "zsh", "env", "xargs", "python", "python3",
            "perl", "awk", "npm", "cargo", "pip", "nc", "dd", "mkfs", "chmod", "chown", "kill", "scarycmd", "",
        ] {
            assert!(!is_allowed(name), "{name} should not be allowed");
        }
    }

    #[test]
    fn test_membership_is_exact() {
        assert!(!is_allowed("LS"));
        assert!(!is_allowed("/bin/ls"));
        assert!(!is_allowed("ls "));
    }
}
