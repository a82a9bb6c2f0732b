use regex::Regex;
use std::sync::LazyLock;

/// Compiled regex patterns that are reused across the codebase
pub struct RegexPatterns;

impl RegexPatterns {
    /// ANSI escape codes in subprocess output
    pub fn ansi_escape() -> &'static Regex {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("Failed to compile ANSI escape regex")
        });
        &RE
    }

    /// Names accepted for tools and external sessions
    pub fn identifier() -> &'static Regex {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("Failed to compile identifier regex")
        });
        &RE
    }

    /// Leading `/command` and optional `@botname` suffix of a chat command
    pub fn chat_command() -> &'static Regex {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^/([a-z_]+)(?:@\S+)?(?:\s+(.*))?$")
                .expect("Failed to compile chat command regex")
        });
        &RE
    }
}
