use std::collections::HashMap;
use tokio::process::Command;

/// Environment variables passed through to child processes.
const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TZ",
    "TERM",
    "TMPDIR",
    "XDG_RUNTIME_DIR",
];

/// `Command` with a cleared environment plus the allowlisted variables and
/// any explicitly configured extras. Provider keys and the bot token never
/// reach shell tools or MCP servers this way.
pub fn scrubbed_command(program: &str, extra_env: &HashMap<String, String>) -> Command {
    let mut cmd = Command::new(program);
    cmd.env_clear();
    for &var in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(var) {
            cmd.env(var, val);
        }
    }
    cmd.envs(extra_env);
    cmd.kill_on_drop(true);
    cmd
}
