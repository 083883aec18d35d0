// Subprocess helpers for gauges and the control center.
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Run `program args..` and return trimmed stdout on success.
pub fn output(program: &str, args: &[&str]) -> Result<String, String> {
    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| describe_spawn_error(program, &err))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(format!(
            "{program} exited with {}: {}",
            out.status,
            stderr.trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Run a command and only report whether it succeeded.
pub fn run(program: &str, args: &[&str]) -> Result<(), String> {
    output(program, args).map(|_| ())
}

/// Start a user command line without waiting for it. The line is split on whitespace and a
/// leading `~/` on the program is expanded.
pub fn spawn_detached(command_line: &str) -> Result<(), String> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next().ok_or_else(|| "empty command".to_string())?;
    let program = expand_home(program);
    Command::new(&program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|err| describe_spawn_error(&program.to_string_lossy(), &err))
}

/// `true` when `program` resolves on `$PATH`.
pub fn exists(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

fn describe_spawn_error(program: &str, err: &io::Error) -> String {
    if err.kind() == io::ErrorKind::NotFound {
        format!("{program} not found")
    } else {
        format!("failed to run {program}: {err}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_reports_not_found() {
        let err = output("halcyon-definitely-missing-binary", &[]).unwrap_err();
        assert!(err.contains("not found"), "{err}");
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert_eq!(spawn_detached("   ").unwrap_err(), "empty command");
    }

    #[test]
    fn only_leading_tilde_slash_expands() {
        assert_eq!(expand_home("/usr/bin/true"), PathBuf::from("/usr/bin/true"));
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/bin/x"), PathBuf::from(home).join("bin/x"));
        }
    }
}
