//! Shell script generation and marker parsing.
//!
//! Every phase command runs in one shell session. Each command is bracketed
//! by marker lines on stdout so the runner can tell which command failed
//! without giving up shared shell state between commands.

use ecr_buildspec::{BuildSpec, Phase};

/// Prefix of every marker line.
pub const MARKER_PREFIX: &str = "@@ecr-ci";

/// Name of the shell variable holding the last exit status.
const RC_VAR: &str = "__ecr_ci_rc";

/// A parsed marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Execution entered a phase
    Begin(Phase),
    /// A command is about to run
    Start(Phase, usize),
    /// A command exited zero
    Ok(Phase, usize),
    /// A command exited non-zero; the shell exits right after
    Fail(Phase, usize, i32),
}

/// Render the whole buildspec as one POSIX shell script.
pub fn render_script(spec: &BuildSpec) -> String {
    let mut script = String::new();

    for (phase, body) in spec.ordered_phases() {
        script.push_str(&format!("printf '%s\\n' '{MARKER_PREFIX} begin {phase}'\n"));

        for (index, command) in body.commands.iter().enumerate() {
            script.push_str(&format!(
                "printf '%s\\n' '{MARKER_PREFIX} start {phase} {index}'\n"
            ));
            script.push_str(command);
            script.push('\n');
            script.push_str(&format!("{RC_VAR}=$?\n"));
            script.push_str(&format!(
                "if [ \"${RC_VAR}\" -ne 0 ]; then printf '%s\\n' \"{MARKER_PREFIX} fail {phase} {index} ${RC_VAR}\"; exit \"${RC_VAR}\"; fi\n"
            ));
            script.push_str(&format!(
                "printf '%s\\n' '{MARKER_PREFIX} ok {phase} {index}'\n"
            ));
        }
    }

    script.push_str("exit 0\n");
    script
}

/// Split a stdout line into command output and an optional marker.
///
/// A command that prints without a trailing newline leaves its output in
/// front of the marker on the same line.
pub fn split_marker(line: &str) -> (&str, Option<Marker>) {
    let Some(pos) = line.find(MARKER_PREFIX) else {
        return (line, None);
    };

    let (output, rest) = line.split_at(pos);
    match parse_marker(rest) {
        Some(marker) => (output, Some(marker)),
        None => (line, None),
    }
}

fn parse_marker(text: &str) -> Option<Marker> {
    let mut parts = text.strip_prefix(MARKER_PREFIX)?.split_whitespace();
    let kind = parts.next()?;
    let phase: Phase = parts.next()?.parse().ok()?;

    let marker = match kind {
        "begin" => Marker::Begin(phase),
        "start" => Marker::Start(phase, parts.next()?.parse().ok()?),
        "ok" => Marker::Ok(phase, parts.next()?.parse().ok()?),
        "fail" => {
            let index = parts.next()?.parse().ok()?;
            let code = parts.next()?.parse().ok()?;
            Marker::Fail(phase, index, code)
        }
        _ => return None,
    };

    if parts.next().is_some() {
        return None;
    }
    Some(marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_script_brackets_commands() {
        let spec = BuildSpec::new()
            .with_commands(Phase::Build, ["echo one", "echo two"]);
        let script = render_script(&spec);

        assert!(script.contains("'@@ecr-ci begin build'"));
        assert!(script.contains("'@@ecr-ci start build 0'\necho one\n"));
        assert!(script.contains("'@@ecr-ci ok build 1'"));
        assert!(script.ends_with("exit 0\n"));
    }

    #[test]
    fn test_render_script_phase_order() {
        let spec = BuildSpec::new()
            .with_commands(Phase::PostBuild, ["echo post"])
            .with_commands(Phase::PreBuild, ["echo pre"]);
        let script = render_script(&spec);

        let pre = script.find("echo pre").unwrap();
        let post = script.find("echo post").unwrap();
        assert!(pre < post);
    }

    #[test]
    fn test_render_script_runtime_only_phase() {
        let spec = BuildSpec::new().with_runtime("docker", 18);
        let script = render_script(&spec);
        assert!(script.contains("begin install"));
        assert!(!script.contains("start install"));
    }

    #[test]
    fn test_split_marker_plain_output() {
        assert_eq!(split_marker("hello"), ("hello", None));
    }

    #[test]
    fn test_split_marker_variants() {
        assert_eq!(
            split_marker("@@ecr-ci begin pre_build"),
            ("", Some(Marker::Begin(Phase::PreBuild)))
        );
        assert_eq!(
            split_marker("@@ecr-ci start build 3"),
            ("", Some(Marker::Start(Phase::Build, 3)))
        );
        assert_eq!(
            split_marker("@@ecr-ci ok post_build 0"),
            ("", Some(Marker::Ok(Phase::PostBuild, 0)))
        );
        assert_eq!(
            split_marker("@@ecr-ci fail install 1 127"),
            ("", Some(Marker::Fail(Phase::Install, 1, 127)))
        );
    }

    #[test]
    fn test_split_marker_with_leading_output() {
        assert_eq!(
            split_marker("no newline@@ecr-ci ok build 0"),
            ("no newline", Some(Marker::Ok(Phase::Build, 0)))
        );
    }

    #[test]
    fn test_split_marker_rejects_malformed() {
        assert_eq!(split_marker("@@ecr-ci ok nowhere 0").1, None);
        assert_eq!(split_marker("@@ecr-ci start build").1, None);
        assert_eq!(split_marker("@@ecr-ci ok build 0 extra").1, None);
    }
}
