//! Git output parsing helpers.

use std::process::Output;

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Extracts branch names from `git ls-remote --heads` output, keeping the
/// listing order.
///
/// Each line is `<sha>\trefs/heads/<branch>`.
pub fn parse_ls_remote_heads(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let reference = line.split_whitespace().nth(1)?;
            reference.strip_prefix("refs/heads/").map(str::to_string)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ls_remote_heads() {
        let out = "\
3f1c2a9d\trefs/heads/develop
9b0e77aa\trefs/heads/feature/login
c0ffee00\trefs/heads/main
";
        assert_eq!(
            parse_ls_remote_heads(out),
            vec!["develop", "feature/login", "main"]
        );
    }

    #[test]
    fn test_parse_ls_remote_skips_other_refs() {
        let out = "aaaa\tHEAD\nbbbb\trefs/tags/v1\ncccc\trefs/heads/main\n\n";
        assert_eq!(parse_ls_remote_heads(out), vec!["main"]);
    }

    #[cfg(unix)]
    mod unix_tests {
        use super::*;
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        fn make_output(status_code: i32, stdout: &[u8], stderr: &[u8]) -> Output {
            Output {
                status: ExitStatus::from_raw(status_code << 8),
                stdout: stdout.to_vec(),
                stderr: stderr.to_vec(),
            }
        }

        #[test]
        fn test_format_git_error_empty_output() {
            let output = make_output(1, b"", b"");
            assert_eq!(format_git_error(&output), "Command failed with exit code 1");
        }

        #[test]
        fn test_format_git_error_both() {
            let output = make_output(128, b"some output", b"fatal: couldn't find remote ref");
            assert_eq!(
                format_git_error(&output),
                "fatal: couldn't find remote ref\nsome output"
            );
        }
    }
}
