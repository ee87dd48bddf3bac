//! Build and version information.
//!
//! The package version comes from Cargo. Commit, branch, date and user are
//! read from `SOUP_GIT_COMMIT`, `SOUP_GIT_BRANCH`, `SOUP_BUILD_DATE` and
//! `SOUP_BUILD_USER` at compile time and default to `unknown`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub git_commit: String,
    pub branch: String,
    pub build_date: String,
    pub build_user: String,
    pub os_arch: String,
}

impl VersionInfo {
    /// Information baked into this binary.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_commit: option_env!("SOUP_GIT_COMMIT").unwrap_or(UNKNOWN).to_string(),
            branch: option_env!("SOUP_GIT_BRANCH").unwrap_or(UNKNOWN).to_string(),
            build_date: option_env!("SOUP_BUILD_DATE").unwrap_or(UNKNOWN).to_string(),
            build_user: option_env!("SOUP_BUILD_USER").unwrap_or(UNKNOWN).to_string(),
            os_arch: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    pub fn render(&self, format: VersionFormat) -> Result<String, serde_json::Error> {
        match format {
            VersionFormat::Pretty => Ok(self.to_string()),
            VersionFormat::Json => serde_json::to_string_pretty(self),
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Version:\t{}\nGit commit:\t{}\nBuilt:\t\t{} (from {} by {})\nOS/Arch:\t{}",
            self.version, self.git_commit, self.build_date, self.branch, self.build_user, self.os_arch
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for VersionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(VersionFormat::Pretty),
            "json" => Ok(VersionFormat::Json),
            other => Err(format!("unknown version format '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> VersionInfo {
        VersionInfo {
            version: "1.2.3".to_string(),
            git_commit: "abc1234".to_string(),
            branch: "main".to_string(),
            build_date: "2024-05-01".to_string(),
            build_user: "ci".to_string(),
            os_arch: "linux x86_64".to_string(),
        }
    }

    #[test]
    fn test_pretty_output() {
        let text = info().render(VersionFormat::Pretty).unwrap();
        assert!(text.starts_with("Version:\t1.2.3\nGit commit:\tabc1234\n"));
        assert!(text.contains("Built:\t\t2024-05-01 (from main by ci)"));
    }

    #[test]
    fn test_json_output() {
        let json: serde_json::Value =
            serde_json::from_str(&info().render(VersionFormat::Json).unwrap()).unwrap();
        assert_eq!(json["gitCommit"], "abc1234");
        assert_eq!(json["buildUser"], "ci");
    }

    #[test]
    fn test_current_uses_cargo_version() {
        assert_eq!(VersionInfo::current().version, env!("CARGO_PKG_VERSION"));
        assert_eq!("JSON".parse::<VersionFormat>().unwrap(), VersionFormat::Json);
        assert!("yaml".parse::<VersionFormat>().is_err());
    }
}
