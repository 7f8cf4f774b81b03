//! Paths left out of the source snapshot.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::Path;

/// Optional per-repository ignore file, one glob per line.
pub const IGNORE_FILE_NAME: &str = ".ecrciignore";

/// Always excluded: VCS metadata, build output, synthesized templates,
/// dependency trees and earlier local runs.
const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".git/**",
    "target",
    "target/**",
    "cdk.out",
    "cdk.out/**",
    "**/node_modules",
    "**/node_modules/**",
    ".ecr-ci/runs",
    ".ecr-ci/runs/**",
];

#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Glob pattern error: {0}")]
    GlobError(#[from] globset::Error),
}

#[derive(Debug)]
pub struct ExcludeRules {
    glob_set: GlobSet,
    extra: Vec<String>,
}

impl ExcludeRules {
    /// Default exclusions only.
    pub fn new() -> Result<Self, ExcludeError> {
        Self::build(Vec::new())
    }

    fn build(extra: Vec<String>) -> Result<Self, ExcludeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_EXCLUDES {
            builder.add(Glob::new(pattern)?);
        }
        for pattern in &extra {
            let pattern = pattern.trim_end_matches('/');
            builder.add(Glob::new(pattern)?);
            builder.add(Glob::new(&format!("{}/**", pattern))?);
        }
        Ok(Self {
            glob_set: builder.build()?,
            extra,
        })
    }

    /// Add patterns from an ignore file. Blank lines and `#` comments are
    /// skipped.
    pub fn with_ignore_file(self, path: &Path) -> Result<Self, ExcludeError> {
        let contents = fs::read_to_string(path)?;
        let patterns: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        self.with_patterns(&patterns)
    }

    /// Add patterns. A pattern also excludes everything below a matching
    /// directory.
    pub fn with_patterns(self, patterns: &[&str]) -> Result<Self, ExcludeError> {
        let mut extra = self.extra;
        extra.extend(
            patterns
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string()),
        );
        Self::build(extra)
    }

    /// `path` is relative to the snapshot root.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.glob_set.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_excludes() {
        let rules = ExcludeRules::new().unwrap();

        assert!(rules.is_excluded(Path::new(".git")));
        assert!(rules.is_excluded(Path::new(".git/objects/pack")));
        assert!(rules.is_excluded(Path::new("target/debug/app")));
        assert!(rules.is_excluded(Path::new("cdk.out")));
        assert!(rules.is_excluded(Path::new("web/node_modules/react/index.js")));
        assert!(rules.is_excluded(Path::new(".ecr-ci/runs/abc/run_state.json")));
    }

    #[test]
    fn test_sources_kept() {
        let rules = ExcludeRules::new().unwrap();

        assert!(!rules.is_excluded(Path::new("Dockerfile")));
        assert!(!rules.is_excluded(Path::new("app/models/user.rb")));
        assert!(!rules.is_excluded(Path::new(".ecr-ci/stack.toml")));
        assert!(!rules.is_excluded(Path::new(".gitignore")));
    }

    #[test]
    fn test_custom_patterns_cover_directories() {
        let rules = ExcludeRules::new()
            .unwrap()
            .with_patterns(&["*.log", "tmp/"])
            .unwrap();

        assert!(rules.is_excluded(Path::new("development.log")));
        assert!(rules.is_excluded(Path::new("tmp")));
        assert!(rules.is_excluded(Path::new("tmp/cache/x")));
        assert!(rules.is_excluded(Path::new(".git")));
    }

    #[test]
    fn test_ignore_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# local only").unwrap();
        writeln!(file, "log").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  *.tmp  ").unwrap();

        let rules = ExcludeRules::new()
            .unwrap()
            .with_ignore_file(file.path())
            .unwrap();

        assert!(rules.is_excluded(Path::new("log/production.log")));
        assert!(rules.is_excluded(Path::new("a.tmp")));
        assert!(!rules.is_excluded(Path::new("# local only")));
    }

    #[test]
    fn test_bad_pattern() {
        let result = ExcludeRules::new().unwrap().with_patterns(&["a[b"]);
        assert!(matches!(result, Err(ExcludeError::GlobError(_))));
    }
}
