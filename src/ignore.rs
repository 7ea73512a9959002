//! Ignore rule collection from `.gitignore` / `.deploy_ignore` files and user input.
//!
//! Rules are stored anchored: every pattern remembers the directory it was
//! declared in, so `build/` in `sub/.gitignore` only excludes `sub/build`.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Primary ignore file looked up in every directory
pub const PRIMARY_IGNORE_FILE: &str = ".gitignore";

/// Deploy-specific ignore file looked up in every directory
pub const SECONDARY_IGNORE_FILE: &str = ".deploy_ignore";

/// Prefix of the recursive-match token
pub(crate) const RECURSIVE_PREFIX: &str = "**/";

/// Where a rule's pattern is resolved from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Anchor {
    /// The directory containing the ignore file (or `/` for absolute user patterns)
    Dir(PathBuf),
    /// Bare user pattern: matches at any depth below the project root
    Anywhere,
}

/// A normalized, anchor-resolved exclusion pattern
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IgnoreRule {
    anchor: Anchor,
    pattern: String,
    dir_only: bool,
}

impl IgnoreRule {
    /// Parse one ignore-file line declared in `anchor`.
    ///
    /// Returns `None` for blank lines, comments, and lines that reduce to
    /// nothing once their prefix is stripped.
    pub fn parse_line(line: &str, anchor: &Path) -> Option<Self> {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let pattern = if let Some(rest) = line.strip_prefix(RECURSIVE_PREFIX) {
            let rest = rest.trim_start_matches('/');
            if rest.is_empty() {
                return None;
            }
            // Keep the token: `**/x` matches `x` at any depth below the anchor
            format!("{RECURSIVE_PREFIX}{rest}")
        } else if let Some(rest) = line.strip_prefix("./") {
            rest.to_string()
        } else if let Some(rest) = line.strip_prefix('/') {
            rest.to_string()
        } else {
            line.to_string()
        };

        Self::anchored(anchor.to_path_buf(), &pattern)
    }

    /// Rule for a caller-supplied pattern.
    ///
    /// Absolute patterns anchor at the filesystem root; `./x` anchors at the
    /// project root; anything else floats and matches at any depth.
    pub fn user(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if let Some(rest) = pattern.strip_prefix('/') {
            return Self::anchored(PathBuf::from("/"), rest);
        }
        if let Some(rest) = pattern.strip_prefix("./") {
            return Self::build(Anchor::Anywhere, rest, true);
        }
        Self::build(Anchor::Anywhere, pattern, false)
    }

    fn anchored(anchor: PathBuf, pattern: &str) -> Option<Self> {
        Self::build(Anchor::Dir(anchor), pattern, true)
    }

    fn build(anchor: Anchor, pattern: &str, rooted: bool) -> Option<Self> {
        let dir_only = pattern.ends_with('/');
        let pattern = pattern.trim_end_matches('/');
        if pattern.is_empty() {
            return None;
        }

        let pattern = match anchor {
            Anchor::Anywhere if !rooted && !pattern.starts_with(RECURSIVE_PREFIX) => {
                format!("{RECURSIVE_PREFIX}{pattern}")
            }
            _ => pattern.to_string(),
        };

        Some(Self {
            anchor,
            pattern,
            dir_only,
        })
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    /// Anchor-relative pattern, without the trailing directory marker
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True when the rule was written with a trailing `/`
    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    /// Absolute form of the rule (anchor joined with the pattern)
    pub fn normalized(&self, project_root: &Path) -> PathBuf {
        match &self.anchor {
            Anchor::Dir(dir) => dir.join(&self.pattern),
            Anchor::Anywhere => project_root.join(&self.pattern),
        }
    }
}

impl fmt::Display for IgnoreRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.anchor {
            Anchor::Dir(dir) => write!(f, "{}", dir.join(&self.pattern).display())?,
            Anchor::Anywhere => write!(f, "{}", self.pattern)?,
        }
        if self.dir_only {
            f.write_str("/")?;
        }
        Ok(())
    }
}

/// Caller-supplied ignore settings that outlive a single packaging run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreConfig {
    /// Extra patterns (gitignore-like)
    pub patterns: Vec<String>,
    /// Explicit file paths; relative ones resolve against the project root
    pub paths: Vec<PathBuf>,
}

/// Effective exclusion rules for one packaging operation
#[derive(Debug, Clone, Default)]
pub struct IgnoreRuleStore {
    rules: BTreeSet<IgnoreRule>,
    explicit_paths: BTreeSet<PathBuf>,
}

impl IgnoreRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh store seeded with the caller's patterns and paths
    pub fn from_config(config: &IgnoreConfig) -> Self {
        let mut store = Self::new();
        store.add_patterns(&config.patterns);
        store.add_explicit_paths(&config.paths);
        store
    }

    pub fn add_patterns<S: AsRef<str>>(&mut self, patterns: impl IntoIterator<Item = S>) {
        self.rules
            .extend(patterns.into_iter().filter_map(|p| IgnoreRule::user(p.as_ref())));
    }

    pub fn add_explicit_paths<P: AsRef<Path>>(&mut self, paths: impl IntoIterator<Item = P>) {
        self.explicit_paths
            .extend(paths.into_iter().map(|p| p.as_ref().to_path_buf()));
    }

    pub fn add_rule(&mut self, rule: IgnoreRule) {
        self.rules.insert(rule);
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.explicit_paths.clear();
    }

    pub fn rules(&self) -> impl Iterator<Item = &IgnoreRule> {
        self.rules.iter()
    }

    pub fn explicit_paths(&self) -> impl Iterator<Item = &Path> {
        self.explicit_paths.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.rules.len() + self.explicit_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.explicit_paths.is_empty()
    }

    /// Scan `root` and every non-hidden directory below it for ignore files.
    ///
    /// Unreadable files and directories are logged and skipped.
    pub fn collect_from_tree(&mut self, root: &Path) {
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path while collecting ignore rules");
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            for name in [PRIMARY_IGNORE_FILE, SECONDARY_IGNORE_FILE] {
                let ignore_file = entry.path().join(name);
                if ignore_file.is_file() {
                    self.parse_ignore_file(&ignore_file, entry.path());
                }
            }
        }
    }

    /// Add every rule in `ignore_file`, anchored at `anchor`
    pub fn parse_ignore_file(&mut self, ignore_file: &Path, anchor: &Path) {
        let content = match fs::read_to_string(ignore_file) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %ignore_file.display(), error = %e, "failed to read ignore file");
                return;
            }
        };

        let before = self.rules.len();
        self.rules
            .extend(content.lines().filter_map(|line| IgnoreRule::parse_line(line, anchor)));
        debug!(
            path = %ignore_file.display(),
            added = self.rules.len() - before,
            "parsed ignore file"
        );
    }
}

#[inline]
fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn anchor() -> PathBuf {
        PathBuf::from("/proj")
    }

    // ==================== IgnoreRule::parse_line tests ====================

    #[test]
    fn test_parse_skips_blank_and_comments() {
        assert!(IgnoreRule::parse_line("", &anchor()).is_none());
        assert!(IgnoreRule::parse_line("   ", &anchor()).is_none());
        assert!(IgnoreRule::parse_line("# comment", &anchor()).is_none());
        assert!(IgnoreRule::parse_line("/", &anchor()).is_none());
        assert!(IgnoreRule::parse_line("**/", &anchor()).is_none());
    }

    #[test]
    fn test_parse_leading_slash_is_anchor_rooted() {
        let rule = IgnoreRule::parse_line("/dist", &anchor()).unwrap();
        assert_eq!(rule.anchor(), &Anchor::Dir(anchor()));
        assert_eq!(rule.pattern(), "dist");
        assert_eq!(rule.normalized(Path::new("/other")), PathBuf::from("/proj/dist"));
    }

    #[test]
    fn test_parse_dot_slash_is_anchor_relative() {
        let rule = IgnoreRule::parse_line("./local.cfg", &anchor()).unwrap();
        assert_eq!(rule.pattern(), "local.cfg");
    }

    #[test]
    fn test_parse_keeps_recursive_token() {
        let rule = IgnoreRule::parse_line("**/node_modules/", &anchor()).unwrap();
        assert_eq!(rule.pattern(), "**/node_modules");
        assert!(rule.is_dir_only());
    }

    #[test]
    fn test_parse_plain_pattern() {
        let rule = IgnoreRule::parse_line("  *.log  ", &anchor()).unwrap();
        assert_eq!(rule.pattern(), "*.log");
        assert!(!rule.is_dir_only());
        assert_eq!(rule.to_string(), "/proj/*.log");
    }

    #[test]
    fn test_parse_trailing_slash_marks_directory() {
        let rule = IgnoreRule::parse_line("temp/", &anchor()).unwrap();
        assert_eq!(rule.pattern(), "temp");
        assert!(rule.is_dir_only());
        assert_eq!(rule.to_string(), "/proj/temp/");
    }

    #[test]
    fn test_parse_strips_bom() {
        let rule = IgnoreRule::parse_line("\u{feff}secret.env", &anchor()).unwrap();
        assert_eq!(rule.pattern(), "secret.env");
    }

    // ==================== IgnoreRule::user tests ====================

    #[test]
    fn test_user_bare_pattern_floats() {
        let rule = IgnoreRule::user("*.pyc").unwrap();
        assert_eq!(rule.anchor(), &Anchor::Anywhere);
        assert_eq!(rule.pattern(), "**/*.pyc");
    }

    #[test]
    fn test_user_absolute_pattern() {
        let rule = IgnoreRule::user("/srv/app/secret.txt").unwrap();
        assert_eq!(rule.anchor(), &Anchor::Dir(PathBuf::from("/")));
        assert_eq!(rule.pattern(), "srv/app/secret.txt");
    }

    #[test]
    fn test_user_dot_slash_pattern_is_root_relative() {
        let rule = IgnoreRule::user("./config/local.yaml").unwrap();
        assert_eq!(rule.anchor(), &Anchor::Anywhere);
        assert_eq!(rule.pattern(), "config/local.yaml");
    }

    // ==================== IgnoreRuleStore tests ====================

    #[test]
    fn test_store_set_semantics() {
        let mut store = IgnoreRuleStore::new();
        store.add_patterns(["*.log", "*.log", "tmp/"]);
        store.add_explicit_paths(["a.txt", "a.txt"]);
        assert_eq!(store.rules().count(), 2);
        assert_eq!(store.explicit_paths().count(), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_store_clear() {
        let mut store = IgnoreRuleStore::from_config(&IgnoreConfig {
            patterns: vec!["*.log".to_string()],
            paths: vec![PathBuf::from("x")],
        });
        assert!(!store.is_empty());
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_collect_from_tree_reads_both_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join(PRIMARY_IGNORE_FILE), "*.log\n# c\n\n").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join(SECONDARY_IGNORE_FILE), "/build\n").unwrap();

        let mut store = IgnoreRuleStore::new();
        store.collect_from_tree(root);

        let rules: Vec<_> = store.rules().cloned().collect();
        assert_eq!(rules.len(), 2);
        assert!(rules
            .iter()
            .any(|r| r.anchor() == &Anchor::Dir(root.to_path_buf()) && r.pattern() == "*.log"));
        assert!(rules
            .iter()
            .any(|r| r.anchor() == &Anchor::Dir(root.join("sub")) && r.pattern() == "build"));
    }

    #[test]
    fn test_collect_from_tree_skips_hidden_directories() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git").join(PRIMARY_IGNORE_FILE), "*.rs\n").unwrap();

        let mut store = IgnoreRuleStore::new();
        store.collect_from_tree(root);

        assert!(store.is_empty());
    }

    #[test]
    fn test_collect_from_tree_survives_unreadable_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        // Invalid UTF-8 makes read_to_string fail
        fs::write(root.join(PRIMARY_IGNORE_FILE), [0xff, 0xfe, 0x00, 0xc3]).unwrap();
        fs::write(root.join(SECONDARY_IGNORE_FILE), "docs/\n").unwrap();

        let mut store = IgnoreRuleStore::new();
        store.collect_from_tree(root);

        assert_eq!(store.rules().count(), 1);
    }

    #[test]
    fn test_parse_missing_ignore_file_is_skipped() {
        let mut store = IgnoreRuleStore::new();
        store.parse_ignore_file(Path::new("/definitely/not/here/.gitignore"), &anchor());
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_then_collect_only_reflects_current_tree() {
        let first = TempDir::new().unwrap();
        fs::write(first.path().join(PRIMARY_IGNORE_FILE), "old.txt\n").unwrap();
        let second = TempDir::new().unwrap();
        fs::write(second.path().join(PRIMARY_IGNORE_FILE), "new.txt\n").unwrap();

        let mut store = IgnoreRuleStore::new();
        store.collect_from_tree(first.path());
        store.clear();
        store.collect_from_tree(second.path());

        let patterns: Vec<_> = store.rules().map(|r| r.pattern().to_string()).collect();
        assert_eq!(patterns, vec!["new.txt".to_string()]);
    }
}
