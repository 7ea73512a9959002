//! Per-file inclusion decisions against a compiled set of ignore rules.

use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::ignore::{Anchor, IgnoreRuleStore, RECURSIVE_PREFIX};

/// Names that are never shipped, wherever they appear in the tree
pub const SYSTEM_ARTIFACTS: &[&str] = &[
    ".DS_Store",   // macOS Finder metadata
    "Thumbs.db",   // Windows thumbnail cache
    ".git",        // version control
    ".svn",        // version control
    ".hg",         // version control
    "__pycache__", // Python byte-code cache
];

/// How a stored rule may match a candidate path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchPolicy {
    /// Anchor-relative path equals the literal pattern
    Exact,
    /// Anchor-relative path matches the pattern as a segment-aware glob
    Glob,
    /// Some ancestor directory of the path matches the pattern
    PrefixDir,
}

impl MatchPolicy {
    pub const ALL: [MatchPolicy; 3] = [MatchPolicy::Exact, MatchPolicy::Glob, MatchPolicy::PrefixDir];
}

#[inline]
pub fn is_system_artifact(name: &OsStr) -> bool {
    name.to_str().is_some_and(|s| SYSTEM_ARTIFACTS.contains(&s))
}

/// Rules sharing one anchor directory, compiled once
#[derive(Debug)]
struct AnchorGroup {
    anchor: PathBuf,
    literals: HashSet<String>,
    /// File-capable rules (no trailing `/`)
    files: GlobSet,
    /// Every rule, matched against ancestor directories
    dirs: GlobSet,
}

impl AnchorGroup {
    fn compile(anchor: PathBuf, rules: &[(&str, bool)]) -> Self {
        let mut literals = HashSet::new();
        let mut files = GlobSetBuilder::new();
        let mut dirs = GlobSetBuilder::new();

        for &(pattern, dir_only) in rules {
            if !dir_only {
                literals.insert(pattern.to_string());
            }
            let glob = match compile_glob(pattern) {
                Ok(glob) => glob,
                Err(e) => {
                    // e.g. `report[2024.pdf`
                    warn!(anchor = %anchor.display(), pattern, error = %e, "ignore pattern is not a valid glob, matching it literally");
                    match compile_glob(&literal_pattern(pattern)) {
                        Ok(glob) => glob,
                        Err(e) => {
                            warn!(anchor = %anchor.display(), pattern, error = %e, "dropping ignore pattern");
                            continue;
                        }
                    }
                }
            };
            if !dir_only {
                files.add(glob.clone());
            }
            dirs.add(glob);
        }

        Self {
            literals,
            files: build_set(&anchor, files),
            dirs: build_set(&anchor, dirs),
            anchor,
        }
    }

    fn matches(&self, path: &Path, policies: &[MatchPolicy]) -> bool {
        let Ok(rel) = path.strip_prefix(&self.anchor) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return false;
        }

        policies.iter().any(|policy| match policy {
            MatchPolicy::Exact => self.literals.contains(&*rel.to_string_lossy()),
            MatchPolicy::Glob => self.files.is_match(rel),
            MatchPolicy::PrefixDir => rel
                .ancestors()
                .skip(1)
                .take_while(|a| !a.as_os_str().is_empty())
                .any(|a| self.dirs.is_match(a)),
        })
    }
}

fn compile_glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// Escape every glob metacharacter, keeping a leading recursive token
fn literal_pattern(pattern: &str) -> String {
    match pattern.strip_prefix(RECURSIVE_PREFIX) {
        Some(rest) => format!("{RECURSIVE_PREFIX}{}", globset::escape(rest)),
        None => globset::escape(pattern),
    }
}

fn build_set(anchor: &Path, builder: GlobSetBuilder) -> GlobSet {
    builder.build().unwrap_or_else(|e| {
        warn!(anchor = %anchor.display(), error = %e, "failed to compile ignore rules");
        GlobSet::empty()
    })
}

/// Immutable selection state for one packaging run over one project root
#[derive(Debug)]
pub struct SelectionContext {
    root: PathBuf,
    groups: Vec<AnchorGroup>,
    explicit: HashSet<PathBuf>,
    policies: Vec<MatchPolicy>,
}

impl SelectionContext {
    /// Compile `store` for files under `root`
    pub fn compile(root: &Path, store: &IgnoreRuleStore) -> Self {
        let mut by_anchor: BTreeMap<PathBuf, Vec<(&str, bool)>> = BTreeMap::new();
        for rule in store.rules() {
            let anchor = match rule.anchor() {
                Anchor::Dir(dir) => dir.clone(),
                Anchor::Anywhere => root.to_path_buf(),
            };
            by_anchor
                .entry(anchor)
                .or_default()
                .push((rule.pattern(), rule.is_dir_only()));
        }

        let groups = by_anchor
            .into_iter()
            .map(|(anchor, rules)| AnchorGroup::compile(anchor, &rules))
            .collect();

        let explicit = store.explicit_paths().map(|p| root.join(p)).collect();

        Self {
            root: root.to_path_buf(),
            groups,
            explicit,
            policies: MatchPolicy::ALL.to_vec(),
        }
    }

    /// Restrict rule matching to the given policies
    pub fn with_policies(mut self, policies: &[MatchPolicy]) -> Self {
        self.policies = policies.to_vec();
        self
    }

    /// Also exclude `path` (e.g. the archive being written)
    pub fn exclude_path(&mut self, path: impl Into<PathBuf>) {
        self.explicit.insert(path.into());
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if `path` must be left out of the archive
    pub fn should_ignore(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let has_artifact = rel.components().any(|c| match c {
            Component::Normal(name) => is_system_artifact(name),
            _ => false,
        });
        if has_artifact {
            return true;
        }

        if self.explicit.contains(path) {
            return true;
        }

        self.groups.iter().any(|g| g.matches(path, &self.policies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ignore::IgnoreRule;

    fn root() -> PathBuf {
        PathBuf::from("/proj")
    }

    fn context(lines: &[&str]) -> SelectionContext {
        let mut store = IgnoreRuleStore::new();
        for line in lines {
            if let Some(rule) = IgnoreRule::parse_line(line, &root()) {
                store.add_rule(rule);
            }
        }
        SelectionContext::compile(&root(), &store)
    }

    fn ignored(ctx: &SelectionContext, rel: &str) -> bool {
        ctx.should_ignore(&root().join(rel))
    }

    // ==================== system artifact tests ====================

    #[test]
    fn test_system_artifacts_always_ignored() {
        let ctx = context(&[]);
        assert!(ignored(&ctx, ".DS_Store"));
        assert!(ignored(&ctx, "sub/Thumbs.db"));
        assert!(ignored(&ctx, ".git/HEAD"));
        assert!(ignored(&ctx, "pkg/__pycache__/mod.cpython-311.pyc"));
        assert!(!ignored(&ctx, "main.py"));
    }

    #[test]
    fn test_is_system_artifact() {
        assert!(is_system_artifact(OsStr::new(".svn")));
        assert!(!is_system_artifact(OsStr::new(".github")));
    }

    // ==================== default policy tests ====================

    #[test]
    fn test_extension_glob_at_anchor() {
        let ctx = context(&["*.log", "*.tmp"]);
        assert!(ignored(&ctx, "debug.log"));
        assert!(ignored(&ctx, "cache.tmp"));
        assert!(!ignored(&ctx, "main.py"));
        // Anchor-relative: a single `*` does not cross directories
        assert!(!ignored(&ctx, "sub/debug.log"));
    }

    #[test]
    fn test_directory_rule_excludes_descendants() {
        let ctx = context(&["temp/", "docs"]);
        assert!(ignored(&ctx, "temp/temp_file.txt"));
        assert!(ignored(&ctx, "temp/deep/nested.txt"));
        assert!(ignored(&ctx, "docs/guide.md"));
        assert!(!ignored(&ctx, "temporary.txt"));
    }

    #[test]
    fn test_dir_only_rule_does_not_match_file() {
        let ctx = context(&["build/"]);
        assert!(!ignored(&ctx, "build"));
        assert!(ignored(&ctx, "build/out.bin"));
    }

    #[test]
    fn test_recursive_token_matches_any_depth() {
        let ctx = context(&["**/node_modules/", "**/*.pyc"]);
        assert!(ignored(&ctx, "node_modules/a.js"));
        assert!(ignored(&ctx, "web/app/node_modules/b/index.js"));
        assert!(ignored(&ctx, "a/b/c.pyc"));
        assert!(!ignored(&ctx, "a/b/c.py"));
    }

    #[test]
    fn test_rule_does_not_escape_anchor() {
        let mut store = IgnoreRuleStore::new();
        store.add_rule(IgnoreRule::parse_line("*.md", &root().join("docs")).unwrap());
        let ctx = SelectionContext::compile(&root(), &store);

        assert!(ignored(&ctx, "docs/guide.md"));
        assert!(!ignored(&ctx, "README.md"));
    }

    #[test]
    fn test_floating_user_pattern() {
        let mut store = IgnoreRuleStore::new();
        store.add_patterns(["*.log", "cache/*"]);
        let ctx = SelectionContext::compile(&root(), &store);

        assert!(ignored(&ctx, "app.log"));
        assert!(ignored(&ctx, "var/app.log"));
        assert!(ignored(&ctx, "cache/x.bin"));
        assert!(ignored(&ctx, "web/cache/y.bin"));
        assert!(!ignored(&ctx, "cache.rs"));
    }

    #[test]
    fn test_explicit_paths() {
        let mut store = IgnoreRuleStore::new();
        store.add_explicit_paths(["config/local.yaml", "/proj/secret.env"]);
        let ctx = SelectionContext::compile(&root(), &store);

        assert!(ignored(&ctx, "config/local.yaml"));
        assert!(ignored(&ctx, "secret.env"));
        assert!(!ignored(&ctx, "config/prod.yaml"));
    }

    #[test]
    fn test_exclude_path() {
        let mut ctx = context(&[]);
        ctx.exclude_path(root().join("proj.tar.gz"));
        assert!(ignored(&ctx, "proj.tar.gz"));
    }

    #[test]
    fn test_invalid_glob_matches_literally() {
        let ctx = context(&["foo[", "cfg{local.yaml", "build[1]/", "*.log"]);
        assert!(ignored(&ctx, "x.log"));
        assert!(ignored(&ctx, "foo["));
        assert!(ignored(&ctx, "foo[/x"));
        assert!(ignored(&ctx, "cfg{local.yaml"));
        assert!(ignored(&ctx, "build[1]/out.o"));
        assert!(!ignored(&ctx, "foo"));
        assert!(!ignored(&ctx, "build1/out.o"));
    }

    #[test]
    fn test_invalid_glob_each_policy() {
        let exact = context(&["report[2024.pdf"]).with_policies(&[MatchPolicy::Exact]);
        assert!(ignored(&exact, "report[2024.pdf"));

        let glob = context(&["report[2024.pdf"]).with_policies(&[MatchPolicy::Glob]);
        assert!(ignored(&glob, "report[2024.pdf"));

        let prefix = context(&["build[1]/"]).with_policies(&[MatchPolicy::PrefixDir]);
        assert!(ignored(&prefix, "build[1]/out.o"));
    }

    #[test]
    fn test_invalid_floating_user_pattern_keeps_recursion() {
        let mut store = IgnoreRuleStore::new();
        store.add_patterns(["notes{draft.txt"]);
        let ctx = SelectionContext::compile(&root(), &store);
        assert!(ignored(&ctx, "notes{draft.txt"));
        assert!(ignored(&ctx, "a/b/notes{draft.txt"));
    }

    // ==================== individual policy tests ====================

    #[test]
    fn test_exact_policy_only() {
        let ctx = context(&["README.md", "*.md", "docs"]).with_policies(&[MatchPolicy::Exact]);
        assert!(ignored(&ctx, "README.md"));
        assert!(!ignored(&ctx, "CHANGELOG.md"));
        assert!(!ignored(&ctx, "docs/guide.txt"));
    }

    #[test]
    fn test_glob_policy_only() {
        let ctx = context(&["*.md", "docs"]).with_policies(&[MatchPolicy::Glob]);
        assert!(ignored(&ctx, "README.md"));
        assert!(!ignored(&ctx, "docs/guide.txt"));
    }

    #[test]
    fn test_prefix_dir_policy_only() {
        let ctx = context(&["README.md", "docs"]).with_policies(&[MatchPolicy::PrefixDir]);
        assert!(ignored(&ctx, "docs/guide.txt"));
        assert!(!ignored(&ctx, "README.md"));
    }

    #[test]
    fn test_no_policies_keeps_rules_inert() {
        let ctx = context(&["*.log"]).with_policies(&[]);
        assert!(!ignored(&ctx, "debug.log"));
        // System artifacts do not depend on rule policies
        assert!(ignored(&ctx, ".DS_Store"));
    }
}
