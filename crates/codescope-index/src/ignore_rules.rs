//! Ignore-rule matching: built-in defaults plus the repository `.gitignore`.
//!
//! Rules are glob patterns. A trailing slash marks a directory rule, which only
//! matches parent directories of a path. Other rules match any single path
//! segment (file or directory name) or the full relative path. A built-in
//! extension denylist rejects binary artifacts regardless of user rules.

use std::path::{Component, Path};

use glob::{MatchOptions, Pattern};

const DEFAULT_RULES: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    "node_modules/",
    "target/",
    "__pycache__/",
    ".venv/",
    "venv/",
    "dist/",
    "build/",
    ".idea/",
    ".vscode/",
    ".DS_Store",
    "*.min.js",
    "*.lock",
];

const DENIED_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd",
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war",
    // executables and objects
    "exe", "dll", "so", "dylib", "bin", "o", "a", "obj", "class", "pyc", "pyo", "wasm",
    // media, fonts, documents, databases
    "mp3", "mp4", "mov", "avi", "wav", "flac", "woff", "woff2", "ttf", "otf", "eot", "pdf",
    "db", "sqlite", "sqlite3",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    dir_only: bool,
    /// Rule contains a slash and matches relative paths rather than names.
    anchored: bool,
}

impl Rule {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        if line.starts_with('!') {
            tracing::debug!(rule = line, "negated ignore rules are not supported");
            return None;
        }

        let (body, dir_only) = match line.strip_suffix('/') {
            Some(stripped) => (stripped, true),
            None => (line, false),
        };
        let leading_slash = body.starts_with('/');
        let body = body.trim_start_matches('/');
        if body.is_empty() {
            return None;
        }
        let anchored = leading_slash || body.contains('/');

        match Pattern::new(body) {
            Ok(pattern) => Some(Self {
                pattern,
                dir_only,
                anchored,
            }),
            Err(e) => {
                tracing::warn!(rule = line, "invalid ignore pattern: {e}");
                None
            }
        }
    }

    fn matches(&self, segments: &[&str], is_dir: bool) -> bool {
        let parents = if is_dir {
            segments
        } else {
            &segments[..segments.len().saturating_sub(1)]
        };

        if self.dir_only {
            return if self.anchored {
                (1..=parents.len()).any(|i| self.matches_path(&parents[..i]))
            } else {
                parents.iter().any(|s| self.matches_name(s))
            };
        }

        if self.anchored {
            (1..=segments.len()).any(|i| self.matches_path(&segments[..i]))
        } else {
            segments.iter().any(|s| self.matches_name(s)) || self.matches_path(segments)
        }
    }

    fn matches_name(&self, segment: &str) -> bool {
        self.pattern.matches_with(segment, MATCH_OPTIONS)
    }

    fn matches_path(&self, segments: &[&str]) -> bool {
        self.pattern.matches_with(&segments.join("/"), MATCH_OPTIONS)
    }
}

/// Ordered set of ignore rules for one repository root.
///
/// Loaded once per index build; `.gitignore` edits are picked up only by the
/// next full build.
#[derive(Debug, Clone)]
pub struct IgnoreRuleSet {
    rules: Vec<Rule>,
}

impl IgnoreRuleSet {
    /// Built-in defaults only.
    #[must_use]
    pub fn defaults() -> Self {
        Self::from_patterns(DEFAULT_RULES.iter().copied())
    }

    /// Defaults followed by the rules in `<root>/.gitignore`, if present.
    #[must_use]
    pub fn load(root: &Path) -> Self {
        let mut set = Self::defaults();
        let gitignore = root.join(".gitignore");
        match std::fs::read_to_string(&gitignore) {
            Ok(content) => {
                let before = set.rules.len();
                set.rules.extend(content.lines().filter_map(Rule::parse));
                tracing::debug!(
                    path = %gitignore.display(),
                    rules = set.rules.len() - before,
                    "loaded gitignore"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %gitignore.display(), "cannot read gitignore: {e}");
            }
        }
        set
    }

    /// Parse rules from gitignore-style lines; comments and blanks are skipped.
    pub fn from_patterns<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            rules: lines.into_iter().filter_map(Rule::parse).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether a file path is ineligible for indexing.
    ///
    /// Paths outside `root` are treated as ignored so walks stay total.
    #[must_use]
    pub fn should_ignore(&self, path: &Path, root: &Path) -> bool {
        self.check(path, root, false)
    }

    /// Like [`should_ignore`](Self::should_ignore), but treats `path` as a
    /// directory so directory rules can prune it before descending.
    #[must_use]
    pub fn should_ignore_dir(&self, path: &Path, root: &Path) -> bool {
        self.check(path, root, true)
    }

    fn check(&self, path: &Path, root: &Path, is_dir: bool) -> bool {
        let Ok(rel) = path.strip_prefix(root) else {
            return true;
        };

        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => match s.to_str() {
                    Some(s) => segments.push(s),
                    None => return true,
                },
                Component::CurDir => {}
                _ => return true,
            }
        }
        if segments.is_empty() {
            return false;
        }

        if !is_dir && has_denied_extension(segments[segments.len() - 1]) {
            return true;
        }

        self.rules.iter().any(|r| r.matches(&segments, is_dir))
    }
}

impl Default for IgnoreRuleSet {
    fn default() -> Self {
        Self::defaults()
    }
}

fn has_denied_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            DENIED_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Free-function form of [`IgnoreRuleSet::should_ignore`].
#[must_use]
pub fn should_ignore(path: &Path, root: &Path, rules: &IgnoreRuleSet) -> bool {
    rules.should_ignore(path, root)
}
