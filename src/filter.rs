use std::path::Path;

use crate::config::ResourcesConfig;

/// Decides which project-relative files take part in a backup or sync.
///
/// Combines the `[resources]` include/exclude patterns from `lrm.toml` with
/// the path arguments of the current command. Paths are always the
/// `/`-separated identifiers produced by [`crate::config::ProjectPaths::relative`].
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    scopes: Vec<String>,
}

impl ResourceFilter {
    pub fn from_config(config: &ResourcesConfig) -> Self {
        Self {
            include_patterns: config.include.clone(),
            exclude_patterns: config.exclude.clone(),
            scopes: Vec::new(),
        }
    }

    /// Restrict to the given files or directories. An empty list keeps
    /// every file.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes
            .into_iter()
            .map(|s| s.into().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// Only `.json` files are resource files for the bundled backend.
    pub fn is_resource_file(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "json")
    }

    pub fn should_include(&self, relative: &str) -> bool {
        if !self.in_scope(relative) {
            return false;
        }

        if self
            .exclude_patterns
            .iter()
            .any(|pattern| glob_match(pattern, relative))
        {
            return false;
        }

        if !self.include_patterns.is_empty()
            && !self
                .include_patterns
                .iter()
                .any(|pattern| glob_match(pattern, relative))
        {
            return false;
        }

        true
    }

    fn in_scope(&self, relative: &str) -> bool {
        if self.scopes.is_empty() {
            return true;
        }
        self.scopes.iter().any(|scope| {
            relative == scope
                || relative
                    .strip_prefix(scope.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Simple glob pattern matching
///
/// `*` matches any run of characters; a pattern without `*` matches as a
/// substring.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return text.contains(pattern);
    }

    let parts: Vec<_> = pattern.split('*').collect();
    let last = parts.len() - 1;
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == last {
            return text.len() >= pos + part.len() && text[pos..].ends_with(part);
        } else if let Some(idx) = text[pos..].find(part) {
            pos += idx + part.len();
        } else {
            return false;
        }
    }
    true
}
