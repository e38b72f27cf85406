use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// One parsed line from an ignore file.
///
/// Intentionally minimal compared to a real gitignore engine: no `!`
/// negation and no arbitrary-depth `**`. A pattern either matches a
/// basename (no `/` in the pattern body) or the whole root-relative path
/// (pattern contains a `/`), using plain shell-style `*`/`?` wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IgnorePattern {
    body: String,
    anchored: bool,
    dir_only: bool,
}

impl IgnorePattern {
    fn parse(line: &str) -> Option<IgnorePattern> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let dir_only = trimmed.ends_with('/');
        let mut body = if dir_only {
            trimmed.trim_end_matches('/').to_string()
        } else {
            trimmed.to_string()
        };
        let leading_slash = body.starts_with('/');
        if leading_slash {
            body = body.trim_start_matches('/').to_string();
        }
        let anchored = leading_slash || body.contains('/');
        Some(IgnorePattern {
            body,
            anchored,
            dir_only,
        })
    }

    fn matches(&self, basename: &str, relative: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.anchored {
            glob_match(&self.body, relative)
        } else {
            glob_match(&self.body, basename)
        }
    }
}

/// A loaded set of ignore patterns, one file's worth.
#[derive(Debug, Clone, Default)]
pub struct GitignoreFilter {
    patterns: Vec<IgnorePattern>,
}

impl GitignoreFilter {
    pub fn empty() -> GitignoreFilter {
        GitignoreFilter {
            patterns: Vec::new(),
        }
    }

    pub fn parse(contents: &str) -> GitignoreFilter {
        let patterns = contents.lines().filter_map(IgnorePattern::parse).collect();
        GitignoreFilter { patterns }
    }

    /// Loads `<root>/.fgdignore` if present; an absent file yields an empty,
    /// always-permit filter rather than an error.
    pub fn load(root: &Path) -> std::io::Result<GitignoreFilter> {
        let path = root.join(".fgdignore");
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(GitignoreFilter::parse(&contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(GitignoreFilter::empty()),
            Err(err) => Err(err),
        }
    }

    /// `relative` must already be root-relative, using `/` separators.
    pub fn is_ignored(&self, relative: &str, is_dir: bool) -> bool {
        let basename = relative.rsplit('/').next().unwrap_or(relative);
        self.patterns
            .iter()
            .any(|pattern| pattern.matches(basename, relative, is_dir))
    }
}

/// Shell-style glob match (`*` any run of characters, `?` exactly one),
/// memoized over (pattern index, text index) the way the daemon's own glob
/// matchers are, minus `**`/negation support. Exposed for callers (like
/// `search_in_files`'s filename filter) that need the same minimal glob
/// semantics outside of ignore-pattern matching.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let mut memo: HashMap<(usize, usize), bool> = HashMap::new();
    glob_match_inner(&p, &t, 0, 0, &mut memo)
}

fn glob_match_inner(
    p: &[char],
    t: &[char],
    pi: usize,
    ti: usize,
    memo: &mut HashMap<(usize, usize), bool>,
) -> bool {
    if let Some(cached) = memo.get(&(pi, ti)) {
        return *cached;
    }
    let result = if pi == p.len() {
        ti == t.len()
    } else if p[pi] == '*' {
        (ti..=t.len()).any(|skip| glob_match_inner(p, t, pi + 1, skip, memo))
    } else if ti == t.len() {
        false
    } else if p[pi] == '?' || p[pi] == t[ti] {
        glob_match_inner(p, t, pi + 1, ti + 1, memo)
    } else {
        false
    };
    memo.insert((pi, ti), result);
    result
}
