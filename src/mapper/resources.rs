//! Resource location and glob enumeration.
//!
//! `classpath:` locations are looked up under an ordered list of resource
//! roots; `file:` locations (and bare paths) are read from the filesystem.
//! Patterns support `*`, `?` and `**`, and are expanded once, when the
//! session factory is built.

use crate::error::{DataError, DataResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const CLASSPATH_PREFIX: &str = "classpath:";
const CLASSPATH_ALL_PREFIX: &str = "classpath*:";
const FILE_PREFIX: &str = "file:";

/// A located resource file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Location as the caller would write it, used in error messages.
    pub location: String,
    pub path: PathBuf,
}

impl Resource {
    pub fn read_to_string(&self) -> DataResult<String> {
        std::fs::read_to_string(&self.path).map_err(|e| {
            DataError::configuration(format!("Cannot read resource: {}", e), &self.location)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location<'a> {
    Classpath(&'a str),
    File(&'a str),
}

fn parse_location(location: &str) -> Location<'_> {
    if let Some(rest) = location.strip_prefix(CLASSPATH_ALL_PREFIX) {
        Location::Classpath(rest.trim_start_matches('/'))
    } else if let Some(rest) = location.strip_prefix(CLASSPATH_PREFIX) {
        Location::Classpath(rest.trim_start_matches('/'))
    } else if let Some(rest) = location.strip_prefix(FILE_PREFIX) {
        Location::File(rest)
    } else {
        Location::File(location)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceResolver {
    roots: Vec<PathBuf>,
}

impl ResourceResolver {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Locate a single resource. The first root that has it wins.
    pub fn resolve(&self, location: &str) -> DataResult<Resource> {
        let found = match parse_location(location) {
            Location::Classpath(relative) => self
                .roots
                .iter()
                .map(|root| root.join(relative))
                .find(|path| path.is_file()),
            Location::File(path) => Some(PathBuf::from(path)).filter(|p| p.is_file()),
        };

        found
            .map(|path| Resource {
                location: location.to_string(),
                path,
            })
            .ok_or_else(|| DataError::configuration("Resource not found", location))
    }

    /// Expand a glob pattern into every matching file, sorted by location.
    /// No match is an empty list; the caller decides whether that is an
    /// error.
    pub fn resolve_pattern(&self, pattern: &str) -> DataResult<Vec<Resource>> {
        let mut found = match parse_location(pattern) {
            Location::Classpath(relative) => {
                let mut all = Vec::new();
                for root in &self.roots {
                    for (rel, path) in glob_under(root, relative)? {
                        all.push(Resource {
                            location: format!("{}{}", CLASSPATH_PREFIX, rel),
                            path,
                        });
                    }
                }
                all
            }
            Location::File(path) => {
                let (root, relative) = split_absolute_pattern(path);
                glob_under(&root, &relative)?
                    .into_iter()
                    .map(|(_, path)| Resource {
                        location: format!("{}{}", FILE_PREFIX, path.display()),
                        path,
                    })
                    .collect()
            }
        };

        found.sort_by(|a, b| a.location.cmp(&b.location));
        found.dedup_by(|a, b| a.path == b.path);
        Ok(found)
    }
}

/// Split `/a/b/**/*.xml` into the fixed directory `/a/b` and the pattern
/// `**/*.xml`.
fn split_absolute_pattern(path: &str) -> (PathBuf, String) {
    let segments: Vec<&str> = path.split('/').collect();
    let fixed = segments
        .iter()
        .take_while(|s| !has_wildcard(s))
        .count();

    if fixed == segments.len() {
        // No wildcard: the pattern is the file itself.
        let p = Path::new(path);
        let root = p.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return (root, name);
    }

    let root = segments[..fixed].join("/");
    let root = if root.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else if root.is_empty() {
        ".".to_string()
    } else {
        root
    };
    (PathBuf::from(root), segments[fixed..].join("/"))
}

fn has_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?'])
}

/// Walk `root` and return `(relative path, full path)` for files matching
/// `pattern`. Relative paths use `/` separators.
fn glob_under(root: &Path, pattern: &str) -> DataResult<Vec<(String, PathBuf)>> {
    let matcher = glob_to_regex(pattern)?;

    // Start the walk at the fixed prefix of the pattern.
    let fixed: Vec<&str> = pattern
        .split('/')
        .take_while(|s| !has_wildcard(s))
        .collect();
    let start = if fixed.len() == pattern.split('/').count() {
        root.join(fixed[..fixed.len().saturating_sub(1)].join("/"))
    } else {
        root.join(fixed.join("/"))
    };
    if !start.is_dir() {
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    for entry in WalkDir::new(&start)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if matcher.is_match(&rel) {
            matches.push((rel, entry.path().to_path_buf()));
        }
    }
    Ok(matches)
}

/// Translate an Ant-style glob into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> DataResult<Regex> {
    let mut re = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');

    Regex::new(&re)
        .map_err(|e| DataError::configuration(format!("Invalid resource pattern: {}", e), pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "<mapper/>").unwrap();
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("mybatis-mapper/**/*.xml").unwrap();
        assert!(re.is_match("mybatis-mapper/UserMapper.xml"));
        assert!(re.is_match("mybatis-mapper/user/UserMapper.xml"));
        assert!(re.is_match("mybatis-mapper/a/b/c/X.xml"));
        assert!(!re.is_match("mybatis-mapper/user/UserMapper.xml.bak"));
        assert!(!re.is_match("other/UserMapper.xml"));

        let re = glob_to_regex("m/?.xml").unwrap();
        assert!(re.is_match("m/a.xml"));
        assert!(!re.is_match("m/ab.xml"));
    }

    #[test]
    fn test_resolve_classpath_first_root_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(second.path(), "mybatis-config.xml");

        let resolver = ResourceResolver::new([first.path(), second.path()]);
        let resource = resolver.resolve("classpath:mybatis-config.xml").unwrap();
        assert_eq!(resource.path, second.path().join("mybatis-config.xml"));

        touch(first.path(), "mybatis-config.xml");
        let resource = resolver.resolve("classpath:mybatis-config.xml").unwrap();
        assert_eq!(resource.path, first.path().join("mybatis-config.xml"));
    }

    #[test]
    fn test_resolve_missing_names_location() {
        let resolver = ResourceResolver::new([tempfile::tempdir().unwrap().path()]);
        let err = resolver.resolve("classpath:mybatis-config.xml").unwrap_err();
        assert!(matches!(err, DataError::Configuration { .. }));
        assert!(err.to_string().contains("classpath:mybatis-config.xml"));
    }

    #[test]
    fn test_resolve_pattern_across_roots() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(first.path(), "mybatis-mapper/user/UserMapper.xml");
        touch(first.path(), "mybatis-mapper/notes.txt");
        touch(second.path(), "mybatis-mapper/OrderMapper.xml");

        let resolver = ResourceResolver::new([first.path(), second.path()]);
        let found = resolver
            .resolve_pattern("classpath:mybatis-mapper/**/*.xml")
            .unwrap();
        let locations: Vec<_> = found.iter().map(|r| r.location.as_str()).collect();
        assert_eq!(
            locations,
            vec![
                "classpath:mybatis-mapper/OrderMapper.xml",
                "classpath:mybatis-mapper/user/UserMapper.xml",
            ]
        );
    }

    #[test]
    fn test_resolve_pattern_no_match_is_empty() {
        let resolver = ResourceResolver::new([tempfile::tempdir().unwrap().path()]);
        assert!(resolver
            .resolve_pattern("classpath:mybatis-mapper/**/*.xml")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_resolve_file_pattern() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "mappers/A.xml");
        touch(dir.path(), "mappers/deep/B.xml");

        let resolver = ResourceResolver::default();
        let pattern = format!("file:{}/mappers/**/*.xml", dir.path().display());
        let found = resolver.resolve_pattern(&pattern).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.location.starts_with("file:")));

        let single = format!("file:{}/mappers/A.xml", dir.path().display());
        assert!(resolver.resolve(&single).is_ok());
    }
}
