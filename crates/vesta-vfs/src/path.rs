use std::fmt;
use std::path::{Path, PathBuf};

/// Path of an entry relative to the root of a delegate filesystem.
///
/// Stored as `/`-separated components without leading or trailing separators; the root is the
/// empty path. Construction normalizes lexically: `.` is dropped and `..` pops a component but
/// never climbs above the root.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfsPath(String);

impl VfsPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn new(path: impl AsRef<str>) -> Self {
        let mut stack: Vec<&str> = Vec::new();
        for segment in path.as_ref().split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => {
                    stack.pop();
                }
                segment => stack.push(segment),
            }
        }
        Self(stack.join("/"))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a single component. `name` must not contain separators.
    pub fn join(&self, name: &str) -> Self {
        debug_assert!(
            !name.contains('/') && !name.is_empty(),
            "invalid path component {name:?}"
        );
        if self.is_root() {
            Self(name.to_owned())
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_owned()),
            None => Self::root(),
        })
    }

    /// Last component; empty for the root.
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Returns whether `self` is `other` or lies below it.
    pub fn starts_with(&self, other: &VfsPath) -> bool {
        other.is_root()
            || self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
    }

    /// Resolves the path against a local directory.
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        out.extend(self.components());
        out
    }
}

impl fmt::Debug for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VfsPath(/{})", self.0)
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for VfsPath {
    fn from(value: &str) -> Self {
        VfsPath::new(value)
    }
}

/// Returns whether `name` can be used as a single path component.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}
