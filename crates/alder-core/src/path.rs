//! Distributed filesystem paths.
//!
//! A [`DfsPath`] is an immutable, forward-slash-delimited sequence of
//! components. The root directory is the empty sequence, printed as `/`.
//! Components may not be empty and may not contain `/` or `:` (the slash
//! is the delimiter; the colon is reserved for application use).
//!
//! Paths carry a total order used by the hierarchical locking scheme:
//! fewer components first, ties broken by the canonical string. Locking
//! proceeds top-down from the root, so two agents that lock any set of
//! paths in increasing order follow compatible dependency chains and
//! cannot deadlock.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use snafu::ensure;

use crate::error::BadArgumentSnafu;
use crate::error::BadPathSnafu;
use crate::error::DfsError;
use crate::error::NotFoundSnafu;

/// An immutable filesystem path.
///
/// Equality, hashing, and ordering are all consistent with the canonical
/// string form (`/` for root, `/c1/c2/...` otherwise).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DfsPath {
    components: Vec<String>,
}

impl DfsPath {
    /// The root directory (the empty component sequence).
    pub fn root() -> Self {
        Self { components: Vec::new() }
    }

    /// Parse a path from its string form.
    ///
    /// The string must begin with `/` and must not contain `:`. Empty
    /// components (from doubled or trailing slashes) are dropped.
    pub fn parse(path: &str) -> Result<Self, DfsError> {
        ensure!(
            path.starts_with('/'),
            BadPathSnafu { reason: format!("{path:?} does not start with '/'") }
        );
        ensure!(
            !path.contains(':'),
            BadPathSnafu { reason: format!("{path:?} contains ':'") }
        );

        let components = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { components })
    }

    /// Create a new path by appending one component to this path.
    pub fn append(&self, component: &str) -> Result<Self, DfsError> {
        ensure!(
            !component.is_empty(),
            BadPathSnafu { reason: "empty path component".to_string() }
        );
        ensure!(
            !component.contains('/') && !component.contains(':'),
            BadPathSnafu { reason: format!("component {component:?} contains '/' or ':'") }
        );

        let mut components = self.components.clone();
        components.push(component.to_string());
        Ok(Self { components })
    }

    /// Whether this path is the root directory.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// The number of components in the path. Root has zero.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// The components of the path, in order.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The parent of this path. Fails on root, which has no parent.
    pub fn parent(&self) -> Result<Self, DfsError> {
        ensure!(
            !self.is_root(),
            BadPathSnafu { reason: "root has no parent".to_string() }
        );
        Ok(Self { components: self.components[..self.components.len() - 1].to_vec() })
    }

    /// The last component of this path. Fails on root.
    pub fn last(&self) -> Result<&str, DfsError> {
        self.components
            .last()
            .map(String::as_str)
            .ok_or_else(|| DfsError::BadPath { reason: "root has no last component".to_string() })
    }

    /// Whether `other` is a (non-strict) prefix of this path.
    ///
    /// Every path is a subpath of itself; root is a subpath of every path.
    pub fn is_subpath(&self, other: &DfsPath) -> bool {
        other.components.len() <= self.components.len()
            && self.components[..other.components.len()] == other.components[..]
    }

    /// The subpath chain: root, then every strict prefix, then this path.
    ///
    /// This is exactly the sequence of locks that must be acquired, in
    /// order, to lock this path. The chain has `component_count() + 1`
    /// entries and every adjacent pair is parent and child.
    pub fn subpaths(&self) -> Vec<DfsPath> {
        let mut chain = Vec::with_capacity(self.components.len() + 1);
        for len in 0..=self.components.len() {
            chain.push(Self { components: self.components[..len].to_vec() });
        }
        chain
    }

    /// Enumerate every regular file under a local directory tree.
    ///
    /// Returns the files' paths relative to `directory`. Used by storage
    /// servers to announce their contents at registration time.
    pub fn list_local_tree(directory: &std::path::Path) -> Result<Vec<DfsPath>, DfsError> {
        ensure!(
            directory.exists(),
            NotFoundSnafu { path: directory.display().to_string() }
        );
        ensure!(
            directory.is_dir(),
            BadArgumentSnafu { reason: format!("{} is not a directory", directory.display()) }
        );

        let mut files = Vec::new();
        walk_local_tree(directory, &DfsPath::root(), &mut files)?;
        Ok(files)
    }
}

fn walk_local_tree(
    dir: &std::path::Path,
    prefix: &DfsPath,
    out: &mut Vec<DfsPath>,
) -> Result<(), DfsError> {
    let entries = fs::read_dir(dir).map_err(|err| DfsError::BadArgument {
        reason: format!("cannot read directory {}: {err}", dir.display()),
    })?;

    for entry in entries {
        let entry = entry.map_err(|err| DfsError::BadArgument {
            reason: format!("cannot read entry under {}: {err}", dir.display()),
        })?;
        let name = entry.file_name();
        let name = name.to_str().ok_or_else(|| DfsError::BadPath {
            reason: format!("non-UTF-8 file name under {}", dir.display()),
        })?;
        let path = prefix.append(name)?;

        let file_type = entry.file_type().map_err(|err| DfsError::BadArgument {
            reason: format!("cannot stat {}: {err}", entry.path().display()),
        })?;
        if file_type.is_dir() {
            walk_local_tree(&entry.path(), &path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

impl fmt::Display for DfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl FromStr for DfsPath {
    type Err = DfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DfsPath {
    type Error = DfsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DfsPath> for String {
    fn from(path: DfsPath) -> Self {
        path.to_string()
    }
}

impl Ord for DfsPath {
    /// Orders paths for deadlock-free lock acquisition: shallower paths
    /// first (the root sorts before everything), ties broken by the
    /// canonical string.
    fn cmp(&self, other: &Self) -> Ordering {
        self.components
            .len()
            .cmp(&other.components.len())
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

impl PartialOrd for DfsPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
