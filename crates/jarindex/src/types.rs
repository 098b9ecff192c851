//! Core value types shared across the index.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One extracted type record, stored as an ordered child of a resource
/// entry. The record is opaque to the index beyond the identity fields the
/// store needs for ordered children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    /// Dot-separated binary name, e.g. `com.example.Foo`.
    pub binary_name: String,
    /// JVM field descriptor, e.g. `Lcom/example/Foo;`.
    pub field_descriptor: String,
}

/// A logical workspace element that maps onto an indexed location. Several
/// owners may share one location (multiple projects referencing the same
/// library).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Workspace path of the referencing element.
    pub element: String,
    /// Name of the owning project.
    pub project: String,
    /// Whether the owning project is currently open.
    pub project_open: bool,
}

/// An indexable location, resolved to its kind at snapshot-build time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Indexable {
    /// A container file holding multiple compiled-type members.
    Archive(PathBuf),
    /// A loose compiled-class file.
    SingleFile(PathBuf),
}

impl Indexable {
    pub fn location(&self) -> &Path {
        match self {
            Self::Archive(path) | Self::SingleFile(path) => path,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Self::Archive(_))
    }
}

/// Canonical string key for a location, as stored in the index.
pub fn location_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
