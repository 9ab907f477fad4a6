//! Database models for vault entries and the change log.

use crate::crypto::CharsetMode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of record an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Password,
    Bookmark,
    FileRef,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Bookmark => "bookmark",
            Self::FileRef => "file_ref",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "password" => Some(Self::Password),
            "bookmark" => Some(Self::Bookmark),
            "file_ref" => Some(Self::FileRef),
            _ => None,
        }
    }

    /// Config key holding this type's at-rest encryption policy.
    pub fn policy_key(self) -> &'static str {
        match self {
            Self::Password => "passwordEncrypt",
            Self::Bookmark => "bookmarkEncrypt",
            Self::FileRef => "fileRefEncrypt",
        }
    }

    pub const ALL: [EntryType; 3] = [Self::Password, Self::Bookmark, Self::FileRef];
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vault entry in its plaintext form.
///
/// This is also the sync payload shape, so field names follow the camelCase
/// wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,

    // Password entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset_mode: Option<CharsetMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_length: Option<usize>,

    // Bookmarks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,

    // File references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// `Some(false)` marks an entry kept in plaintext at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
}

impl Entry {
    /// Whether this entry's sensitive fields are sealed at rest.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted != Some(false)
    }
}

/// Input for creating an entry; the vault assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub entry_type: EntryType,
    pub tags: Vec<String>,
    pub folder: String,
    pub description: String,
    pub codename: Option<String>,
    pub salt: Option<String>,
    pub charset_mode: Option<CharsetMode>,
    pub password_length: Option<usize>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub favicon: Option<String>,
    pub file_name: Option<String>,
    pub source_url: Option<String>,
}

impl NewEntry {
    fn empty(entry_type: EntryType) -> Self {
        Self {
            entry_type,
            tags: Vec::new(),
            folder: String::new(),
            description: String::new(),
            codename: None,
            salt: None,
            charset_mode: None,
            password_length: None,
            url: None,
            title: None,
            favicon: None,
            file_name: None,
            source_url: None,
        }
    }

    pub fn password(codename: impl Into<String>, mode: CharsetMode, length: usize) -> Self {
        Self {
            codename: Some(codename.into()),
            charset_mode: Some(mode),
            password_length: Some(length),
            ..Self::empty(EntryType::Password)
        }
    }

    pub fn bookmark(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: Some(title.into()),
            ..Self::empty(EntryType::Bookmark)
        }
    }

    pub fn file_ref(file_name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            source_url: Some(source_url.into()),
            ..Self::empty(EntryType::FileRef)
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub(crate) fn into_entry(self, id: Uuid, now: i64) -> Entry {
        Entry {
            id,
            entry_type: self.entry_type,
            tags: self.tags,
            folder: self.folder,
            description: self.description,
            created_at: now,
            updated_at: now,
            codename: self.codename,
            salt: self.salt,
            charset_mode: self.charset_mode,
            password_length: self.password_length,
            url: self.url,
            title: self.title,
            favicon: self.favicon,
            file_name: self.file_name,
            source_url: self.source_url,
            encrypted: None,
        }
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub tags: Option<Vec<String>>,
    pub folder: Option<String>,
    pub description: Option<String>,
    pub codename: Option<String>,
    pub salt: Option<String>,
    pub charset_mode: Option<CharsetMode>,
    pub password_length: Option<usize>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub favicon: Option<String>,
    pub file_name: Option<String>,
    pub source_url: Option<String>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply_to(self, entry: &mut Entry) {
        if let Some(tags) = self.tags {
            entry.tags = tags;
        }
        if let Some(folder) = self.folder {
            entry.folder = folder;
        }
        if let Some(description) = self.description {
            entry.description = description;
        }
        if self.codename.is_some() {
            entry.codename = self.codename;
        }
        if self.salt.is_some() {
            entry.salt = self.salt;
        }
        if self.charset_mode.is_some() {
            entry.charset_mode = self.charset_mode;
        }
        if self.password_length.is_some() {
            entry.password_length = self.password_length;
        }
        if self.url.is_some() {
            entry.url = self.url;
        }
        if self.title.is_some() {
            entry.title = self.title;
        }
        if self.favicon.is_some() {
            entry.favicon = self.favicon;
        }
        if self.file_name.is_some() {
            entry.file_name = self.file_name;
        }
        if self.source_url.is_some() {
            entry.source_url = self.source_url;
        }
    }
}

/// Local mutation kind recorded in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// What a change record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Entry,
    /// Reserved in the wire format; never produced or applied
    Config,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Config => "config",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entry" => Some(Self::Entry),
            "config" => Some(Self::Config),
            _ => None,
        }
    }
}

/// One row of the local change log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogRecord {
    pub local_sequence_id: i64,
    pub entry_id: Uuid,
    pub entry_type: ChangeKind,
    pub operation: ChangeOperation,
    /// Wall-clock millis of the mutation
    pub timestamp: i64,
    pub origin_device_id: String,
    pub synced: bool,
}
