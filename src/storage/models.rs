use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a file as seen by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Discovered, not yet attempted.
    #[default]
    Pending,
    /// In flight. Never survives a reload.
    Uploading,
    /// Accepted remotely; carries a pending media id and/or a media id.
    Uploaded,
    /// The remote copy exists but was soft-deleted remotely.
    #[serde(rename = "uploaded-deleted")]
    UploadedDeleted,
    Errored,
    /// Explicitly requested re-attempt. Forces a remote re-check.
    Retrying,
    /// Extension not in an enabled class. No network call is made.
    RejectedFormat,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Uploaded => "uploaded",
            FileStatus::UploadedDeleted => "uploaded-deleted",
            FileStatus::Errored => "errored",
            FileStatus::Retrying => "retrying",
            FileStatus::RejectedFormat => "rejected_format",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local file keyed by its content signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub signature: String,
    pub path: PathBuf,
    pub name: String,
    /// Upper-cased, with the leading dot (".JPG"). Empty when the file has none.
    pub extension: String,
    #[serde(default)]
    pub pending_media_id: Option<String>,
    #[serde(default)]
    pub media_id: Option<String>,
    #[serde(default)]
    pub status: FileStatus,
    #[serde(default)]
    pub missing_on_filesystem: bool,
    /// The next transfer must reset the remote partial upload before sending.
    #[serde(default)]
    pub restart_transfer: bool,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// A fresh `pending` record for a file seen for the first time.
    pub fn discovered(signature: impl Into<String>, path: &Path) -> Self {
        let mut record = Self {
            signature: signature.into(),
            path: PathBuf::new(),
            name: String::new(),
            extension: String::new(),
            pending_media_id: None,
            media_id: None,
            status: FileStatus::Pending,
            missing_on_filesystem: false,
            restart_transfer: false,
            uploaded_at: None,
            updated_at: Utc::now(),
        };
        record.relocate(path);
        record
    }

    /// Point the record at the path the content was most recently found at.
    pub fn relocate(&mut self, path: &Path) {
        self.path = path.to_path_buf();
        self.name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.extension = extension_of(path);
        self.missing_on_filesystem = false;
    }

    /// True once the remote has handed back an identifier for this content.
    pub fn has_remote_id(&self) -> bool {
        self.pending_media_id.as_deref().is_some_and(|id| !id.is_empty())
            || self.media_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// A directory the user asked to watch (or stop watching).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub path: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    /// Watch-enabled. Exactly the directories with this set have an active watch.
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub missing_on_filesystem: bool,
    pub updated_at: DateTime<Utc>,
}

impl DirectoryRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: false,
            watch: false,
            missing_on_filesystem: false,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    Image,
    Raw,
    Video,
}

/// Which media classes are uploaded and how they are recognized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub upload_images: bool,
    pub upload_video: bool,
    pub upload_raw: bool,
    pub image_extensions: Vec<String>,
    pub raw_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            upload_images: true,
            upload_video: true,
            upload_raw: true,
            image_extensions: vec![".JPG".into(), ".JPEG".into(), ".PNG".into()],
            raw_extensions: vec![".NEF".into(), ".CR2".into()],
            video_extensions: vec![".MOV".into()],
        }
    }
}

impl Settings {
    /// Classify an extension (any case, with or without the leading dot).
    pub fn classify(&self, extension: &str) -> Option<MediaClass> {
        let extension = normalize_extension(extension);
        if extension.is_empty() {
            return None;
        }
        let listed = |list: &[String]| list.iter().any(|e| normalize_extension(e) == extension);

        if listed(&self.image_extensions) {
            Some(MediaClass::Image)
        } else if listed(&self.raw_extensions) {
            Some(MediaClass::Raw)
        } else if listed(&self.video_extensions) {
            Some(MediaClass::Video)
        } else {
            None
        }
    }

    pub fn is_enabled(&self, class: MediaClass) -> bool {
        match class {
            MediaClass::Image => self.upload_images,
            MediaClass::Raw => self.upload_raw,
            MediaClass::Video => self.upload_video,
        }
    }

    /// Recognized and in an enabled class.
    pub fn is_uploadable(&self, extension: &str) -> bool {
        self.classify(extension)
            .is_some_and(|class| self.is_enabled(class))
    }

    /// Recognized as media at all, regardless of enablement.
    pub fn is_media(&self, extension: &str) -> bool {
        self.classify(extension).is_some()
    }
}

/// Upper-cased extension of `path` with its leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_uppercase()))
        .unwrap_or_default()
}

fn normalize_extension(extension: &str) -> String {
    let upper = extension.trim().to_uppercase();
    if upper.is_empty() || upper.starts_with('.') {
        upper
    } else {
        format!(".{upper}")
    }
}
