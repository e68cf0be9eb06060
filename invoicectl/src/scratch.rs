//! Scratch storage for uploaded files.
//!
//! Every upload is written to the scratch directory for the lifetime of one request so the
//! external parser can read it from disk. A [`ScratchFiles`] set owns the files of one request
//! and removes them when it is cleaned up or dropped, on every path out of the handler.

use bytes::Bytes;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Directory that holds scratch files. Created lazily on first write.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    base_path: PathBuf,
}

impl ScratchDir {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// Start an empty file set for one request.
    pub fn files(&self) -> ScratchFiles {
        ScratchFiles {
            dir: self.clone(),
            files: Vec::new(),
        }
    }

    /// Collision-resistant on-disk name: `<unix millis>-<8 hex chars>-<sanitized original name>`.
    fn scratch_name(original_name: &str) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", Utc::now().timestamp_millis(), &id[..8], sanitize_filename(original_name))
    }
}

/// A file written to scratch storage.
#[derive(Debug, Clone)]
pub struct ScratchFile {
    pub original_name: String,
    pub content_type: String,
    pub size: u64,
    pub path: PathBuf,
}

/// The scratch files owned by one request.
///
/// Files are removed by [`ScratchFiles::cleanup`], or synchronously on drop if the request ends
/// some other way (error return, client disconnect, panic). Removal is best-effort: failures are
/// logged and never surfaced.
#[derive(Debug)]
pub struct ScratchFiles {
    dir: ScratchDir,
    files: Vec<ScratchFile>,
}

impl ScratchFiles {
    /// Open a new scratch file for an upload. The file is owned by this set from the moment it
    /// is created, so a failed or abandoned write is still cleaned up.
    pub async fn create(&mut self, original_name: &str, content_type: &str) -> std::io::Result<ScratchWriter<'_>> {
        fs::create_dir_all(self.dir.path()).await?;

        let path = self.dir.path().join(ScratchDir::scratch_name(original_name));
        let file = fs::File::create_new(&path).await?;

        debug!(path = %path.display(), original_name, "Created scratch file");

        let index = self.files.len();
        self.files.push(ScratchFile {
            original_name: original_name.to_string(),
            content_type: content_type.to_string(),
            size: 0,
            path,
        });

        Ok(ScratchWriter {
            file,
            entry: &mut self.files[index],
        })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScratchFile> {
        self.files.iter()
    }

    /// Scratch paths in upload order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Remove every file in the set.
    pub async fn cleanup(mut self) {
        for file in std::mem::take(&mut self.files) {
            match fs::remove_file(&file.path).await {
                Ok(()) => debug!(path = %file.path.display(), "Removed scratch file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to remove scratch file"),
            }
        }
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for file in self.files.drain(..) {
            match std::fs::remove_file(&file.path) {
                Ok(()) => debug!(path = %file.path.display(), "Removed scratch file on drop"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to remove scratch file"),
            }
        }
    }
}

/// Streams one upload into its scratch file, tracking the byte count.
pub struct ScratchWriter<'a> {
    file: fs::File,
    entry: &'a mut ScratchFile,
}

impl ScratchWriter<'_> {
    pub async fn write_chunk(&mut self, chunk: &Bytes) -> std::io::Result<()> {
        self.file.write_all(chunk).await?;
        self.entry.size += chunk.len() as u64;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.entry.size
    }

    /// Flush the file to disk and return its metadata.
    pub async fn finish(mut self) -> std::io::Result<ScratchFile> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.entry.clone())
    }
}

const MAX_NAME_CHARS: usize = 128;
const MAX_EXTENSION_CHARS: usize = 16;

/// Reduce an uploaded file name to a safe single path component.
///
/// Keeps letters (any script), digits, `.`, `-` and `_`; everything else becomes `_`. Leading
/// dots are stripped so the result can never be `..` or a hidden file. Long names are cut to 128
/// characters, keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    // Browsers on Windows may send a full path
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        return "upload".to_string();
    }
    if cleaned.chars().count() <= MAX_NAME_CHARS {
        return cleaned.to_string();
    }

    // Shorten the stem so the extension the parser dispatches on survives
    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.chars().count() <= MAX_EXTENSION_CHARS => {
            let stem: String = stem.chars().take(MAX_NAME_CHARS - ext.chars().count() - 1).collect();
            format!("{stem}.{ext}")
        }
        _ => cleaned.chars().take(MAX_NAME_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(files: &mut ScratchFiles, name: &str, content: &'static [u8]) -> ScratchFile {
        let mut writer = files.create(name, "application/octet-stream").await.unwrap();
        writer.write_chunk(&Bytes::from_static(content)).await.unwrap();
        writer.finish().await.unwrap()
    }

    fn dir_entries(path: &Path) -> usize {
        std::fs::read_dir(path).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Счет 123.xlsx"), "Счет_123.xlsx");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\fleet\\invoice.xls"), "invoice.xls");
        assert_eq!(sanitize_filename(".hidden.xlsx"), "hidden.xlsx");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn test_sanitize_long_name_keeps_extension() {
        let long = format!("{}.xlsx", "Счет".repeat(40));
        let sanitized = sanitize_filename(&long);

        assert_eq!(sanitized.chars().count(), 128);
        assert!(sanitized.ends_with(".xlsx"));
        assert!(sanitized.starts_with("СчетСчет"));

        // Without a usable extension the name is simply cut
        let no_ext = "x".repeat(200);
        assert_eq!(sanitize_filename(&no_ext), "x".repeat(128));
        let exact = format!("{}.xls", "a".repeat(124));
        assert_eq!(sanitize_filename(&exact), exact);
    }

    #[test]
    fn test_scratch_name_keeps_original_name() {
        let name = ScratchDir::scratch_name("invoice.xlsx");
        let parts: Vec<&str> = name.splitn(3, '-').collect();

        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<i64>().is_ok());
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2], "invoice.xlsx");
    }

    #[tokio::test]
    async fn test_directory_created_lazily() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(root.path().join("nested").join("uploads"));
        assert!(!scratch.path().exists());

        let mut files = scratch.files();
        assert!(!scratch.path().exists());

        let file = write_file(&mut files, "a.xlsx", b"PK\x03\x04").await;
        assert!(scratch.path().is_dir());
        assert!(file.path.starts_with(scratch.path()));
        assert_eq!(file.size, 4);
        assert_eq!(std::fs::read(&file.path).unwrap(), b"PK\x03\x04");
    }

    #[tokio::test]
    async fn test_same_name_does_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(root.path());
        let mut files = scratch.files();

        let first = write_file(&mut files, "invoice.xlsx", b"one").await;
        let second = write_file(&mut files, "invoice.xlsx", b"two").await;

        assert_ne!(first.path, second.path);
        assert_eq!(files.paths(), vec![first.path, second.path]);
    }

    #[tokio::test]
    async fn test_cleanup_removes_files() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(root.path());
        let mut files = scratch.files();

        write_file(&mut files, "a.xlsx", b"a").await;
        write_file(&mut files, "b.xlsx", b"b").await;
        assert_eq!(dir_entries(root.path()), 2);

        files.cleanup().await;
        assert_eq!(dir_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_files() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(root.path());

        {
            let mut files = scratch.files();
            write_file(&mut files, "a.xlsx", b"a").await;
            // Abandoned mid-write: still owned by the set
            let mut writer = files.create("b.xlsx", "application/octet-stream").await.unwrap();
            writer.write_chunk(&Bytes::from_static(b"partial")).await.unwrap();
            assert_eq!(writer.size(), 7);
        }

        assert_eq!(dir_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(root.path());
        let mut files = scratch.files();

        let file = write_file(&mut files, "a.xlsx", b"a").await;
        std::fs::remove_file(&file.path).unwrap();

        // Must not panic or error
        files.cleanup().await;
    }

    #[tokio::test]
    async fn test_independent_sets_clean_independently() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(root.path());

        let mut first = scratch.files();
        let mut second = scratch.files();
        write_file(&mut first, "a.xlsx", b"a").await;
        let kept = write_file(&mut second, "a.xlsx", b"b").await;

        first.cleanup().await;

        assert_eq!(dir_entries(root.path()), 1);
        assert!(kept.path.exists());
        drop(second);
        assert_eq!(dir_entries(root.path()), 0);
    }
}
