//! On-disk crash dump layouts
//!
//! Two crash-writer layouts are recognized, decided once from the host
//! OS:
//!
//! - **Flat**: dumps are moved into a `completed/` subfolder of the
//!   crash directory (`reports/` on Windows) once fully written.
//! - **Sidecar**: dumps share the crash directory with `.txt` metadata
//!   files, and each dump file is a multipart body the actual minidump
//!   must be carved out of.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Magic bytes opening every minidump
pub const MINIDUMP_MAGIC: &[u8] = b"MDMP";

/// Dumps smaller than this cannot be real and are dropped as invalid
pub const MIN_DUMP_BYTES: usize = 10_000;

/// Crash-writer output layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpLayout {
    /// Completed dumps in a dedicated subfolder
    Flat,
    /// Dumps beside sidecar metadata files
    Sidecar,
}

impl DumpLayout {
    /// The layout used by the current host OS.
    pub fn for_host_os() -> Self {
        if cfg!(target_os = "linux") {
            DumpLayout::Sidecar
        } else {
            DumpLayout::Flat
        }
    }

    /// Subfolder completed dumps land in for the flat layout.
    fn flat_subdir() -> &'static str {
        if cfg!(windows) {
            "reports"
        } else {
            "completed"
        }
    }

    /// Returns the paths of all dump files currently on disk.
    ///
    /// For the sidecar layout this also deletes metadata `.txt` files
    /// (except `log.txt`) so the crash writer does not trip over them;
    /// they are never treated as dumps.
    pub async fn scan(&self, crashes_dir: &Path) -> Vec<PathBuf> {
        match self {
            DumpLayout::Flat => {
                let dump_dir = crashes_dir.join(Self::flat_subdir());
                list_with_extension(&dump_dir, "dmp").await
            }
            DumpLayout::Sidecar => {
                let entries = list_dir(crashes_dir).await;

                for path in &entries {
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                    let is_metadata = path.extension().is_some_and(|e| e == "txt")
                        && name.as_deref() != Some("log.txt");
                    if is_metadata {
                        debug!(path = %path.display(), "Removing crash writer metadata file");
                        if let Err(e) = tokio::fs::remove_file(path).await {
                            warn!(path = %path.display(), error = %e, "Could not delete metadata file");
                        }
                    }
                }

                entries
                    .into_iter()
                    .filter(|p| p.extension().is_some_and(|e| e == "dmp"))
                    .collect()
            }
        }
    }

    /// Prepares raw file bytes for upload.
    ///
    /// Sidecar-layout files are multipart bodies; the minidump is
    /// carved out between the last octet-stream header and the closing
    /// boundary. Files that do not look like multipart are returned
    /// unchanged.
    pub fn pre_process(&self, bytes: Vec<u8>) -> Vec<u8> {
        match self {
            DumpLayout::Flat => bytes,
            DumpLayout::Sidecar => extract_from_multipart(bytes),
        }
    }
}

/// Whether `bytes` plausibly holds a minidump.
pub fn looks_like_minidump(bytes: &[u8]) -> bool {
    bytes.len() >= MIN_DUMP_BYTES && bytes.starts_with(MINIDUMP_MAGIC)
}

/// Crudely parses the minidump out of a multipart crash report body.
fn extract_from_multipart(bytes: Vec<u8>) -> Vec<u8> {
    let Some(binary_start) = rfind(&bytes, b"Content-Type: application/octet-stream") else {
        return bytes;
    };

    let dump_start = find_from(&bytes, MINIDUMP_MAGIC, binary_start);
    let dump_end = rfind(&bytes, b"----------------------------");

    match (dump_start, dump_end) {
        (Some(start), Some(end)) if end > start => bytes[start..end].to_vec(),
        _ => bytes,
    }
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|w| w == needle)
}

async fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return found;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        found.push(entry.path());
    }
    found.sort();
    found
}

async fn list_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    list_dir(dir)
        .await
        .into_iter()
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flat_layout_scans_completed_subfolder() {
        let dir = tempfile::tempdir().unwrap();
        let completed = dir.path().join(DumpLayout::flat_subdir());
        std::fs::create_dir_all(&completed).unwrap();
        std::fs::write(completed.join("a.dmp"), b"x").unwrap();
        std::fs::write(completed.join("b.log"), b"x").unwrap();
        std::fs::write(dir.path().join("stray.dmp"), b"x").unwrap();

        let dumps = DumpLayout::Flat.scan(dir.path()).await;
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].ends_with("a.dmp"));
    }

    #[tokio::test]
    async fn flat_layout_missing_subfolder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DumpLayout::Flat.scan(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn sidecar_layout_deletes_metadata_but_keeps_log() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crash.dmp"), b"x").unwrap();
        std::fs::write(dir.path().join("crash.txt"), b"meta").unwrap();
        std::fs::write(dir.path().join("log.txt"), b"log").unwrap();

        let dumps = DumpLayout::Sidecar.scan(dir.path()).await;
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].ends_with("crash.dmp"));
        assert!(!dir.path().join("crash.txt").exists());
        assert!(dir.path().join("log.txt").exists());
    }

    #[test]
    fn multipart_extraction_carves_out_dump() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--boundary\r\n");
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(b"MDMP");
        body.extend_from_slice(&[0u8; 64]);
        body.extend_from_slice(b"----------------------------boundary--");

        let dump = DumpLayout::Sidecar.pre_process(body);
        assert!(dump.starts_with(MINIDUMP_MAGIC));
        assert_eq!(dump.len(), 4 + 64);
    }

    #[test]
    fn non_multipart_body_returned_unchanged() {
        let body = b"MDMP plain dump".to_vec();
        assert_eq!(DumpLayout::Sidecar.pre_process(body.clone()), body);
    }

    #[test]
    fn flat_pre_process_is_identity() {
        let body = b"MDMP raw".to_vec();
        assert_eq!(DumpLayout::Flat.pre_process(body.clone()), body);
    }

    #[test]
    fn minidump_validation() {
        let mut valid = MINIDUMP_MAGIC.to_vec();
        valid.resize(MIN_DUMP_BYTES, 0);
        assert!(looks_like_minidump(&valid));

        assert!(!looks_like_minidump(b"MDMP too small"));

        let mut wrong_magic = b"JUNK".to_vec();
        wrong_magic.resize(MIN_DUMP_BYTES, 0);
        assert!(!looks_like_minidump(&wrong_magic));
    }
}
