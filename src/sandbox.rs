//! Path sandbox: the only code allowed to turn an untrusted relative path into
//! something file operations may touch. A [`VerifiedPath`] is a proof that the
//! wrapped absolute path lies under the home directory it was resolved against.

use std::path::{Path, PathBuf};

use crate::digest::Digest;

#[derive(Debug)]
pub enum SandboxError {
    Escape,
    NotDir,
    NotFile,
    DirNotEmpty,
    AlreadyExists,
    Io(std::io::Error),
}

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        SandboxError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Opaque handle to a path known to lie under some home directory.
///
/// Constructors are private to this module; no other code may build one, so
/// every filesystem operation that accepts a `VerifiedPath` is guaranteed to
/// stay inside the sandbox.
#[derive(Debug, Clone)]
pub struct VerifiedPath(PathBuf);

impl VerifiedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// The home directory root, canonicalized once at startup.
#[derive(Debug, Clone)]
pub struct Home(PathBuf);

impl Home {
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let canon = tokio::fs::canonicalize(dir.as_ref()).await?;
        Ok(Home(canon))
    }

    pub fn root(&self) -> &Path {
        &self.0
    }

    pub fn root_verified(&self) -> VerifiedPath {
        VerifiedPath(self.0.clone())
    }

    fn contains(&self, candidate: &Path) -> bool {
        candidate.as_os_str().as_encoded_bytes()
            .starts_with(self.0.as_os_str().as_encoded_bytes())
    }

    /// Resolves `child` (relative, untrusted) to a path that must already exist.
    pub async fn resolve_existing(&self, child: &str) -> Result<VerifiedPath> {
        if child.is_empty() {
            return Err(SandboxError::Escape);
        }
        let joined = self.0.join(child.trim_start_matches('/'));
        let canon = tokio::fs::canonicalize(&joined)
            .await
            .map_err(|_| SandboxError::Escape)?;
        if !self.contains(&canon) {
            return Err(SandboxError::Escape);
        }
        Ok(VerifiedPath(canon))
    }

    /// Resolves `child` to a path whose parent must exist under the home root;
    /// the leaf itself may or may not exist yet.
    pub async fn resolve_potential(&self, child: &str) -> Result<VerifiedPath> {
        if child.is_empty() {
            return Err(SandboxError::Escape);
        }
        let trimmed = child.trim_start_matches('/');
        let rel = Path::new(trimmed);
        let leaf = rel.file_name().ok_or(SandboxError::Escape)?;
        if leaf == "." || leaf == ".." {
            return Err(SandboxError::Escape);
        }
        let parent_rel = rel.parent().filter(|p| !p.as_os_str().is_empty());
        let parent_verified = match parent_rel {
            Some(p) => self.resolve_existing(&p.to_string_lossy()).await?,
            None => self.root_verified(),
        };
        let full = parent_verified.0.join(leaf);
        // full's parent is already verified; re-derive its normalized form by
        // joining onto the verified parent rather than re-canonicalizing (the
        // leaf may not exist, so canonicalize would fail).
        if !self.contains(&full) {
            return Err(SandboxError::Escape);
        }
        Ok(VerifiedPath(full))
    }
}

pub struct FileContent {
    pub bytes: Vec<u8>,
    pub digest: Digest,
}

impl FileContent {
    fn new(bytes: Vec<u8>) -> Self {
        let digest = Digest::sha256(&bytes);
        FileContent { bytes, digest }
    }
}

/// Opens `vp` for reading, failing with `NotFile` unless it names a regular
/// file. Callers that need the raw handle (rather than the whole-file
/// contents `read_all` returns) use this directly.
pub async fn open_read(vp: &VerifiedPath) -> Result<tokio::fs::File> {
    let meta = tokio::fs::metadata(vp.as_path()).await?;
    if !meta.is_file() {
        return Err(SandboxError::NotFile);
    }
    Ok(tokio::fs::File::open(vp.as_path()).await?)
}

pub async fn read_all(vp: &VerifiedPath) -> Result<FileContent> {
    use tokio::io::AsyncReadExt;

    let mut file = open_read(vp).await?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    Ok(FileContent::new(bytes))
}

pub async fn write_all(vp: &VerifiedPath, bytes: &[u8], exclusive: bool) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    if exclusive && tokio::fs::metadata(vp.as_path()).await.is_ok() {
        return Err(SandboxError::AlreadyExists);
    }
    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true);
    if exclusive {
        opts.create_new(true);
    } else {
        opts.truncate(true);
    }
    let mut file = opts
        .open(vp.as_path())
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => SandboxError::AlreadyExists,
            _ => SandboxError::Io(e),
        })?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

pub async fn mkdir(vp: &VerifiedPath) -> Result<()> {
    if tokio::fs::metadata(vp.as_path()).await.is_ok() {
        return Err(SandboxError::AlreadyExists);
    }
    tokio::fs::create_dir(vp.as_path()).await?;
    Ok(())
}

pub async fn delete(vp: &VerifiedPath) -> Result<()> {
    let meta = tokio::fs::metadata(vp.as_path()).await?;
    if meta.is_dir() {
        let mut entries = tokio::fs::read_dir(vp.as_path()).await?;
        if entries.next_entry().await?.is_some() {
            return Err(SandboxError::DirNotEmpty);
        }
        tokio::fs::remove_dir(vp.as_path()).await?;
    } else if meta.is_file() {
        tokio::fs::remove_file(vp.as_path()).await?;
    } else {
        return Err(SandboxError::NotFile);
    }
    Ok(())
}

/// Reserved names under the home directory that `list_dir` never surfaces.
const RESERVED_NAMES: &[&str] = &[".cape"];

pub async fn list_dir(vp: &VerifiedPath) -> Result<FileContent> {
    let meta = tokio::fs::metadata(vp.as_path()).await?;
    if !meta.is_dir() {
        return Err(SandboxError::NotDir);
    }
    let mut entries = tokio::fs::read_dir(vp.as_path()).await?;
    let mut out = String::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if RESERVED_NAMES.contains(&name.as_ref()) {
            continue;
        }
        let entry_meta = entry.metadata().await?;
        let kind = if entry_meta.is_dir() { "D" } else { "F" };
        out.push_str(&format!("[{}]:{}:{}\n", kind, entry_meta.len(), name));
    }
    Ok(FileContent::new(out.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn home() -> (TempDir, Home) {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path()).await.unwrap();
        (dir, home)
    }

    #[tokio::test]
    async fn resolve_existing_rejects_escape() {
        let (_dir, home) = home().await;
        let err = home.resolve_existing("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, SandboxError::Escape));
    }

    #[tokio::test]
    async fn resolve_potential_rejects_dot_leaf() {
        let (_dir, home) = home().await;
        let err = home.resolve_potential(".").await.unwrap_err();
        assert!(matches!(err, SandboxError::Escape));
    }

    #[tokio::test]
    async fn resolve_potential_allows_new_leaf_in_existing_parent() {
        let (_dir, home) = home().await;
        let vp = home.resolve_potential("new_file.txt").await.unwrap();
        assert!(vp.as_path().starts_with(home.root()));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_dir, home) = home().await;
        let vp = home.resolve_potential("a.txt").await.unwrap();
        write_all(&vp, b"hello", false).await.unwrap();
        let vp2 = home.resolve_existing("a.txt").await.unwrap();
        let content = read_all(&vp2).await.unwrap();
        assert_eq!(content.bytes, b"hello");
    }

    #[tokio::test]
    async fn open_read_rejects_directory() {
        let (_dir, home) = home().await;
        let dir_vp = home.resolve_potential("sub").await.unwrap();
        mkdir(&dir_vp).await.unwrap();
        let dir_vp2 = home.resolve_existing("sub").await.unwrap();
        let err = open_read(&dir_vp2).await.unwrap_err();
        assert!(matches!(err, SandboxError::NotFile));
    }

    #[tokio::test]
    async fn open_read_yields_a_readable_file_handle() {
        use tokio::io::AsyncReadExt;

        let (_dir, home) = home().await;
        let vp = home.resolve_potential("a.txt").await.unwrap();
        write_all(&vp, b"hello", false).await.unwrap();
        let vp2 = home.resolve_existing("a.txt").await.unwrap();
        let mut file = open_read(&vp2).await.unwrap();
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn exclusive_write_fails_if_exists() {
        let (_dir, home) = home().await;
        let vp = home.resolve_potential("a.txt").await.unwrap();
        write_all(&vp, b"hello", false).await.unwrap();
        let vp2 = home.resolve_potential("a.txt").await.unwrap();
        let err = write_all(&vp2, b"again", true).await.unwrap_err();
        assert!(matches!(err, SandboxError::AlreadyExists));
    }

    #[tokio::test]
    async fn delete_non_empty_dir_fails() {
        let (_dir, home) = home().await;
        let dir_vp = home.resolve_potential("sub").await.unwrap();
        mkdir(&dir_vp).await.unwrap();
        let file_vp = home.resolve_potential("sub/x.txt").await.unwrap();
        write_all(&file_vp, b"x", false).await.unwrap();
        let dir_vp2 = home.resolve_existing("sub").await.unwrap();
        let err = delete(&dir_vp2).await.unwrap_err();
        assert!(matches!(err, SandboxError::DirNotEmpty));
    }

    #[tokio::test]
    async fn list_dir_skips_reserved_store_dir() {
        let (_dir, home) = home().await;
        let store = home.resolve_potential(".cape").await.unwrap();
        mkdir(&store).await.unwrap();
        let visible = home.resolve_potential("readme.txt").await.unwrap();
        write_all(&visible, b"hi", false).await.unwrap();
        let root = home.root_verified();
        let listing = list_dir(&root).await.unwrap();
        let text = String::from_utf8(listing.bytes).unwrap();
        assert!(text.contains("readme.txt"));
        assert!(!text.contains(".cape"));
    }
}
