//! Local filesystem blob driver.
//!
//! Key `a/b/c` is stored at `<root>/a/b/c`, with its attributes in a JSON
//! sidecar `<root>/a/b/c.attrs`. No key component may end in `.attrs` or
//! `.tmp`, so keys never land on driver-owned files.
//!
//! Uploads go to a uniquely named temporary file next to the target. Close
//! writes the sidecar to a second temporary file, renames the data into
//! place, then renames the sidecar. An aborted, dropped, cancelled or failed
//! upload removes both temporary files and leaves the previous object as it
//! was.
//!
//! fileblob exposes no provider-native types: every escape-hatch probe
//! misses and `before_write` hooks see an empty probe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take};
use tracing::{debug, warn};
use uuid::Uuid;

use cloudblob_common::{BlobKey, Error, Result};

use crate::bucket::{Bucket, DEFAULT_CONTENT_TYPE};
use crate::driver::{
    Driver, DriverAttributes, DriverReader, DriverWriter, ListObject, ListOptions, ListPage,
    ReaderAttributes,
};
use crate::probe::ProbeMut;
use crate::writer::WriterOptions;

const ATTRS_SUFFIX: &str = ".attrs";
const TMP_SUFFIX: &str = ".tmp";

/// fileblob configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileblobConfig {
    /// Directory holding the blobs.
    pub root: PathBuf,
    /// Create `root` if it does not exist.
    #[serde(default)]
    pub create_dir: bool,
}

/// Contents of a `.attrs` sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    #[serde(default)]
    content_language: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    etag: String,
}

/// Blob driver over a local directory.
pub struct FileBucket {
    root: PathBuf,
}

impl FileBucket {
    /// Create a driver rooted at an existing directory.
    ///
    /// # Preconditions
    /// - `root` must already exist; use [`FileBucket::from_config`] to create it
    ///
    /// # Postconditions
    /// - Every key resolves to a path under `root`
    ///
    /// # Errors
    /// - `NotFound` if `root` does not exist
    /// - `InvalidInput` if `root` is not a directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let meta = std::fs::metadata(&root).map_err(|e| Error::from_io(e, root.display()))?;
        if !meta.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Open the configured root, creating it first when `create_dir` is set.
    ///
    /// # Errors
    /// - Same as [`FileBucket::new`], plus I/O errors from creating the root
    pub fn from_config(config: &FileblobConfig) -> Result<Self> {
        if config.create_dir && !config.root.exists() {
            std::fs::create_dir_all(&config.root)
                .map_err(|e| Error::from_io(e, config.root.display()))?;
        }
        Self::new(&config.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto the filesystem, rejecting keys that would escape the
    /// root or collide with driver-owned files.
    fn to_fs_path(&self, key: &BlobKey) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for component in key.components() {
            if is_reserved(component) {
                return Err(Error::InvalidInput(format!(
                    "Key uses a reserved suffix ({} or {}): {}",
                    ATTRS_SUFFIX, TMP_SUFFIX, key
                )));
            }
            if component.is_empty()
                || component == "."
                || component == ".."
                || component.contains('\\')
            {
                return Err(Error::InvalidInput(format!(
                    "Key is not representable as a file path: {}",
                    key
                )));
            }
            path.push(component);
        }
        Ok(path)
    }

    /// Resolve a key to an existing regular file.
    async fn stat(&self, key: &BlobKey) -> Result<(PathBuf, std::fs::Metadata)> {
        let path = self.to_fs_path(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Error::from_io(e, key))?;
        if !meta.is_file() {
            return Err(Error::NotFound(key.to_string()));
        }
        Ok((path, meta))
    }
}

fn is_reserved(name: &str) -> bool {
    name.ends_with(ATTRS_SUFFIX) || name.ends_with(TMP_SUFFIX)
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(ATTRS_SUFFIX);
    PathBuf::from(s)
}

fn modified_time(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(|t| t.into())
        .unwrap_or_else(|_| Utc::now())
}

/// Read the sidecar for `path`, synthesizing one for files written by hand.
async fn read_sidecar(path: &Path, meta: &std::fs::Metadata) -> Result<Sidecar> {
    let attrs_path = sidecar_path(path);
    match fs::read(&attrs_path).await {
        Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
            Error::unknown(format!("corrupt attributes in {}", attrs_path.display()), e)
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Sidecar {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            content_language: None,
            metadata: HashMap::new(),
            etag: format!("{}-{}", modified_time(meta).timestamp(), meta.len()),
        }),
        Err(e) => Err(Error::from_io(e, attrs_path.display())),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::from_io(e, path.display())),
    }
}

/// Open a portable bucket over a local directory.
pub fn open_bucket(root: impl AsRef<Path>) -> Result<Bucket> {
    Ok(Bucket::new(FileBucket::new(root)?))
}

/// Create a fileblob driver from configuration.
pub fn create_fileblob_driver(config: serde_json::Value) -> Result<Arc<dyn Driver>> {
    let config: FileblobConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid fileblob config: {}", e)))?;
    Ok(Arc::new(FileBucket::from_config(&config)?))
}

#[async_trait]
impl Driver for FileBucket {
    fn name(&self) -> &str {
        "fileblob"
    }

    async fn new_range_reader(
        &self,
        key: &BlobKey,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Box<dyn DriverReader>> {
        let (path, meta) = self.stat(key).await?;
        let size = meta.len();
        if offset > size {
            return Err(Error::InvalidRange(format!(
                "offset {} beyond size {} of {}",
                offset, size, key
            )));
        }
        let sidecar = read_sidecar(&path, &meta).await?;

        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Error::from_io(e, key))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| Error::from_io(e, key))?;
        }
        let remaining = size - offset;
        let limit = length.map_or(remaining, |len| len.min(remaining));
        debug!(key = %key, offset, limit, "fileblob open");

        Ok(Box::new(FileReader {
            key: key.to_string(),
            file: file.take(limit),
            attrs: ReaderAttributes {
                content_type: sidecar.content_type,
                size,
                modified: modified_time(&meta),
            },
        }))
    }

    async fn new_typed_writer(
        &self,
        key: &BlobKey,
        content_type: &str,
        mut opts: WriterOptions,
    ) -> Result<Box<dyn DriverWriter>> {
        let path = self.to_fs_path(key)?;
        opts.run_before_write(ProbeMut::empty())?;

        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("Key has no parent: {}", key)))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::from_io(e, parent.display()))?;

        let upload_id = Uuid::new_v4().simple();
        let tmp = path.with_file_name(format!("{}.{}{}", key.name(), upload_id, TMP_SUFFIX));
        let attrs_tmp = path.with_file_name(format!(
            "{}.{}{}{}",
            key.name(),
            upload_id,
            ATTRS_SUFFIX,
            TMP_SUFFIX
        ));
        let file = fs::File::create(&tmp)
            .await
            .map_err(|e| Error::from_io(e, tmp.display()))?;

        Ok(Box::new(FileWriter {
            key: key.to_string(),
            file: Some(file),
            tmp,
            attrs_tmp,
            path,
            sidecar: Sidecar {
                content_type: content_type.to_string(),
                content_language: opts.content_language.take(),
                metadata: std::mem::take(&mut opts.metadata),
                etag: Uuid::new_v4().simple().to_string(),
            },
            if_match: opts.if_match.take(),
            finished: false,
        }))
    }

    async fn attributes(&self, key: &BlobKey) -> Result<DriverAttributes> {
        let (path, meta) = self.stat(key).await?;
        let sidecar = read_sidecar(&path, &meta).await?;
        Ok(DriverAttributes {
            content_type: sidecar.content_type,
            content_language: sidecar.content_language,
            metadata: sidecar.metadata,
            modified: modified_time(&meta),
            size: meta.len(),
            etag: Some(sidecar.etag),
            native: None,
        })
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        let (path, _) = self.stat(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Error::from_io(e, key))?;
        remove_if_exists(&sidecar_path(&path)).await
    }

    async fn list_paged(&self, opts: &ListOptions) -> Result<ListPage> {
        let prefix = opts.prefix.as_str();
        let after = opts.page_token.as_deref();
        let mut objects = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::from_io(e, dir.display())),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::from_io(e, dir.display()))?
            {
                // Names that are not UTF-8 cannot be keys.
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                let key = format!("{}{}", rel, name);
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| Error::from_io(e, &key))?;

                if meta.is_dir() {
                    let sub = format!("{}/", key);
                    if sub.starts_with(prefix) || prefix.starts_with(&sub) {
                        pending.push((entry.path(), sub));
                    }
                } else if meta.is_file()
                    && !is_reserved(&name)
                    && key.starts_with(prefix)
                    && after.map_or(true, |token| key.as_str() > token)
                {
                    objects.push(ListObject {
                        key: BlobKey::parse(key)?,
                        size: meta.len(),
                        modified: modified_time(&meta),
                    });
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        let page_size = opts.effective_page_size();
        let next_page_token = if objects.len() > page_size {
            objects.truncate(page_size);
            objects.last().map(|o| o.key.to_string())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_page_token,
        })
    }
}

struct FileReader {
    key: String,
    file: Take<fs::File>,
    attrs: ReaderAttributes,
}

#[async_trait]
impl DriverReader for FileReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file
            .read(buf)
            .await
            .map_err(|e| Error::from_io(e, &self.key))
    }

    fn attributes(&self) -> &ReaderAttributes {
        &self.attrs
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct FileWriter {
    key: String,
    file: Option<fs::File>,
    tmp: PathBuf,
    attrs_tmp: PathBuf,
    path: PathBuf,
    sidecar: Sidecar,
    if_match: Option<String>,
    finished: bool,
}

impl FileWriter {
    async fn check_precondition(&self) -> Result<()> {
        let Some(expected) = self.if_match.as_deref() else {
            return Ok(());
        };
        let current = match fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Some(read_sidecar(&self.path, &meta).await?.etag),
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::from_io(e, &self.key)),
        };
        if current.as_deref() != Some(expected) {
            return Err(Error::PreconditionFailed(format!(
                "ETag mismatch for {}: expected {}",
                self.key, expected
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DriverWriter for FileWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::InvalidInput(format!("Upload of {} is finished", self.key)))?;
        file.write_all(buf)
            .await
            .map_err(|e| Error::from_io(e, self.tmp.display()))?;
        Ok(buf.len())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let mut file = this
            .file
            .take()
            .ok_or_else(|| Error::InvalidInput(format!("Upload of {} is finished", this.key)))?;
        file.flush()
            .await
            .map_err(|e| Error::from_io(e, this.tmp.display()))?;
        file.sync_all()
            .await
            .map_err(|e| Error::from_io(e, this.tmp.display()))?;
        drop(file);

        this.check_precondition().await?;

        // Both files are staged before anything visible changes. On error
        // `Drop` removes whatever temporary file is left.
        let encoded = serde_json::to_vec(&this.sidecar)
            .map_err(|e| Error::unknown(format!("encode attributes of {}", this.key), e))?;
        fs::write(&this.attrs_tmp, encoded)
            .await
            .map_err(|e| Error::from_io(e, this.attrs_tmp.display()))?;
        fs::rename(&this.tmp, &this.path)
            .await
            .map_err(|e| Error::from_io(e, &this.key))?;
        fs::rename(&this.attrs_tmp, sidecar_path(&this.path))
            .await
            .map_err(|e| Error::from_io(e, &this.key))?;
        this.finished = true;
        debug!(key = %this.key, "fileblob commit");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let mut this = self;
        drop(this.file.take());
        this.finished = true;
        remove_if_exists(&this.tmp).await?;
        remove_if_exists(&this.attrs_tmp).await
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        drop(self.file.take());
        for tmp in [&self.tmp, &self.attrs_tmp] {
            if let Err(e) = std::fs::remove_file(tmp) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %e, "failed to remove temporary upload");
                }
            }
        }
    }
}
