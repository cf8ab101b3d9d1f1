//! Staging uploads on disk for the lifetime of a batch.
//!
//! Every upload is written to a uniquely-named file, so concurrent batches
//! sharing a staging root never collide. [`StagedBatch`] owns those files and
//! guarantees they are deleted however the batch ends.

use std::{fs, io, sync::Arc};

use uuid::Uuid;

use crate::prelude::*;

use super::{BatchError, UploadedItem};

/// Longest file extension we'll carry over from an untrusted upload name.
const MAX_EXTENSION_LEN: usize = 16;

/// An uploaded file, as received from a client.
#[derive(Clone, Debug)]
pub struct Upload {
    /// The client-supplied file name. Untrusted.
    pub original_name: String,
    /// The file contents.
    pub contents: Vec<u8>,
}

/// Somewhere we can put uploads while we process them.
pub trait Staging: Send + Sync + 'static {
    /// Store an upload, returning its new, unique path.
    fn stage(&self, upload: &Upload) -> Result<PathBuf>;

    /// Delete a staged file. Deleting a file that no longer exists is not an
    /// error.
    fn discard(&self, path: &Path) -> Result<()>;
}

/// Stages uploads as files in a single directory.
#[derive(Clone, Debug)]
pub struct DirStaging {
    root: PathBuf,
}

impl DirStaging {
    /// Stage files in `root`, which will be created if necessary.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Our staging directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DirStaging {
    /// Stage an upload, using `write` to create the staged file. If `write`
    /// fails, anything it left behind is removed.
    fn stage_with(
        &self,
        upload: &Upload,
        write: impl FnOnce(&Path) -> io::Result<()>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("failed to create staging directory {:?}", self.root.display())
        })?;
        let file_name = format!(
            "{}{}",
            Uuid::new_v4(),
            safe_extension(&upload.original_name)
        );
        let path = self.root.join(file_name);
        if let Err(err) = write(&path) {
            if let Err(remove_err) = remove_if_present(&path) {
                error!(
                    path = %path.display(),
                    "failed to remove partial staged file: {}",
                    remove_err
                );
            }
            return Err(err)
                .with_context(|| format!("failed to write staged file {:?}", path.display()));
        }
        debug!(path = %path.display(), name = %upload.original_name, "Staged upload");
        Ok(path)
    }
}

impl Staging for DirStaging {
    fn stage(&self, upload: &Upload) -> Result<PathBuf> {
        self.stage_with(upload, |path| fs::write(path, &upload.contents))
    }

    fn discard(&self, path: &Path) -> Result<()> {
        remove_if_present(path)
            .with_context(|| format!("failed to delete staged file {:?}", path.display()))
    }
}

/// Remove a file, if it exists.
fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Get the extension of an untrusted file name, including the leading `.`,
/// or an empty string if there isn't a usable one.
///
/// Only ASCII alphanumerics are allowed, so the result can never contain a path
/// separator.
fn safe_extension(original_name: &str) -> String {
    let file_name = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    match Path::new(file_name).extension().and_then(|ext| ext.to_str()) {
        Some(ext)
            if !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext)
        }
        _ => String::new(),
    }
}

/// The staged files for one batch.
///
/// Call [`StagedBatch::release`] to delete them and hear about any errors. If
/// that never happens, dropping the batch deletes them anyway.
pub struct StagedBatch {
    staging: Arc<dyn Staging>,
    items: Vec<UploadedItem>,
}

impl StagedBatch {
    /// Create an empty batch. Anything staged later through
    /// [`StagedBatch::stage`] is owned by this batch.
    pub fn new(staging: Arc<dyn Staging>) -> Self {
        Self {
            staging,
            items: vec![],
        }
    }

    /// Stage every upload. If any upload can't be staged, the uploads staged
    /// so far are deleted before we return.
    pub fn stage_all(
        staging: Arc<dyn Staging>,
        uploads: &[Upload],
    ) -> Result<Self, BatchError> {
        let mut batch = Self::new(staging);
        for upload in uploads {
            batch.stage(upload)?;
        }
        Ok(batch)
    }

    /// Stage a single upload and add it to this batch.
    pub fn stage(&mut self, upload: &Upload) -> Result<(), BatchError> {
        let storage_path =
            self.staging
                .stage(upload)
                .map_err(|source| BatchError::Staging {
                    name: upload.original_name.clone(),
                    source,
                })?;
        self.items.push(UploadedItem {
            storage_path,
            original_name: upload.original_name.clone(),
        });
        Ok(())
    }

    /// The staged items, in upload order.
    pub fn items(&self) -> &[UploadedItem] {
        &self.items
    }

    /// Delete every staged file. We try all of them even if some fail, and
    /// report the first failure.
    pub fn release(mut self) -> Result<(), BatchError> {
        self.discard_all().map_err(BatchError::Cleanup)
    }

    /// Discard all our items, emptying our item list.
    fn discard_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for item in self.items.drain(..) {
            if let Err(err) = self.staging.discard(&item.storage_path) {
                error!(path = %item.storage_path.display(), "{:#}", err);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for StagedBatch {
    fn drop(&mut self) {
        if !self.items.is_empty() {
            debug!(count = self.items.len(), "Discarding unreleased staged files");
            // Errors have already been logged.
            let _ = self.discard_all();
        }
    }
}
