// Batch create/apply/rename over whole directories.
//
// Each directory entry is an independent job; jobs share nothing and run on
// the rayon pool when the `parallel` feature is enabled. A failing job never
// stops its siblings: every failure is collected into the BatchReport and
// returned after all items were attempted.
//
// Matching a file in one directory to its partner in another is done by a
// caller-supplied pairing function, so the codec itself never looks at names.

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::aps::decoder::ApplyOptions;
use crate::aps::identify::PATCH_EXTENSION;
use crate::io::{self, PatchError};

/// File extension used for cartridge images.
pub const IMAGE_EXTENSION: &str = "z64";

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One item that failed.
#[derive(Debug)]
pub struct BatchFailure {
    /// The directory entry being processed.
    pub item: PathBuf,
    pub error: PatchError,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Output paths written by successful items.
    pub succeeded: Vec<PathBuf>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }
}

// ---------------------------------------------------------------------------
// Pairing helpers
// ---------------------------------------------------------------------------

/// Replace the extension of a file name.
pub fn swap_extension(name: &Path, ext: &str) -> PathBuf {
    name.with_extension(ext)
}

/// Default pairing for apply: `game.aps` -> `game.z64`.
pub fn image_for_patch(patch_name: &Path) -> PathBuf {
    swap_extension(patch_name, IMAGE_EXTENSION)
}

/// Default pairing for create: the original carries the modified image's name.
pub fn same_name(name: &Path) -> PathBuf {
    name.to_path_buf()
}

/// Regular files in `dir`, sorted by path.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, PatchError> {
    let to_err = |source| PatchError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(to_err)? {
        let entry = entry.map_err(to_err)?;
        if entry.file_type().map_err(to_err)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> &Path {
    path.file_name().map_or(path, Path::new)
}

fn require_file(path: PathBuf) -> Result<PathBuf, PatchError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(PatchError::MissingPair { path })
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

fn run_batch<J>(items: Vec<PathBuf>, job: J) -> BatchReport
where
    J: Fn(&Path) -> Result<PathBuf, PatchError> + Sync + Send,
{
    let run = |item: PathBuf| {
        let result = job(&item);
        (item, result)
    };

    #[cfg(feature = "parallel")]
    let results: Vec<_> = items.into_par_iter().map(run).collect();
    #[cfg(not(feature = "parallel"))]
    let results: Vec<_> = items.into_iter().map(run).collect();

    let mut report = BatchReport::default();
    for (item, result) in results {
        match result {
            Ok(out) => report.succeeded.push(out),
            Err(error) => {
                log::warn!("{}: {error}", item.display());
                report.failures.push(BatchFailure { item, error });
            }
        }
    }
    log::debug!(
        "batch finished: {} ok, {} failed",
        report.succeeded.len(),
        report.failures.len()
    );
    report
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Create one patch per file in `modified_dir`.
///
/// `pair` maps a modified image's file name to its original's file name in
/// `original_dir`. Patches are written to `out_dir` under the original's name
/// with the `.aps` extension. `on_done` runs after every item, failed or not.
pub fn create_batch<P, F>(
    original_dir: &Path,
    modified_dir: &Path,
    out_dir: &Path,
    pair: P,
    overwrite: bool,
    on_done: F,
) -> Result<BatchReport, PatchError>
where
    P: Fn(&Path) -> PathBuf + Sync + Send,
    F: Fn(&Path) + Sync + Send,
{
    let items = list_files(modified_dir)?;
    Ok(run_batch(items, |modified| {
        let result = (|| -> Result<PathBuf, PatchError> {
            let original = require_file(original_dir.join(pair(file_name(modified))))?;
            let patch = out_dir.join(swap_extension(file_name(&original), PATCH_EXTENSION));
            io::create_file(&original, modified, &patch, overwrite)?;
            Ok(patch)
        })();
        on_done(modified);
        result
    }))
}

/// Apply every patch in `patch_dir` to its image in `image_dir`.
///
/// `pair` maps a patch file name to an image file name (see
/// [`image_for_patch`]). Outputs keep the image's name inside `out_dir`.
pub fn apply_batch<P, F>(
    image_dir: &Path,
    patch_dir: &Path,
    out_dir: &Path,
    pair: P,
    opts: &ApplyOptions,
    on_done: F,
) -> Result<BatchReport, PatchError>
where
    P: Fn(&Path) -> PathBuf + Sync + Send,
    F: Fn(&Path) + Sync + Send,
{
    let items = list_files(patch_dir)?;
    Ok(run_batch(items, |patch| {
        let result = (|| -> Result<PathBuf, PatchError> {
            let image = require_file(image_dir.join(pair(file_name(patch))))?;
            let output = out_dir.join(file_name(&image));
            io::apply_file(&image, patch, &output, opts)?;
            Ok(output)
        })();
        on_done(patch);
        result
    }))
}

/// Copy every patch in `patch_dir` into `out_dir` under its CRC-derived name.
pub fn rename_batch<F>(
    patch_dir: &Path,
    out_dir: &Path,
    overwrite: bool,
    on_done: F,
) -> Result<BatchReport, PatchError>
where
    F: Fn(&Path) + Sync + Send,
{
    let items = list_files(patch_dir)?;
    Ok(run_batch(items, |patch| {
        let result = io::rename_file(patch, out_dir, overwrite);
        on_done(patch);
        result
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_swaps() {
        assert_eq!(
            image_for_patch(Path::new("Game (U).aps")),
            PathBuf::from("Game (U).z64")
        );
        assert_eq!(
            swap_extension(Path::new("game.z64"), PATCH_EXTENSION),
            PathBuf::from("game.aps")
        );
        assert_eq!(
            swap_extension(Path::new("noext"), "aps"),
            PathBuf::from("noext.aps")
        );
    }

    #[test]
    fn listing_skips_directories_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.aps"), b"").unwrap();
        fs::write(dir.path().join("a.aps"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let files = list_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.aps"), dir.path().join("b.aps")]
        );
    }

    #[test]
    fn listing_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            list_files(&missing),
            Err(PatchError::Io { .. })
        ));
    }

    #[test]
    fn report_counts() {
        let mut report = BatchReport::default();
        assert!(report.is_success());
        report.succeeded.push(PathBuf::from("x"));
        report.failures.push(BatchFailure {
            item: PathBuf::from("y"),
            error: PatchError::MissingPair {
                path: PathBuf::from("y.z64"),
            },
        });
        assert!(!report.is_success());
        assert_eq!(report.total(), 2);
    }
}
