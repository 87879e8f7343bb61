// File-level helpers for creating, applying and renaming APS patches.
//
// Provides `create_file()`, `apply_file()`, `rename_file()` and
// `inspect_file()`, which wrap the streaming codec with buffered file I/O and
// attach the offending path to every error. Optionally computes streaming
// SHA-256 checksums (feature-gated behind `file-io`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(feature = "file-io")]
use sha2::Digest;
use thiserror::Error;

use crate::aps::decoder::{self, ApplyOptions, DecodeError, PatchDecoder};
use crate::aps::encoder::{EncodeError, PatchEncoder};
use crate::aps::header::{Crc, PatchHeader};
use crate::aps::identify;
use crate::aps::record::{Record, RecordStats};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `create_file()`.
#[derive(Debug, Clone)]
pub struct CreateStats {
    /// Original image size in bytes.
    pub original_size: u64,
    /// Modified image size in bytes.
    pub modified_size: u64,
    /// Patch size in bytes, header included.
    pub patch_size: u64,
    pub records: RecordStats,
    /// SHA-256 of the modified image (if `file-io` feature is enabled).
    pub modified_sha256: Option<[u8; 32]>,
}

/// Statistics returned by `apply_file()`.
#[derive(Debug, Clone)]
pub struct ApplyStats {
    /// Original image size in bytes.
    pub image_size: u64,
    /// Patch size in bytes.
    pub patch_size: u64,
    /// Reconstructed output size in bytes.
    pub output_size: u64,
    pub records: RecordStats,
    /// SHA-256 of the reconstructed output (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file-level operations. Every variant names the file it
/// concerns.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: EncodeError,
    },

    #[error("{}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("could not find file: {}", path.display())]
    MissingPair { path: PathBuf },

    #[error("output file exists, use --force to overwrite: {}", path.display())]
    OutputExists { path: PathBuf },
}

impl PatchError {
    /// True for a CRC mismatch between patch and image.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Decode {
                source: DecodeError::CrcMismatch { .. },
                ..
            }
        )
    }

    /// The file this error concerns.
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. }
            | Self::Encode { path, .. }
            | Self::Decode { path, .. }
            | Self::MissingPair { path }
            | Self::OutputExists { path } => path,
        }
    }
}

/// Attach a path to a lower-level error.
trait WithPath<T> {
    fn at(self, path: &Path) -> Result<T, PatchError>;
}

impl<T> WithPath<T> for Result<T, io::Error> {
    fn at(self, path: &Path) -> Result<T, PatchError> {
        self.map_err(|source| PatchError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl<T> WithPath<T> for Result<T, EncodeError> {
    fn at(self, path: &Path) -> Result<T, PatchError> {
        self.map_err(|source| PatchError::Encode {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl<T> WithPath<T> for Result<T, DecodeError> {
    fn at(self, path: &Path) -> Result<T, PatchError> {
        self.map_err(|source| PatchError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Default buffer size
// ---------------------------------------------------------------------------

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// Open an output file for writing. Without `overwrite` an existing file is
/// an error and is left untouched.
fn open_output(path: &Path, overwrite: bool) -> Result<File, PatchError> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true);
    if overwrite {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    opts.open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            PatchError::OutputExists {
                path: path.to_path_buf(),
            }
        } else {
            PatchError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

/// Both paths resolve to the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// create_file
// ---------------------------------------------------------------------------

/// Create a patch turning `original_path` into `modified_path`, writing it
/// to `patch_path`.
///
/// The original is read fully into memory. The modified image is streamed
/// through a `BufReader`; the patch output uses `BufWriter`.
pub fn create_file(
    original_path: &Path,
    modified_path: &Path,
    patch_path: &Path,
    overwrite: bool,
) -> Result<CreateStats, PatchError> {
    let original = fs::read(original_path).at(original_path)?;
    let original_size = original.len() as u64;

    let modified_file = File::open(modified_path).at(modified_path)?;
    let modified_size = modified_file.metadata().at(modified_path)?.len();
    let mut modified_reader = BufReader::with_capacity(BUF_SIZE, modified_file);

    if same_file(original_path, patch_path) || same_file(modified_path, patch_path) {
        return Err(PatchError::Io {
            path: patch_path.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "patch would overwrite an input image",
            ),
        });
    }

    let patch_file = open_output(patch_path, overwrite)?;
    let patch_writer = BufWriter::with_capacity(BUF_SIZE, patch_file);

    let mut encoder = PatchEncoder::new(patch_writer, &original, modified_size).at(patch_path)?;

    #[cfg(feature = "file-io")]
    let mut modified_hasher = sha2::Sha256::new();

    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match modified_reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).at(modified_path),
        };
        #[cfg(feature = "file-io")]
        {
            modified_hasher.update(&buf[..n]);
        }
        encoder.write_modified(&buf[..n]).at(patch_path)?;
    }

    let (writer, stats) = encoder.finish().at(patch_path)?;
    writer.into_inner().map_err(|e| e.into_error()).at(patch_path)?;

    #[cfg(feature = "file-io")]
    let modified_sha256 = Some(modified_hasher.finalize().into());
    #[cfg(not(feature = "file-io"))]
    let modified_sha256: Option<[u8; 32]> = None;

    log::info!(
        "created {} ({} records, {} bytes)",
        patch_path.display(),
        stats.records.records(),
        stats.patch_len
    );

    Ok(CreateStats {
        original_size,
        modified_size,
        patch_size: stats.patch_len,
        records: stats.records,
        modified_sha256,
    })
}

// ---------------------------------------------------------------------------
// apply_file
// ---------------------------------------------------------------------------

/// Apply the patch at `patch_path` to `image_path`, writing the patched image
/// to `output_path`.
///
/// The CRC check runs before `output_path` is created. If a later step fails
/// the partially patched output is left on disk.
pub fn apply_file(
    image_path: &Path,
    patch_path: &Path,
    output_path: &Path,
    opts: &ApplyOptions,
) -> Result<ApplyStats, PatchError> {
    let patch_file = File::open(patch_path).at(patch_path)?;
    let patch_size = patch_file.metadata().at(patch_path)?.len();
    let mut decoder =
        PatchDecoder::new(BufReader::with_capacity(BUF_SIZE, patch_file)).at(patch_path)?;

    let mut image = File::open(image_path).at(image_path)?;
    let image_crc = Crc::read_from_image(&mut image).at(image_path)?;
    decoder.validate_image(&image_crc).at(image_path)?;

    if same_file(image_path, output_path) {
        return Err(PatchError::Io {
            path: output_path.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "output would overwrite the original image",
            ),
        });
    }

    let mut output = open_output(output_path, opts.overwrite)?;
    image.seek(SeekFrom::Start(0)).at(image_path)?;
    let image_size = io::copy(&mut image, &mut output).at(output_path)?;
    drop(image);

    let mut writer = BufWriter::with_capacity(BUF_SIZE, output);
    let records = decoder.apply_to(&mut writer).at(patch_path)?;
    let mut output = writer.into_inner().map_err(|e| e.into_error()).at(output_path)?;

    if opts.resize {
        let len = decoder.header().modified_len as u64;
        output.set_len(len).at(output_path)?;
    }
    let output_size = output.metadata().at(output_path)?.len();

    #[cfg(feature = "file-io")]
    let output_sha256 = {
        output.seek(SeekFrom::Start(0)).at(output_path)?;
        Some(sha256_of(&mut output).at(output_path)?)
    };
    #[cfg(not(feature = "file-io"))]
    let output_sha256: Option<[u8; 32]> = None;

    log::info!(
        "patched {} ({} records)",
        output_path.display(),
        records.records()
    );

    Ok(ApplyStats {
        image_size,
        patch_size,
        output_size,
        records,
        output_sha256,
    })
}

#[cfg(feature = "file-io")]
fn sha256_of<R: Read>(r: &mut R) -> io::Result<[u8; 32]> {
    let mut hasher = sha2::Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(hasher.finalize().into())
}

// ---------------------------------------------------------------------------
// rename_file
// ---------------------------------------------------------------------------

/// Copy the patch at `patch_path` into `out_dir` under its CRC-derived name.
/// Returns the path of the copy. The source patch is left untouched.
pub fn rename_file(patch_path: &Path, out_dir: &Path, overwrite: bool) -> Result<PathBuf, PatchError> {
    let mut patch = File::open(patch_path).at(patch_path)?;
    let id = identify::identify(&mut patch).at(patch_path)?;
    let dest = out_dir.join(id.file_name());

    if same_file(patch_path, &dest) {
        log::info!("{} already has its canonical name", patch_path.display());
        return Ok(dest);
    }

    let mut output = open_output(&dest, overwrite)?;
    patch.seek(SeekFrom::Start(0)).at(patch_path)?;
    io::copy(&mut patch, &mut output).at(&dest)?;
    output.flush().at(&dest)?;

    log::info!("renamed {} -> {}", patch_path.display(), dest.display());
    Ok(dest)
}

// ---------------------------------------------------------------------------
// inspect_file
// ---------------------------------------------------------------------------

/// Parse the header and every record of a patch file.
pub fn inspect_file(patch_path: &Path) -> Result<(PatchHeader, Vec<Record>), PatchError> {
    let file = File::open(patch_path).at(patch_path)?;
    decoder::read_patch(BufReader::with_capacity(BUF_SIZE, file)).at(patch_path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
