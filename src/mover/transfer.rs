//! The move itself: link-then-unlink when possible, verified copy otherwise.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::MoverConfig;

use super::collision::{MAX_SUFFIX_DEFAULT, free_destination};
use super::error::MoveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStrategy {
    /// Same-volume move; no data copied.
    Renamed,
    /// Cross-volume copy, verified, then source removed.
    Copied,
    /// Source already lives in the destination directory; nothing moved.
    InPlace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub strategy: MoveStrategy,
    /// `Some(n)` when the file was renamed to `name (n).ext` to avoid a collision.
    pub collision_suffix: Option<u32>,
}

/// Moves single files. Stateless apart from its collision limit.
#[derive(Debug, Clone)]
pub struct Mover {
    max_collision_suffix: u32,
}

impl Default for Mover {
    fn default() -> Self {
        Self {
            max_collision_suffix: MAX_SUFFIX_DEFAULT,
        }
    }
}

impl Mover {
    pub fn new(config: &MoverConfig) -> Self {
        Self {
            max_collision_suffix: config.max_collision_suffix,
        }
    }

    /// Move `source` into `destination_dir`, creating the directory if needed.
    ///
    /// Never overwrites. On error the source is left where it was and no
    /// partial copy remains at the destination.
    pub fn move_file(&self, source: &Path, destination_dir: &Path) -> Result<MoveOutcome, MoveError> {
        let source_meta = fs::metadata(source).map_err(|error| MoveError::SourceUnavailable {
            source_path: source.to_path_buf(),
            error,
        })?;
        if !source_meta.is_file() {
            return Err(MoveError::SourceUnavailable {
                source_path: source.to_path_buf(),
                error: io::Error::new(io::ErrorKind::IsADirectory, "not a regular file"),
            });
        }
        let file_name = source.file_name().ok_or_else(|| MoveError::SourceUnavailable {
            source_path: source.to_path_buf(),
            error: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        })?;

        ensure_directory(destination_dir)?;

        if same_directory(source, destination_dir) {
            return Ok(MoveOutcome {
                source: source.to_path_buf(),
                destination: source.to_path_buf(),
                strategy: MoveStrategy::InPlace,
                collision_suffix: None,
            });
        }

        // Each attempt either claims its name atomically or reports it taken,
        // so a file that appears after the free-name check is never replaced.
        let mut from = 0;
        loop {
            let (target, collision_suffix) =
                free_destination(destination_dir, file_name, from, self.max_collision_suffix)
                    .ok_or_else(|| MoveError::CollisionUnresolved {
                        source_path: source.to_path_buf(),
                        destination: destination_dir.to_path_buf(),
                        attempts: self.max_collision_suffix,
                    })?;

            match place(source, &target) {
                Ok(strategy) => {
                    return Ok(MoveOutcome {
                        source: source.to_path_buf(),
                        destination: target,
                        strategy,
                        collision_suffix,
                    });
                }
                Err(Attempt::Taken) => {
                    crate::debug_event!("mover", "name taken", "{}", target.display());
                    from = collision_suffix.map_or(1, |n| n + 1);
                }
                Err(Attempt::Failed(e)) => return Err(e),
            }
        }
    }
}

/// Outcome of one placement attempt that did not move the file.
enum Attempt {
    /// Something claimed the target name first; nothing was changed.
    Taken,
    Failed(MoveError),
}

/// Move `source` to the free name `target` without ever replacing a file.
///
/// Same volume: hard link, then unlink the source. Otherwise, or where hard
/// links are not supported: verified copy.
fn place(source: &Path, target: &Path) -> Result<MoveStrategy, Attempt> {
    match fs::hard_link(source, target) {
        Ok(()) => {
            if let Err(error) = fs::remove_file(source) {
                if let Err(e) = fs::remove_file(target) {
                    tracing::error!("[mover] could not remove link {}: {e}", target.display());
                }
                return Err(Attempt::Failed(MoveError::PartialMoveFailure {
                    source_path: source.to_path_buf(),
                    destination: target.to_path_buf(),
                    error,
                }));
            }
            Ok(MoveStrategy::Renamed)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Attempt::Taken),
        Err(error) if error.kind() == io::ErrorKind::NotFound && !source.exists() => {
            Err(Attempt::Failed(MoveError::SourceUnavailable {
                source_path: source.to_path_buf(),
                error,
            }))
        }
        Err(e) => {
            crate::debug_event!(
                "mover",
                "copying",
                "{} -> {} ({e})",
                source.display(),
                target.display()
            );
            match copy_then_remove(source, target) {
                Ok(_) => Ok(MoveStrategy::Copied),
                Err(MoveError::DestinationUnavailable { error, .. })
                    if error.kind() == io::ErrorKind::AlreadyExists =>
                {
                    Err(Attempt::Taken)
                }
                Err(e) => Err(Attempt::Failed(e)),
            }
        }
    }
}

fn ensure_directory(dir: &Path) -> Result<(), MoveError> {
    let unavailable = |error| MoveError::DestinationUnavailable {
        destination: dir.to_path_buf(),
        error,
    };

    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(unavailable(io::Error::new(
            io::ErrorKind::NotADirectory,
            "destination exists and is not a directory",
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(unavailable)?;
            crate::log_event!("mover", "created destination", "{}", dir.display());
            Ok(())
        }
        Err(e) => Err(unavailable(e)),
    }
}

fn same_directory(source: &Path, destination_dir: &Path) -> bool {
    let Some(parent) = source.parent() else {
        return false;
    };
    match (fs::canonicalize(parent), fs::canonicalize(destination_dir)) {
        (Ok(a), Ok(b)) => a == b,
        _ => parent == destination_dir,
    }
}

/// Copy `source` to the not-yet-existing `target`, verify, then remove `source`.
///
/// Exactly one live artifact remains afterwards: the verified copy on
/// success, the untouched source on failure.
pub(crate) fn copy_then_remove(source: &Path, target: &Path) -> Result<u64, MoveError> {
    let mut reader = File::open(source).map_err(|error| MoveError::SourceUnavailable {
        source_path: source.to_path_buf(),
        error,
    })?;
    let source_meta = reader
        .metadata()
        .map_err(|error| MoveError::SourceUnavailable {
            source_path: source.to_path_buf(),
            error,
        })?;

    // create_new: never clobber something that appeared after name selection.
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(|error| MoveError::DestinationUnavailable {
            destination: target.to_path_buf(),
            error,
        })?;

    let partial = |error: io::Error| {
        if let Err(e) = fs::remove_file(target) {
            tracing::error!(
                "[mover] could not remove partial copy {}: {e}",
                target.display()
            );
        }
        MoveError::PartialMoveFailure {
            source_path: source.to_path_buf(),
            destination: target.to_path_buf(),
            error,
        }
    };

    let copy_result = io::copy(&mut reader, &mut writer).and_then(|n| writer.sync_all().map(|()| n));
    drop(writer);
    let copied = copy_result.map_err(&partial)?;

    let expected = source_meta.len();
    let written = fs::metadata(target).map(|m| m.len()).map_err(&partial)?;
    if copied != expected || written != expected {
        return Err(partial(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("copied {copied} bytes, wrote {written}, source has {expected}"),
        )));
    }

    if let Err(e) = fs::set_permissions(target, source_meta.permissions()) {
        crate::debug_event!("mover", "permissions not copied", "{}: {e}", target.display());
    }

    drop(reader);
    fs::remove_file(source).map_err(&partial)?;
    Ok(copied)
}
