//! Crash-consistent file helpers.
//!
//! Every persisted file is first written to a sibling `.tmp` file and then renamed over
//! the destination, so a reader never observes a half-written file.

use std::path::{Path, PathBuf};

use tokio::{fs, io};
use tracing::trace;

use crate::error::FileIOError;

fn tmp_path_for(path: &Path) -> PathBuf {
	let mut name = path
		.file_name()
		.map(|name| name.to_os_string())
		.unwrap_or_default();
	name.push(".tmp");
	path.with_file_name(name)
}

/// Writes `contents` to `path` atomically, creating parent directories as needed.
pub async fn write_atomic(
	path: impl AsRef<Path>,
	contents: impl AsRef<[u8]>,
) -> Result<(), FileIOError> {
	let path = path.as_ref();

	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from((parent, e, "creating parent directory")))?;
		}
	}

	let tmp_path = tmp_path_for(path);
	fs::write(&tmp_path, contents)
		.await
		.map_err(|e| FileIOError::from((&tmp_path, e, "writing temporary file")))?;

	if let Err(e) = fs::rename(&tmp_path, path).await {
		// Best effort cleanup
		let _ = fs::remove_file(&tmp_path).await;
		return Err(FileIOError::from((path, e, "renaming temporary file")));
	}

	trace!(path = %path.display(), "atomically wrote file");

	Ok(())
}

/// Reads a file, mapping "not found" to `Ok(None)`.
pub async fn read_if_exists(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>, FileIOError> {
	let path = path.as_ref();
	match fs::read(path).await {
		Ok(bytes) => Ok(Some(bytes)),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(FileIOError::from((path, e))),
	}
}

/// Removes a file, returning whether something was actually removed.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> Result<bool, FileIOError> {
	let path = path.as_ref();
	match fs::remove_file(path).await {
		Ok(()) => Ok(true),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
		Err(e) => Err(FileIOError::from((path, e, "removing file"))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[tokio::test]
	async fn write_atomic_creates_parents_and_leaves_no_tmp() {
		let dir = tempdir().expect("tempdir");
		let target = dir.path().join("nested").join("deeper").join("model.x");

		write_atomic(&target, b"{}").await.expect("write");

		assert_eq!(
			read_if_exists(&target).await.expect("read"),
			Some(b"{}".to_vec())
		);
		assert!(!tmp_path_for(&target).exists());
	}

	#[tokio::test]
	async fn missing_files_are_not_errors() {
		let dir = tempdir().expect("tempdir");
		let target = dir.path().join("absent.x");

		assert_eq!(read_if_exists(&target).await.expect("read"), None);
		assert!(!remove_if_exists(&target).await.expect("remove"));

		write_atomic(&target, b"1").await.expect("write");
		assert!(remove_if_exists(&target).await.expect("remove"));
	}
}
