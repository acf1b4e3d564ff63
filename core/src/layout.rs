use std::path::{Path, PathBuf};

use vsum_model::VirtualUri;
use vsum_utils::fs::{read_if_exists, write_atomic};

use crate::{
	config::RepositorySettings,
	correspondence::TypePair,
	Result,
};

/// Directory below the storage root holding repository bookkeeping
pub const META_DIR: &str = ".vsum";

/// Where every persisted file of a repository lives
#[derive(Debug, Clone)]
pub struct StorageLayout {
	root: PathBuf,
	manifest: PathBuf,
	correspondence_dir: PathBuf,
}

impl StorageLayout {
	pub fn new(root: impl Into<PathBuf>, settings: &RepositorySettings) -> Self {
		let root = root.into();
		let meta = root.join(META_DIR);

		Self {
			manifest: meta.join(&settings.manifest_file),
			correspondence_dir: meta.join(&settings.correspondence_dir),
			root,
		}
	}

	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	#[must_use]
	pub fn manifest_path(&self) -> &Path {
		&self.manifest
	}

	#[must_use]
	pub fn resource_path(&self, uri: &VirtualUri) -> PathBuf {
		uri.to_path(&self.root)
	}

	#[must_use]
	pub fn correspondence_path(&self, pair: &TypePair) -> PathBuf {
		self.correspondence_dir.join(pair.file_name())
	}

	/// Locations listed in the manifest, empty when there is no manifest yet
	pub async fn read_manifest(&self) -> Result<Vec<VirtualUri>> {
		match read_if_exists(&self.manifest).await? {
			Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
			None => Ok(Vec::new()),
		}
	}

	pub async fn write_manifest<'a>(
		&self,
		uris: impl IntoIterator<Item = &'a VirtualUri>,
		pretty: bool,
	) -> Result<()> {
		let uris = uris.into_iter().collect::<Vec<_>>();
		let bytes = if pretty {
			serde_json::to_vec_pretty(&uris)?
		} else {
			serde_json::to_vec(&uris)?
		};

		write_atomic(&self.manifest, bytes).await?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn derived_locations() {
		let layout = StorageLayout::new("/store", &RepositorySettings::default());
		let uri = VirtualUri::parse("models/a.x").unwrap();

		assert_eq!(layout.resource_path(&uri), Path::new("/store/models/a.x"));
		assert_eq!(layout.manifest_path(), Path::new("/store/.vsum/models.json"));
		assert_eq!(
			layout.correspondence_path(&TypePair::new("y", "x")),
			Path::new("/store/.vsum/correspondence/x__y.correspondence")
		);
	}

	#[tokio::test]
	async fn manifest_round_trip() {
		let dir = tempdir().unwrap();
		let layout = StorageLayout::new(dir.path(), &RepositorySettings::default());
		assert!(layout.read_manifest().await.unwrap().is_empty());

		let uris = vec![
			VirtualUri::parse("a.x").unwrap(),
			VirtualUri::parse("nested/b.y").unwrap(),
		];
		layout.write_manifest(&uris, false).await.unwrap();

		assert_eq!(layout.read_manifest().await.unwrap(), uris);
	}
}
