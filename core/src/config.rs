//! Versioned repository configuration stored as `vsum.json` at the storage root.

use std::{any::type_name, marker::PhantomData, path::Path};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;
use vsum_utils::{
	error::FileIOError,
	fs::{read_if_exists, write_atomic},
};

pub const CONFIG_FILE: &str = "vsum.json";

/// Decodes only the version so the remaining fields can be migrated before parsing them.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BaseConfig {
	pub version: u32,
	#[serde(flatten)]
	other: Map<String, Value>,
}

/// Loads a versioned JSON file, migrating older versions forward one step at a time.
pub struct FileMigrator<T>
where
	T: Serialize + DeserializeOwned + Default,
{
	pub current_version: u32,
	pub migration_fn: fn(u32, &mut Map<String, Value>) -> Result<(), MigratorError>,
	pub phantom: PhantomData<T>,
}

impl<T> FileMigrator<T>
where
	T: Serialize + DeserializeOwned + Default,
{
	/// Loads the file at `path`, writing it with default content when it does not exist yet.
	pub async fn load(&self, path: &Path) -> Result<T, MigratorError> {
		let Some(bytes) = read_if_exists(path).await? else {
			let content = T::default();
			self.save(path, &content).await?;
			return Ok(content);
		};

		let mut cfg: BaseConfig = serde_json::from_slice(&bytes)?;

		if cfg.version > self.current_version {
			return Err(MigratorError::Outdated {
				found: cfg.version,
				supported: self.current_version,
			});
		}

		let is_latest = cfg.version == self.current_version;
		for v in (cfg.version + 1)..=self.current_version {
			(self.migration_fn)(v, &mut cfg.other)?;
			cfg.version = v;
			info!(path = %path.display(), version = v, "Migrated configuration");
		}

		if !is_latest {
			write_atomic(path, serde_json::to_vec_pretty(&cfg)?).await?;
		}

		Ok(serde_json::from_value(Value::Object(cfg.other))?)
	}

	pub async fn save(&self, path: &Path, content: &T) -> Result<(), MigratorError> {
		let Value::Object(other) = serde_json::to_value(content)? else {
			return Err(MigratorError::NotAnObject(type_name::<T>()));
		};

		let config = BaseConfig {
			version: self.current_version,
			other,
		};

		write_atomic(path, serde_json::to_vec_pretty(&config)?).await?;

		Ok(())
	}
}

#[derive(Error, Debug)]
pub enum MigratorError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("error serializing or deserializing the JSON in the config file: {0}")]
	Json(#[from] serde_json::Error),
	#[error("the config file has version {found} but at most {supported} is supported")]
	Outdated { found: u32, supported: u32 },
	#[error("type '{0}' must serialize to a JSON object")]
	NotAnObject(&'static str),
	#[error("custom migration error: {0}")]
	Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
	/// Indent persisted JSON files
	pub pretty_json: bool,
	/// Directory below `.vsum` holding correspondence files
	pub correspondence_dir: String,
	/// File below `.vsum` listing every managed resource
	pub manifest_file: String,
}

impl Default for RepositorySettings {
	fn default() -> Self {
		Self {
			pretty_json: true,
			correspondence_dir: "correspondence".to_string(),
			manifest_file: "models.json".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VsumConfig {
	pub name: String,
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub settings: RepositorySettings,
}

impl Default for VsumConfig {
	fn default() -> Self {
		Self {
			name: "vsum".to_string(),
			created_at: Utc::now(),
			settings: RepositorySettings::default(),
		}
	}
}

impl VsumConfig {
	pub const VERSION: u32 = 2;

	fn migrator() -> FileMigrator<Self> {
		FileMigrator {
			current_version: Self::VERSION,
			migration_fn: migrate,
			phantom: PhantomData,
		}
	}

	pub async fn load(root: &Path) -> Result<Self, MigratorError> {
		Self::migrator().load(&root.join(CONFIG_FILE)).await
	}

	pub async fn save(&self, root: &Path) -> Result<(), MigratorError> {
		Self::migrator().save(&root.join(CONFIG_FILE), self).await
	}
}

fn migrate(to: u32, config: &mut Map<String, Value>) -> Result<(), MigratorError> {
	match to {
		1 => {}
		// Version 1 kept `pretty_json` at the top level and had no creation date
		2 => {
			let pretty = config
				.remove("pretty_json")
				.unwrap_or(Value::Bool(true));

			let settings = config
				.entry("settings")
				.or_insert_with(|| Value::Object(Map::new()));
			let Value::Object(settings) = settings else {
				return Err(MigratorError::Custom(
					"'settings' must be an object".to_string(),
				));
			};
			settings.entry("pretty_json").or_insert(pretty);

			if !config.contains_key("created_at") {
				config.insert("created_at".to_string(), serde_json::to_value(Utc::now())?);
			}
		}
		v => {
			return Err(MigratorError::Custom(format!(
				"no migration defined for version {v}"
			)))
		}
	}

	Ok(())
}
