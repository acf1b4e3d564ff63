use std::{
	collections::{BTreeMap, HashMap},
	sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::debug;
use vsum_model::{ElementRef, KeyAttributes, VirtualUri};

use crate::{error::ConfigurationError, Sid};

/// Per class settings of a type system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSpec {
	/// Attribute whose value identifies instances among their siblings
	#[serde(default)]
	pub key_attribute: Option<String>,
}

/// Metamodel governing every resource whose extension it declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSystem {
	id: String,
	namespace: String,
	file_extensions: Vec<String>,
	#[serde(default)]
	classes: BTreeMap<String, ClassSpec>,
}

impl TypeSystem {
	pub fn new(id: impl Into<String>, namespace: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			namespace: namespace.into(),
			file_extensions: Vec::new(),
			classes: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
		self.file_extensions.push(extension.into());
		self
	}

	#[must_use]
	pub fn with_class(mut self, class: impl Into<String>) -> Self {
		self.classes.insert(class.into(), ClassSpec::default());
		self
	}

	#[must_use]
	pub fn with_keyed_class(
		mut self,
		class: impl Into<String>,
		key_attribute: impl Into<String>,
	) -> Self {
		self.classes.insert(
			class.into(),
			ClassSpec {
				key_attribute: Some(key_attribute.into()),
			},
		);
		self
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	#[must_use]
	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	#[must_use]
	pub fn file_extensions(&self) -> &[String] {
		&self.file_extensions
	}

	#[must_use]
	pub fn governs(&self, uri: &VirtualUri) -> bool {
		uri.extension()
			.is_some_and(|ext| self.file_extensions.iter().any(|known| known == ext))
	}

	/// A type system without declared classes accepts every class
	#[must_use]
	pub fn declares(&self, class: &str) -> bool {
		self.classes.is_empty() || self.classes.contains_key(class)
	}

	/// Whether the element lives in a resource of this type system and is of one of its classes
	#[must_use]
	pub fn owns(&self, element: &ElementRef) -> bool {
		self.governs(&element.uri) && self.declares(element.class())
	}

	#[must_use]
	pub fn sid_of(&self, element: &ElementRef) -> Sid {
		Sid::derive(&self.id, element)
	}
}

impl KeyAttributes for TypeSystem {
	fn key_attribute(&self, class: &str) -> Option<&str> {
		self.classes
			.get(class)
			.and_then(|spec| spec.key_attribute.as_deref())
	}
}

/// Lookup of type systems by id and by file extension
#[derive(Debug, Default)]
pub struct TypeSystemRegistry {
	by_id: BTreeMap<String, Arc<TypeSystem>>,
	by_extension: HashMap<String, Arc<TypeSystem>>,
}

impl TypeSystemRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(
		&mut self,
		type_system: TypeSystem,
	) -> Result<Arc<TypeSystem>, ConfigurationError> {
		if self.by_id.contains_key(type_system.id()) {
			return Err(ConfigurationError::DuplicateTypeSystem(
				type_system.id().to_string(),
			));
		}

		if let Some((extension, existing)) = type_system
			.file_extensions()
			.iter()
			.find_map(|ext| self.by_extension.get(ext).map(|existing| (ext, existing)))
		{
			return Err(ConfigurationError::DuplicateExtension {
				extension: extension.clone(),
				existing: existing.id().to_string(),
				new: type_system.id().to_string(),
			});
		}

		let type_system = Arc::new(type_system);
		for extension in type_system.file_extensions() {
			self.by_extension
				.insert(extension.clone(), Arc::clone(&type_system));
		}
		self.by_id
			.insert(type_system.id().to_string(), Arc::clone(&type_system));

		debug!(id = type_system.id(), "Registered type system");

		Ok(type_system)
	}

	/// Builder style [`TypeSystemRegistry::register`]
	pub fn with(mut self, type_system: TypeSystem) -> Result<Self, ConfigurationError> {
		self.register(type_system)?;
		Ok(self)
	}

	/// Resolves either a bare extension (`"x"`) or anything ending in one (`"dir/a.x"`)
	#[must_use]
	pub fn resolve(&self, extension_or_uri: &str) -> Option<Arc<TypeSystem>> {
		let extension = extension_or_uri
			.rsplit_once('.')
			.map_or(extension_or_uri, |(_, ext)| ext);

		self.by_extension.get(extension).cloned()
	}

	pub fn resolve_uri(&self, uri: &VirtualUri) -> Result<Arc<TypeSystem>, ConfigurationError> {
		uri.extension()
			.and_then(|ext| self.by_extension.get(ext))
			.cloned()
			.ok_or_else(|| ConfigurationError::UnknownExtension { uri: uri.clone() })
	}

	#[must_use]
	pub fn by_id(&self, id: &str) -> Option<Arc<TypeSystem>> {
		self.by_id.get(id).cloned()
	}
}
