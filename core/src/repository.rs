use std::{
	collections::{BTreeMap, HashSet},
	fmt,
	path::Path,
	sync::Arc,
};

use itertools::Itertools;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::{fs, sync::RwLock};
use tracing::{debug, error, info, instrument, warn};
use vsum_change::{AppliedChange, ChangeApplication, ChangeBatch, ChangeError, IdentityChange};
use vsum_model::{
	decode_resource, encode_resource, Element, ElementRef, ModelError, ModelResource, VirtualUri,
	ROOTS_SLOT,
};
use vsum_utils::{
	error::FileIOError,
	fs::{read_if_exists, remove_if_exists, write_atomic},
};

use crate::{
	config::VsumConfig,
	correspondence::{CorrespondenceModel, TypePair},
	error::ConfigurationError,
	layout::StorageLayout,
	transaction::{TransactionStats, TransactionalContext},
	Error, Result, Sid, TypeSystem, TypeSystemRegistry,
};

pub type ResourceHandle = Arc<RwLock<ModelResource>>;
pub type CorrespondenceHandle = Arc<RwLock<CorrespondenceModel>>;

/// A file that could not be written or removed during [`ModelRepository::save_all`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveFailure {
	pub target: String,
	pub error: String,
}

impl SaveFailure {
	fn new(target: impl fmt::Display, error: impl fmt::Display) -> Self {
		Self {
			target: target.to_string(),
			error: error.to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
	pub saved: Vec<VirtualUri>,
	pub deleted: Vec<VirtualUri>,
	pub correspondence_saved: Vec<TypePair>,
	pub failed: Vec<SaveFailure>,
}

impl SaveReport {
	#[must_use]
	pub fn is_clean(&self) -> bool {
		self.failed.is_empty()
	}
}

/// Owns every model resource and correspondence model below one storage root.
///
/// Mutations run one at a time through the repository's [`TransactionalContext`]; lookups of
/// already registered resources and correspondence models only take read locks.
pub struct ModelRepository {
	config: VsumConfig,
	layout: StorageLayout,
	registry: Arc<TypeSystemRegistry>,
	resources: RwLock<BTreeMap<VirtualUri, ResourceHandle>>,
	correspondences: RwLock<BTreeMap<TypePair, CorrespondenceHandle>>,
	context: OnceCell<TransactionalContext>,
}

impl fmt::Debug for ModelRepository {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModelRepository")
			.field("root", &self.layout.root())
			.field("name", &self.config.name)
			.finish_non_exhaustive()
	}
}

impl ModelRepository {
	/// Opens the repository stored at `root`, creating it when needed, and eagerly loads every
	/// resource listed in its manifest.
	#[instrument(skip_all, fields(root = %root.as_ref().display()), err)]
	pub async fn open(
		root: impl AsRef<Path>,
		registry: impl Into<Arc<TypeSystemRegistry>>,
	) -> Result<Self> {
		let root = root.as_ref().to_path_buf();
		fs::create_dir_all(&root)
			.await
			.map_err(|e| FileIOError::from((&root, e, "creating storage root")))?;

		let config = VsumConfig::load(&root).await?;
		let layout = StorageLayout::new(root, &config.settings);

		let this = Self {
			config,
			layout,
			registry: registry.into(),
			resources: RwLock::default(),
			correspondences: RwLock::default(),
			context: OnceCell::new(),
		};

		let uris = this.layout.read_manifest().await?;
		{
			let mut resources = this.resources.write().await;
			for uri in uris.into_iter().unique() {
				if this.registry.resolve_uri(&uri).is_err() {
					warn!(%uri, "Manifest lists a resource without registered type system");
				}
				let resource = this.load_resource(&uri).await;
				resources.insert(uri, Arc::new(RwLock::new(resource)));
			}
		}

		info!(
			name = %this.config.name,
			models = this.resources.read().await.len(),
			"Opened model repository",
		);

		Ok(this)
	}

	#[must_use]
	pub fn root(&self) -> &Path {
		self.layout.root()
	}

	#[must_use]
	pub const fn config(&self) -> &VsumConfig {
		&self.config
	}

	#[must_use]
	pub const fn layout(&self) -> &StorageLayout {
		&self.layout
	}

	#[must_use]
	pub fn registry(&self) -> &Arc<TypeSystemRegistry> {
		&self.registry
	}

	/// The serializing context of this repository, created on first use
	pub fn context(&self) -> &TransactionalContext {
		self.context.get_or_init(TransactionalContext::new)
	}

	#[must_use]
	pub fn has_context(&self) -> bool {
		self.context.get().is_some()
	}

	#[must_use]
	pub fn transaction_stats(&self) -> TransactionStats {
		self.context
			.get()
			.map(TransactionalContext::stats)
			.unwrap_or_default()
	}

	pub async fn exists_model(&self, uri: &VirtualUri) -> bool {
		self.resources.read().await.contains_key(uri)
	}

	pub async fn model_uris(&self) -> Vec<VirtualUri> {
		self.resources.read().await.keys().cloned().collect()
	}

	pub async fn correspondence_pairs(&self) -> Vec<TypePair> {
		self.correspondences.read().await.keys().cloned().collect()
	}

	/// Returns the resource registered for `uri`, loading it from storage or creating it empty
	/// on first access. Repeated calls return the same handle.
	///
	/// Only an unknown extension is an error; a missing or unreadable file yields an empty
	/// resource.
	pub async fn get_model(&self, uri: &VirtualUri) -> Result<ResourceHandle> {
		self.registry.resolve_uri(uri)?;

		if let Some(handle) = self.resources.read().await.get(uri) {
			return Ok(Arc::clone(handle));
		}

		let tx = self.context().begin("register model").await;
		let handle = self.register(uri).await;
		tx.commit();

		Ok(handle)
	}

	/// Discards the in-memory state of a registered resource and reloads it from storage.
	///
	/// Returns `false` when nothing is registered for `uri`.
	#[instrument(skip_all, fields(uri = %uri))]
	pub async fn force_reload(&self, uri: &VirtualUri) -> bool {
		let Some(handle) = self.resources.read().await.get(uri).cloned() else {
			return false;
		};

		let tx = self.context().begin("reload model").await;
		let fresh = self.load_resource(uri).await;
		handle.write().await.replace_contents(fresh);
		tx.commit();

		debug!("Reloaded model");

		true
	}

	/// Makes `element` a root of the resource at `uri` and returns its reference and identifier.
	///
	/// Correspondences still pointing at an older reference of the element or its descendants
	/// are updated.
	#[instrument(skip_all, fields(uri = %uri, element = %element.id()), err)]
	pub async fn persist_root_element(
		&self,
		uri: &VirtualUri,
		element: Element,
	) -> Result<(ElementRef, Sid)> {
		let type_system = self.registry.resolve_uri(uri)?;

		let tx = self.context().begin("persist root element").await;
		let handle = self.register(uri).await;

		let (element_ref, subtree) = {
			let mut resource = handle.write().await;
			let id = element.id();

			match resource.placement(id) {
				Some(placement) if placement.parent.is_none() => resource.set_modified(true),
				Some(_) => {
					if let Some(contained) = resource.find(id) {
						resource.ensure_insertable(
							None,
							ROOTS_SLOT,
							contained,
							&[],
							&*type_system,
						)?;
					}
					let (contained, _) = resource.detach(id)?;
					resource.insert(None, ROOTS_SLOT, None, contained)?;
				}
				None => {
					resource
						.ensure_insertable(None, ROOTS_SLOT, &element, &[], &*type_system)?;
					resource.insert(None, ROOTS_SLOT, None, element)?;
				}
			}

			let element_ref = resource
				.locate(id, &*type_system)
				.ok_or(ModelError::UnknownElement(id))?;

			let subtree_ids = resource
				.find(id)
				.map(Element::subtree_ids)
				.unwrap_or_default()
				.into_iter()
				.collect::<HashSet<_>>();
			let subtree = resource
				.element_refs(&*type_system)
				.into_iter()
				.filter(|r| subtree_ids.contains(&r.id))
				.collect::<Vec<_>>();

			(element_ref, subtree)
		};

		self.refresh_stale_references(&type_system, &subtree).await?;
		tx.commit();

		debug!("Persisted root element");

		let sid = type_system.sid_of(&element_ref);
		Ok((element_ref, sid))
	}

	/// Deletes every rootless resource, then saves every modified resource and every changed
	/// correspondence model.
	///
	/// I/O failures are logged and collected, they never stop the remaining saves.
	#[instrument(skip(self))]
	pub async fn save_all(&self) -> SaveReport {
		let tx = self.context().begin("save all").await;
		let pretty = self.config.settings.pretty_json;
		let mut report = SaveReport::default();

		let snapshot = self
			.resources
			.read()
			.await
			.iter()
			.map(|(uri, handle)| (uri.clone(), Arc::clone(handle)))
			.collect::<Vec<_>>();

		for (uri, handle) in &snapshot {
			if !handle.read().await.is_empty() {
				continue;
			}

			match remove_if_exists(self.layout.resource_path(uri)).await {
				Ok(_) => {
					self.resources.write().await.remove(uri);
					debug!(%uri, "Deleted empty model");
					report.deleted.push(uri.clone());
				}
				Err(e) => {
					error!(%uri, ?e, "Failed to delete empty model");
					report.failed.push(SaveFailure::new(uri, e));
				}
			}
		}

		if !report.deleted.is_empty() {
			self.write_manifest(&*self.resources.read().await).await;
		}

		for (uri, handle) in &snapshot {
			let mut resource = handle.write().await;
			if !resource.is_modified() || resource.is_empty() {
				continue;
			}

			let written = match encode_resource(&resource, pretty) {
				Ok(bytes) => write_atomic(self.layout.resource_path(uri), bytes)
					.await
					.map_err(Error::from),
				Err(e) => Err(e.into()),
			};

			match written {
				Ok(()) => {
					resource.set_modified(false);
					debug!(%uri, "Saved model");
					report.saved.push(uri.clone());
				}
				Err(e) => {
					error!(%uri, ?e, "Failed to save model");
					report.failed.push(SaveFailure::new(uri, e));
				}
			}
		}

		for (pair, handle) in self.correspondences.read().await.iter() {
			let mut model = handle.write().await;
			if !model.has_changed_since_save() {
				continue;
			}

			match self.write_correspondences(&model).await {
				Ok(()) => {
					model.mark_saved();
					report.correspondence_saved.push(pair.clone());
				}
				Err(e) => {
					error!(%pair, ?e, "Failed to save correspondences");
					report.failed.push(SaveFailure::new(pair, e));
				}
			}
		}

		tx.commit();

		info!(
			saved = report.saved.len(),
			deleted = report.deleted.len(),
			correspondences = report.correspondence_saved.len(),
			failed = report.failed.len(),
			"Saved models",
		);

		report
	}

	/// Correspondence model between the type systems governing `a` and `b`, in either order.
	///
	/// Fails with a configuration error when either location has no type system; no partial
	/// mapping is ever created.
	pub async fn get_correspondence_model(
		&self,
		a: &VirtualUri,
		b: &VirtualUri,
	) -> Result<CorrespondenceHandle> {
		let a = self.registry.resolve_uri(a)?;
		let b = self.registry.resolve_uri(b)?;

		Ok(self.correspondence_model(a, b).await)
	}

	/// Same as [`ModelRepository::get_correspondence_model`], by type system ids
	pub async fn correspondence_model_between(
		&self,
		a: &str,
		b: &str,
	) -> Result<CorrespondenceHandle> {
		let resolve = |id: &str| {
			self.registry
				.by_id(id)
				.ok_or_else(|| ConfigurationError::UnknownTypeSystem(id.to_string()))
		};
		let (a, b) = (resolve(a)?, resolve(b)?);

		Ok(self.correspondence_model(a, b).await)
	}

	async fn correspondence_model(
		&self,
		a: Arc<TypeSystem>,
		b: Arc<TypeSystem>,
	) -> CorrespondenceHandle {
		let pair = TypePair::new(a.id(), b.id());

		if let Some(handle) = self.correspondences.read().await.get(&pair) {
			return Arc::clone(handle);
		}

		let tx = self.context().begin("create correspondence model").await;

		let mut correspondences = self.correspondences.write().await;
		if let Some(handle) = correspondences.get(&pair) {
			let handle = Arc::clone(handle);
			tx.commit();
			return handle;
		}

		let model = self.load_correspondences(&pair, a, b).await;
		let handle = Arc::new(RwLock::new(model));
		correspondences.insert(pair, Arc::clone(&handle));
		drop(correspondences);

		tx.commit();

		handle
	}

	/// Applies a change batch to its resource and moves the correspondences of every element
	/// whose identity changed.
	///
	/// A resource that is neither registered nor stored is only created when the batch starts
	/// with a root creation. Changes applied before a failing one are kept; the error reports
	/// how many went through.
	#[instrument(skip_all, fields(uri = %batch.uri(), changes = batch.len()), err)]
	pub async fn apply_change_forward(&self, batch: ChangeBatch) -> Result<AppliedChange> {
		let uri = batch.uri().clone();
		let type_system = self.registry.resolve_uri(&uri)?;
		let total = batch.len();

		let tx = self.context().begin("apply change").await;
		let mut application = ChangeApplication::new(batch);

		let existing = self.resources.read().await.get(&uri).cloned();
		let (handle, registered) = match existing {
			Some(handle) => (handle, true),
			None if application.may_create_resource() => {
				let handle = self.insert_resource(ModelResource::new(uri.clone())).await;
				(handle, true)
			}
			None => {
				let resource = self.load_resource(&uri).await;
				if resource.is_empty() {
					(Arc::new(RwLock::new(resource)), false)
				} else {
					(self.insert_resource(resource).await, true)
				}
			}
		};

		let failed = |application: &ChangeApplication, source: ChangeError| Error::Apply {
			uri: uri.clone(),
			applied: application.applied(),
			total,
			source,
		};

		let outcome = {
			let mut resource = handle.write().await;
			application
				.resolve(&resource)
				.map_err(|e| failed(&application, e))?;
			application
				.apply(&mut resource, &*type_system)
				.map_err(|e| (application.identity_changes(&resource, &*type_system), e))
		};

		let applied = match outcome {
			Ok(applied) => applied,
			Err((identity_changes, source)) => {
				if application.applied() > 0 && !registered {
					self.insert_handle(uri.clone(), handle).await;
				}
				let error = failed(&application, source);
				warn!(
					%uri,
					identity_changes = identity_changes.len(),
					?error,
					"Change batch failed partway, updating correspondences"
				);
				self.update_correspondences(&type_system, &identity_changes)
					.await?;
				return Err(error);
			}
		};

		if !registered {
			self.insert_handle(uri.clone(), handle).await;
		}

		self.update_correspondences(&type_system, &applied.identity_changes)
			.await?;

		tx.commit();

		Ok(applied)
	}

	/// Registers `uri`, loading it from storage when possible. The caller holds the transaction.
	async fn register(&self, uri: &VirtualUri) -> ResourceHandle {
		if let Some(handle) = self.resources.read().await.get(uri) {
			return Arc::clone(handle);
		}

		let resource = self.load_resource(uri).await;
		self.insert_resource(resource).await
	}

	async fn insert_resource(&self, resource: ModelResource) -> ResourceHandle {
		let uri = resource.uri().clone();
		let handle = Arc::new(RwLock::new(resource));
		self.insert_handle(uri, Arc::clone(&handle)).await;
		handle
	}

	async fn insert_handle(&self, uri: VirtualUri, handle: ResourceHandle) {
		let mut resources = self.resources.write().await;
		debug!(%uri, "Registered model");
		resources.insert(uri, handle);
		self.write_manifest(&resources).await;
	}

	async fn write_manifest(&self, resources: &BTreeMap<VirtualUri, ResourceHandle>) {
		if let Err(e) = self
			.layout
			.write_manifest(resources.keys(), self.config.settings.pretty_json)
			.await
		{
			error!(?e, "Failed to write the model manifest");
		}
	}

	/// Reads the resource stored for `uri`, falling back to an empty one
	async fn load_resource(&self, uri: &VirtualUri) -> ModelResource {
		let path = self.layout.resource_path(uri);

		let bytes = match read_if_exists(&path).await {
			Ok(Some(bytes)) => bytes,
			Ok(None) => {
				info!(%uri, "No stored model, starting empty");
				return ModelResource::new(uri.clone());
			}
			Err(e) => {
				warn!(%uri, ?e, "Failed to read model, starting empty");
				return ModelResource::new(uri.clone());
			}
		};

		match decode_resource(&bytes) {
			Ok(resource) if resource.uri() == uri => resource,
			Ok(resource) => {
				warn!(
					%uri,
					stored = %resource.uri(),
					"Stored model belongs to another location, starting empty",
				);
				ModelResource::new(uri.clone())
			}
			Err(e) => {
				warn!(%uri, ?e, "Failed to decode model, starting empty");
				ModelResource::new(uri.clone())
			}
		}
	}

	async fn load_correspondences(
		&self,
		pair: &TypePair,
		a: Arc<TypeSystem>,
		b: Arc<TypeSystem>,
	) -> CorrespondenceModel {
		let path = self.layout.correspondence_path(pair);

		match read_if_exists(&path).await {
			Ok(Some(bytes)) => {
				match CorrespondenceModel::decode(&bytes, Arc::clone(&a), Arc::clone(&b)) {
					Ok(model) => return model,
					Err(e) => warn!(%pair, ?e, "Failed to decode correspondences, starting empty"),
				}
			}
			Ok(None) => {}
			Err(e) => warn!(%pair, ?e, "Failed to read correspondences, starting empty"),
		}

		let model = CorrespondenceModel::new(a, b);
		match self.write_correspondences(&model).await {
			Ok(()) => info!(%pair, path = %path.display(), "Created correspondence model"),
			Err(e) => error!(%pair, ?e, "Failed to persist new correspondence model"),
		}

		model
	}

	async fn write_correspondences(&self, model: &CorrespondenceModel) -> Result<()> {
		let bytes = model.encode(self.config.settings.pretty_json)?;
		write_atomic(self.layout.correspondence_path(model.pair()), bytes).await?;
		Ok(())
	}

	async fn correspondences_involving(
		&self,
		type_system: &TypeSystem,
	) -> Vec<CorrespondenceHandle> {
		self.correspondences
			.read()
			.await
			.iter()
			.filter(|(pair, _)| pair.involves(type_system.id()))
			.map(|(_, handle)| Arc::clone(handle))
			.collect()
	}

	async fn update_correspondences(
		&self,
		type_system: &TypeSystem,
		changes: &[IdentityChange],
	) -> Result<()> {
		if changes.is_empty() {
			return Ok(());
		}

		for handle in self.correspondences_involving(type_system).await {
			handle.write().await.update_all(
				&changes
					.iter()
					.map(|change| (change.old.clone(), change.new.clone()))
					.collect::<Vec<_>>(),
			)?;
		}

		Ok(())
	}

	/// Updates correspondences holding an outdated reference of one of `elements`
	async fn refresh_stale_references(
		&self,
		type_system: &TypeSystem,
		elements: &[ElementRef],
	) -> Result<()> {
		for handle in self.correspondences_involving(type_system).await {
			let mut model = handle.write().await;
			for element in elements {
				for stale in model.references_to(element.id) {
					if &stale != element && model.has_correspondences(&stale) {
						model.update(&stale, element)?;
					}
				}
			}
		}

		Ok(())
	}
}
