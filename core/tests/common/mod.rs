#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use vsum_core::{
	model::{ElementId, ElementRef, VirtualUri},
	ModelRepository, TypeSystem, TypeSystemRegistry,
};

/// `X` models components (keyed by name) and their ports, `Y` models blocks
pub fn registry() -> Arc<TypeSystemRegistry> {
	let registry = TypeSystemRegistry::new()
		.with(
			TypeSystem::new("X", "urn:vsum:x")
				.with_extension("x")
				.with_keyed_class("Component", "name")
				.with_class("Port"),
		)
		.and_then(|registry| {
			registry.with(
				TypeSystem::new("Y", "urn:vsum:y")
					.with_extension("y")
					.with_keyed_class("Block", "name"),
			)
		})
		.unwrap();

	Arc::new(registry)
}

pub fn uri(uri: &str) -> VirtualUri {
	VirtualUri::parse(uri).unwrap()
}

pub async fn open(root: &Path) -> ModelRepository {
	ModelRepository::open(root, registry()).await.unwrap()
}

/// Current reference of element `id` inside the resource at `uri`
pub async fn locate(repository: &ModelRepository, at: &VirtualUri, id: ElementId) -> ElementRef {
	let type_system = repository.registry().resolve_uri(at).unwrap();
	let resource = repository.get_model(at).await.unwrap();
	let resource = resource.read().await;
	resource.locate(id, &*type_system).unwrap()
}
