use serde_json::json;
use vsum_change::{ApplicationState, ChangeApplication, ChangeBatch, EChange};
use vsum_model::{Element, KeyAttributes, ModelResource, VirtualUri, ROOTS_SLOT};

struct NamedClasses;

impl KeyAttributes for NamedClasses {
	fn key_attribute(&self, class: &str) -> Option<&str> {
		matches!(class, "Package" | "Class").then_some("name")
	}
}

struct Fixture {
	resource: ModelResource,
	model: Element,
	package: Element,
	class: Element,
}

fn fixture() -> Fixture {
	let uri = VirtualUri::parse("design/uml.x").unwrap();
	let class = Element::new("Class").with_attribute("name", "Engine");
	let package = Element::new("Package")
		.with_attribute("name", "vehicle")
		.with_child("classes", class.clone());
	let model = Element::new("Model").with_child("packages", package.clone());

	let mut resource = ModelResource::new(uri);
	resource.insert(None, ROOTS_SLOT, None, model.clone()).unwrap();
	resource.set_modified(false);

	Fixture {
		resource,
		model,
		package,
		class,
	}
}

fn run(resource: &mut ModelResource, changes: Vec<EChange>) -> vsum_change::AppliedChange {
	let batch = ChangeBatch::new(resource.uri().clone(), changes).unwrap();
	let mut application = ChangeApplication::new(batch);
	let applied = application.run(resource, &NamedClasses).unwrap();
	assert_eq!(application.state(), ApplicationState::Applied);
	applied
}

#[test]
fn renaming_a_package_changes_the_identity_of_its_whole_subtree() {
	let Fixture {
		mut resource,
		package,
		class,
		..
	} = fixture();

	let applied = run(
		&mut resource,
		vec![EChange::ReplaceAttribute {
			element: package.id(),
			slot: "name".to_string(),
			old: Some(json!("vehicle")),
			new: json!("car"),
		}],
	);

	let changed = applied
		.identity_changes
		.iter()
		.map(|change| change.new.id)
		.collect::<Vec<_>>();
	assert_eq!(changed, vec![package.id(), class.id()]);
	assert!(applied.identity_changes[1]
		.new
		.path_string()
		.contains("Package[car]/classes.Class[Engine]"));
	assert!(resource.is_modified());
}

#[test]
fn attribute_changes_outside_key_attributes_keep_identities() {
	let Fixture {
		mut resource,
		class,
		..
	} = fixture();

	let applied = run(
		&mut resource,
		vec![EChange::ReplaceAttribute {
			element: class.id(),
			slot: "abstract".to_string(),
			old: None,
			new: json!(true),
		}],
	);

	assert!(!applied.changes_identities());
	assert!(applied.created.is_empty());
	assert!(applied.removed.is_empty());
}

#[test]
fn moving_to_a_new_root_is_reported_as_identity_change() {
	let Fixture {
		mut resource,
		class,
		..
	} = fixture();
	let archive = Element::new("Package").with_attribute("name", "archive");

	let applied = run(
		&mut resource,
		vec![
			EChange::CreateAndInsertRoot {
				element: archive.clone(),
				index: None,
			},
			EChange::MoveElement {
				element: class.id(),
				new_parent: Some(archive.id()),
				slot: "classes".to_string(),
				index: None,
			},
		],
	);

	assert_eq!(applied.created.len(), 1);
	assert_eq!(applied.identity_changes.len(), 1);
	let change = &applied.identity_changes[0];
	assert_eq!(change.old.id, class.id());
	assert_eq!(
		change.new.path_string(),
		"roots.Package[archive]/classes.Class[Engine]"
	);
}

#[test]
fn replacing_in_list_with_same_id_retypes_the_element() {
	let Fixture {
		mut resource,
		package,
		class,
		..
	} = fixture();
	let interface = Element::with_id(class.id(), "Interface").with_attribute("name", "Engine");

	let applied = run(
		&mut resource,
		vec![EChange::ReplaceInList {
			parent: Some(package.id()),
			slot: "classes".to_string(),
			index: 0,
			old: class.id(),
			new: interface,
		}],
	);

	assert_eq!(applied.identity_changes.len(), 1);
	assert_eq!(applied.identity_changes[0].old.class(), "Class");
	assert_eq!(applied.identity_changes[0].new.class(), "Interface");
	assert!(applied.removed.is_empty());
}

#[test]
fn removing_a_subtree_reports_every_removed_element() {
	let Fixture {
		mut resource,
		model,
		package,
		class,
	} = fixture();

	let applied = run(
		&mut resource,
		vec![EChange::RemoveElement {
			parent: Some(model.id()),
			slot: "packages".to_string(),
			element: package.id(),
		}],
	);

	let removed = applied.removed.iter().map(|r| r.id).collect::<Vec<_>>();
	assert_eq!(removed, vec![package.id(), class.id()]);
	assert_eq!(resource.root_elements().len(), 1);
}

#[test]
fn removing_everything_leaves_an_empty_resource() {
	let Fixture {
		mut resource,
		model,
		..
	} = fixture();

	run(
		&mut resource,
		vec![EChange::RemoveElement {
			parent: None,
			slot: ROOTS_SLOT.to_string(),
			element: model.id(),
		}],
	);

	assert!(resource.is_empty());
}
