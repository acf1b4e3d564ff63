//! Correspondence models: links between elements of two type systems and the indices
//! answering "what corresponds to this element" by stable identifier.

mod arena;
mod error;
mod index;
mod link;
mod model;
mod pair;

pub use arena::{FeatureSetId, LinkId};
pub use error::{CorrespondenceError, Result};
pub use link::{Endpoint, FeatureInstance, Link, LinkKind, NewLink};
pub use model::{CorrespondenceDocument, CorrespondenceModel, CORRESPONDENCE_FORMAT_VERSION};
pub use pair::TypePair;
