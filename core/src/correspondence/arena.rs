//! Slot storage with free list reuse, addressed by dense `u32` handles.

use std::{fmt, marker::PhantomData};

/// Typed handle into an [`Arena`]
pub trait ArenaId: Copy + Ord {
	fn from_usize(index: usize) -> Self;
	fn as_usize(self) -> usize;
}

macro_rules! arena_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(
			Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
			serde::Serialize, serde::Deserialize,
		)]
		#[serde(transparent)]
		pub struct $name(u32);

		impl ArenaId for $name {
			#[allow(clippy::cast_possible_truncation)]
			fn from_usize(index: usize) -> Self {
				debug_assert!(u32::try_from(index).is_ok(), "arena exhausted");
				Self(index as u32)
			}

			fn as_usize(self) -> usize {
				self.0 as usize
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}#{}", stringify!($name), self.0)
			}
		}
	};
}

arena_id!(
	/// Handle of a stored link
	LinkId
);

arena_id!(
	/// Handle of a set of corresponding feature instances
	FeatureSetId
);

#[derive(Debug, Clone)]
pub struct Arena<I, T> {
	slots: Vec<Option<T>>,
	free: Vec<usize>,
	len: usize,
	_id: PhantomData<I>,
}

impl<I, T> Default for Arena<I, T> {
	fn default() -> Self {
		Self {
			slots: Vec::new(),
			free: Vec::new(),
			len: 0,
			_id: PhantomData,
		}
	}
}

impl<I: ArenaId, T> Arena<I, T> {
	/// Stores `value`, reusing the most recently freed slot first
	pub fn insert(&mut self, value: T) -> I {
		self.len += 1;

		if let Some(index) = self.free.pop() {
			self.slots[index] = Some(value);
			I::from_usize(index)
		} else {
			self.slots.push(Some(value));
			I::from_usize(self.slots.len() - 1)
		}
	}

	pub fn remove(&mut self, id: I) -> Option<T> {
		let value = self.slots.get_mut(id.as_usize())?.take()?;
		self.free.push(id.as_usize());
		self.len -= 1;
		Some(value)
	}

	pub fn get(&self, id: I) -> Option<&T> {
		self.slots.get(id.as_usize())?.as_ref()
	}

	pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
		self.slots.get_mut(id.as_usize())?.as_mut()
	}

	pub const fn len(&self) -> usize {
		self.len
	}

	pub const fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Live entries in slot order
	pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
		self.slots
			.iter()
			.enumerate()
			.filter_map(|(index, slot)| slot.as_ref().map(|value| (I::from_usize(index), value)))
	}
}
