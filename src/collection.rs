//! Collection: a named node in the hierarchical namespace, addressed by a
//! stable arena index rather than an owning pointer.

use crate::item::Item;

/// Stable index into `CollectionTree`'s arena. Never reused after a
/// collection is removed, so a dangling `CollectionId` is simply a lookup
/// miss rather than a use-after-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionId(pub usize);

#[derive(Debug)]
pub struct Collection {
    pub name: String,
    pub parent: Option<CollectionId>,
    pub subcollections: Vec<CollectionId>,
    pub items: Vec<Item>,
    /// Slash-joined path from the database root, e.g. `users/alice`.
    pub path: String,
}

impl Collection {
    pub fn new_root(name: String) -> Self {
        Self {
            path: name.clone(),
            name,
            parent: None,
            subcollections: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn new_child(name: String, parent: CollectionId, parent_path: &str) -> Self {
        let path = format!("{parent_path}/{name}");
        Self {
            name,
            parent: Some(parent),
            subcollections: Vec::new(),
            items: Vec::new(),
            path,
        }
    }

    pub fn find_item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn find_item_mut(&mut self, name: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.name == name)
    }

    pub fn find_item_index(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|i| i.name == name)
    }
}
