//! CollectionTree: the persistent hierarchical namespace rooted at a
//! database directory.
//!
//! Collections live in a vector-backed arena keyed by a stable
//! [`CollectionId`] instead of the owning-pointer tree of the original
//! implementation; a freed slot becomes `None` forever rather than being
//! recycled, so a stale id is always a clean lookup miss.

use crate::collection::{Collection, CollectionId};
use crate::error::{CustodianResult, ServerError};
use crate::item::{DataType, Item, Payload, Permission};
use std::fs;
use std::path::{Path, PathBuf};

const FORMATTED_COLLECTIONS: &str = "formattedCollections";
const LEGACY_COLLECTIONS: &str = "collections";
const MANIFEST: &str = "Manifest";

pub struct CollectionTree {
    db_dir: PathBuf,
    arena: Vec<Option<Collection>>,
    roots: Vec<CollectionId>,
}

/// A collection path is non-empty, has no leading `/`, no `//` runs, and
/// uses only `[a-zA-Z0-9/.+]`.
pub fn validate_collection_path(path: &str) -> CustodianResult<()> {
    if path.is_empty() || path.starts_with('/') || path.contains("//") {
        return Err(ServerError::PathInval(path.to_string()));
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '+'))
    {
        return Err(ServerError::PathInval(path.to_string()));
    }
    Ok(())
}

/// An item path additionally has at least one `/` (a parent collection).
pub fn validate_item_path(path: &str) -> CustodianResult<()> {
    validate_collection_path(path)?;
    if !path.contains('/') {
        return Err(ServerError::PathInval(path.to_string()));
    }
    Ok(())
}

fn split_item_path(path: &str) -> CustodianResult<(&str, &str)> {
    validate_item_path(path)?;
    let idx = path.rfind('/').expect("validated item path has a slash");
    Ok((&path[..idx], &path[idx + 1..]))
}

impl CollectionTree {
    /// Open (or initialize) the tree rooted at `db_dir`.
    pub fn open(db_dir: impl Into<PathBuf>) -> CustodianResult<Self> {
        let db_dir = db_dir.into();
        fs::create_dir_all(&db_dir).map_err(|_| ServerError::FileOpen(db_dir.clone()))?;

        let mut tree = CollectionTree {
            db_dir,
            arena: Vec::new(),
            roots: Vec::new(),
        };

        let index_path = tree.db_dir.join(FORMATTED_COLLECTIONS);
        let legacy_path = tree.db_dir.join(LEGACY_COLLECTIONS);

        let raw = if index_path.exists() {
            fs::read_to_string(&index_path).map_err(|_| ServerError::FileRead(index_path))?
        } else if legacy_path.exists() {
            let contents =
                fs::read_to_string(&legacy_path).map_err(|_| ServerError::FileRead(legacy_path))?;
            contents
        } else {
            String::new()
        };

        tree.parse_index(&raw)?;
        tree.rewrite_index()?;

        for id in tree.all_ids() {
            tree.load_manifest(id)?;
        }

        Ok(tree)
    }

    fn all_ids(&self) -> Vec<CollectionId> {
        (0..self.arena.len())
            .filter(|i| self.arena[*i].is_some())
            .map(CollectionId)
            .collect()
    }

    fn get(&self, id: CollectionId) -> &Collection {
        self.arena[id.0]
            .as_ref()
            .expect("CollectionId referenced a freed slot")
    }

    fn get_mut(&mut self, id: CollectionId) -> &mut Collection {
        self.arena[id.0]
            .as_mut()
            .expect("CollectionId referenced a freed slot")
    }

    fn push(&mut self, collection: Collection) -> CollectionId {
        self.arena.push(Some(collection));
        CollectionId(self.arena.len() - 1)
    }

    fn dir_for(&self, id: CollectionId) -> PathBuf {
        self.db_dir.join(&self.get(id).path)
    }

    /// Parse the pre-order `name:numSubColls` forest encoding.
    fn parse_index(&mut self, raw: &str) -> CustodianResult<()> {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        let mut idx = 0usize;
        while idx < tokens.len() {
            let id = self.parse_node(&tokens, &mut idx, None, "")?;
            self.roots.push(id);
        }
        Ok(())
    }

    fn parse_node(
        &mut self,
        tokens: &[&str],
        idx: &mut usize,
        parent: Option<CollectionId>,
        parent_path: &str,
    ) -> CustodianResult<CollectionId> {
        let token = tokens
            .get(*idx)
            .ok_or_else(|| ServerError::Parse("truncated formattedCollections".into()))?;
        let (name, count_str) = token
            .split_once(':')
            .ok_or_else(|| ServerError::Parse(format!("malformed index token: {token}")))?;
        let num_subs: usize = count_str
            .parse()
            .map_err(|_| ServerError::Parse(format!("malformed child count: {token}")))?;
        *idx += 1;

        let collection = match parent {
            None => Collection::new_root(name.to_string()),
            Some(p) => Collection::new_child(name.to_string(), p, parent_path),
        };
        let path = collection.path.clone();
        let id = self.push(collection);

        let mut children = Vec::with_capacity(num_subs);
        for _ in 0..num_subs {
            children.push(self.parse_node(tokens, idx, Some(id), &path)?);
        }
        self.get_mut(id).subcollections = children;
        Ok(id)
    }

    fn rewrite_index(&self) -> CustodianResult<()> {
        let mut out = String::new();
        for root in &self.roots {
            self.write_node(*root, &mut out);
        }
        let path = self.db_dir.join(FORMATTED_COLLECTIONS);
        fs::write(&path, out).map_err(|_| ServerError::FileWrite(path))
    }

    fn write_node(&self, id: CollectionId, out: &mut String) {
        let collection = self.get(id);
        out.push_str(&format!(
            "{}:{} ",
            collection.name,
            collection.subcollections.len()
        ));
        for child in collection.subcollections.clone() {
            self.write_node(child, out);
        }
    }

    fn load_manifest(&mut self, id: CollectionId) -> CustodianResult<()> {
        let manifest_path = self.dir_for(id).join(MANIFEST);
        if !manifest_path.exists() {
            fs::create_dir_all(self.dir_for(id)).map_err(|_| ServerError::FileOpen(self.dir_for(id)))?;
            fs::write(&manifest_path, "size:0").map_err(|_| ServerError::FileWrite(manifest_path))?;
            return Ok(());
        }
        let raw =
            fs::read_to_string(&manifest_path).map_err(|_| ServerError::FileRead(manifest_path))?;
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        let (header, rest) = tokens
            .split_first()
            .ok_or_else(|| ServerError::Parse("empty Manifest".into()))?;
        let (_, count_str) = header
            .split_once(':')
            .ok_or_else(|| ServerError::Parse(format!("malformed Manifest header: {header}")))?;
        let size: usize = count_str
            .parse()
            .map_err(|_| ServerError::Parse(format!("malformed Manifest size: {header}")))?;
        let items: CustodianResult<Vec<Item>> = rest
            .iter()
            .take(size)
            .map(|tok| Item::from_manifest_token(tok))
            .collect();
        self.get_mut(id).items = items?;
        Ok(())
    }

    fn rewrite_manifest(&self, id: CollectionId) -> CustodianResult<()> {
        let collection = self.get(id);
        let mut out = format!("size:{}", collection.items.len());
        for item in &collection.items {
            out.push(' ');
            out.push_str(&item.to_manifest_token());
        }
        let manifest_path = self.dir_for(id).join(MANIFEST);
        fs::write(&manifest_path, out).map_err(|_| ServerError::FileWrite(manifest_path))
    }

    /// Split `path` on `/` and descend by name from a matching root.
    pub fn find_collection(&self, path: &str) -> Option<CollectionId> {
        let mut segments = path.split('/');
        let first = segments.next()?;
        let mut current = self
            .roots
            .iter()
            .copied()
            .find(|id| self.get(*id).name == first)?;
        for segment in segments {
            current = self
                .get(current)
                .subcollections
                .iter()
                .copied()
                .find(|id| self.get(*id).name == segment)?;
        }
        Some(current)
    }

    pub fn collection_exists(&self, path: &str) -> bool {
        self.find_collection(path).is_some()
    }

    pub fn item_exists(&self, item_path: &str) -> bool {
        let Ok((coll_path, name)) = split_item_path(item_path) else {
            return false;
        };
        self.find_collection(coll_path)
            .map(|id| self.get(id).find_item(name).is_some())
            .unwrap_or(false)
    }

    /// Create a top-level collection directly as a new arena root. Used
    /// only by server bootstrap (admin context); regular client requests
    /// go through [`CollectionTree::add_collection`], which rejects
    /// single-segment (root-relative) paths.
    pub fn add_root_collection(&mut self, name: &str) -> CustodianResult<()> {
        validate_collection_path(name)?;
        if name.contains('/') {
            return Err(ServerError::PathInval(name.to_string()));
        }
        if self.roots.iter().any(|id| self.get(*id).name == name) {
            return Ok(());
        }
        let id = self.push(Collection::new_root(name.to_string()));
        self.roots.push(id);
        fs::create_dir_all(self.dir_for(id)).map_err(|_| ServerError::FileOpen(self.dir_for(id)))?;
        fs::write(self.dir_for(id).join(MANIFEST), "size:0")
            .map_err(|_| ServerError::FileWrite(self.dir_for(id).join(MANIFEST)))?;
        self.rewrite_index()
    }

    pub fn add_collection(&mut self, path: &str) -> CustodianResult<()> {
        validate_collection_path(path)?;
        if !path.contains('/') {
            return Err(ServerError::PathInval(path.to_string()));
        }
        if self.collection_exists(path) {
            return Ok(());
        }
        let idx = path.rfind('/').expect("checked above: path contains '/'");
        let (parent_path, name) = (&path[..idx], &path[idx + 1..]);
        let parent_id = self
            .find_collection(parent_path)
            .ok_or_else(|| ServerError::ParentCollInval(parent_path.to_string()))?;

        let collection = Collection::new_child(name.to_string(), parent_id, parent_path);
        let id = self.push(collection);
        self.get_mut(parent_id).subcollections.push(id);

        fs::create_dir_all(self.dir_for(id)).map_err(|_| ServerError::FileOpen(self.dir_for(id)))?;
        fs::write(self.dir_for(id).join(MANIFEST), "size:0")
            .map_err(|_| ServerError::FileWrite(self.dir_for(id).join(MANIFEST)))?;
        self.rewrite_index()
    }

    fn collect_subtree(&self, id: CollectionId, out: &mut Vec<CollectionId>) {
        out.push(id);
        for child in self.get(id).subcollections.clone() {
            self.collect_subtree(child, out);
        }
    }

    pub fn delete_collection(&mut self, path: &str) -> CustodianResult<()> {
        validate_collection_path(path)?;
        let id = self
            .find_collection(path)
            .ok_or_else(|| ServerError::PathInval(path.to_string()))?;

        match self.get(id).parent {
            Some(parent) => self.get_mut(parent).subcollections.retain(|c| *c != id),
            None => self.roots.retain(|c| *c != id),
        }

        let dir = self.dir_for(id);
        let mut subtree = Vec::new();
        self.collect_subtree(id, &mut subtree);
        for descendant in subtree {
            self.arena[descendant.0] = None;
        }

        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|_| ServerError::FileWrite(dir))?;
        }
        self.rewrite_index()
    }

    /// Write payload then rewrite the Manifest, in that order, so a
    /// surviving Manifest never references missing bytes.
    pub fn replace_item(
        &mut self,
        item_path: &str,
        owner: Option<String>,
        perm: Permission,
        data_type: DataType,
        data: Vec<u8>,
    ) -> CustodianResult<()> {
        let (coll_path, name) = split_item_path(item_path)?;
        let coll_id = self
            .find_collection(coll_path)
            .ok_or_else(|| ServerError::PathInval(item_path.to_string()))?;

        let existing_created_at = self
            .get(coll_id)
            .find_item(name)
            .map(|existing| existing.created_at);

        let mut item = Item::new(name.to_string(), owner, perm, data_type);
        item.set_data(data);
        if let Some(created_at) = existing_created_at {
            item.created_at = created_at;
        }

        let payload_path = crate::item::item_path(&self.dir_for(coll_id), name);
        item.write(&payload_path)?;

        let collection = self.get_mut(coll_id);
        match collection.find_item_index(name) {
            Some(existing_idx) => collection.items[existing_idx] = item,
            None => collection.items.push(item),
        }

        self.rewrite_manifest(coll_id)
    }

    pub fn delete_item(&mut self, item_path: &str) -> CustodianResult<()> {
        let (coll_path, name) = split_item_path(item_path)?;
        let coll_id = self
            .find_collection(coll_path)
            .ok_or_else(|| ServerError::PathInval(item_path.to_string()))?;
        let existing_idx = self
            .get(coll_id)
            .find_item_index(name)
            .ok_or_else(|| ServerError::PathInval(item_path.to_string()))?;

        let payload_path = crate::item::item_path(&self.dir_for(coll_id), name);
        if payload_path.exists() {
            fs::remove_file(&payload_path).map_err(|_| ServerError::FileWrite(payload_path))?;
        }
        self.get_mut(coll_id).items.remove(existing_idx);
        self.rewrite_manifest(coll_id)
    }

    /// 0 bytes on any failure, missing item, or `offset >= data_size`.
    pub fn get_item_data(&mut self, item_path: &str, offset: u64, buf: &mut [u8]) -> usize {
        let Ok((coll_path, name)) = split_item_path(item_path) else {
            return 0;
        };
        let Some(coll_id) = self.find_collection(coll_path) else {
            return 0;
        };
        let dir = self.dir_for(coll_id);
        let Some(item) = self.get_mut(coll_id).find_item_mut(name) else {
            return 0;
        };
        if !item.is_loaded() {
            let payload_path = crate::item::item_path(&dir, name);
            if item.load(&payload_path).is_err() {
                return 0;
            }
        }
        item.read_into(offset, buf)
    }

    /// Look up an item's metadata (permission/owner) without forcing a
    /// payload load. Used by `AccessManager` for the ownership check on
    /// private reads.
    pub fn find_item_meta(&self, item_path: &str) -> Option<(Permission, Option<String>)> {
        let (coll_path, name) = split_item_path(item_path).ok()?;
        let coll_id = self.find_collection(coll_path)?;
        let item = self.get(coll_id).find_item(name)?;
        Some((item.perm, item.owner.clone()))
    }

    /// The item's declared `data_size`, from the Manifest, without loading
    /// its payload. Lets callers size a read buffer exactly instead of
    /// over-allocating for the protocol's maximum item size.
    pub fn item_data_size(&self, item_path: &str) -> Option<u64> {
        let (coll_path, name) = split_item_path(item_path).ok()?;
        let coll_id = self.find_collection(coll_path)?;
        Some(self.get(coll_id).find_item(name)?.data_size)
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }
}
