//! AccessManager: the sole entry point for data operations. Consults the
//! registered database's `RulesEngine` before ever touching its
//! `CollectionTree`.

use crate::error::{CustodianResult, ServerError};
use crate::item::{DataType, Permission};
use crate::rules::{PermsRequested, RequestContext, RulesEngine};
use crate::tree::CollectionTree;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

struct Database {
    tree: Mutex<CollectionTree>,
    rules: RulesEngine,
}

/// Registry mapping database name to its `(CollectionTree, RulesEngine)`
/// pair. The registry itself is immutable after startup (databases are
/// added only during bootstrap); each database's tree is guarded by its
/// own mutex.
pub struct AccessManager {
    databases: HashMap<String, Database>,
}

impl AccessManager {
    pub fn new() -> Self {
        Self {
            databases: HashMap::new(),
        }
    }

    /// Idempotent by name. Parses the rules file eagerly; a parse failure
    /// aborts the add.
    pub fn add_db(
        &mut self,
        name: &str,
        db_dir: impl Into<std::path::PathBuf>,
        rules_path: &Path,
    ) -> CustodianResult<()> {
        if self.databases.contains_key(name) {
            return Ok(());
        }
        let rules = RulesEngine::load_file(rules_path)?;
        let tree = CollectionTree::open(db_dir)?;
        self.databases.insert(
            name.to_string(),
            Database {
                tree: Mutex::new(tree),
                rules,
            },
        );
        Ok(())
    }

    /// Run `admin_fn` against a database's tree with an admin request
    /// context, bypassing rules evaluation. Used only by server bootstrap.
    pub fn with_admin_tree<F, R>(&self, db_name: &str, admin_fn: F) -> CustodianResult<R>
    where
        F: FnOnce(&mut CollectionTree) -> CustodianResult<R>,
    {
        let db = self
            .databases
            .get(db_name)
            .ok_or_else(|| ServerError::NoDb(db_name.to_string()))?;
        let mut tree = db.tree.lock();
        admin_fn(&mut tree)
    }

    fn lookup(&self, db_name: &str) -> CustodianResult<&Database> {
        self.databases
            .get(db_name)
            .ok_or_else(|| ServerError::NoDb(db_name.to_string()))
    }

    /// Whether the rules engine grants `wants` on `path` for `ctx`.
    fn rules_allow(
        &self,
        db: &Database,
        path: &str,
        wants: PermsRequested,
        ctx: &RequestContext,
    ) -> bool {
        let mut ctx = ctx.clone();
        ctx.perms_requested = wants;
        db.rules.has_perms(path, &ctx)
    }

    /// Same as `rules_allow`, but fails the operation outright with
    /// `NO_PERMS` when denied. Used by write operations, where a denial is
    /// reported as an error rather than silently producing an empty result.
    fn check(
        &self,
        db: &Database,
        path: &str,
        wants: PermsRequested,
        ctx: &RequestContext,
    ) -> CustodianResult<()> {
        if !self.rules_allow(db, path, wants, ctx) {
            return Err(ServerError::NoPerms);
        }
        Ok(())
    }

    /// Read `path`'s data into `buf` starting at `offset`. A rules denial or
    /// a `PRIVATE`-item ownership mismatch (`item.owner != ctx.uid`) both
    /// return `Ok(0)` rather than an error: a denied read must not leak
    /// whether the path exists, its size, or its contents into the caller's
    /// buffer.
    pub fn get_item_data(
        &self,
        db_name: &str,
        path: &str,
        ctx: &RequestContext,
        offset: u64,
        buf: &mut [u8],
    ) -> CustodianResult<usize> {
        let db = self.lookup(db_name)?;
        if !self.rules_allow(db, path, PermsRequested::Read, ctx) {
            return Ok(0);
        }

        let mut tree = db.tree.lock();
        if let Some((perm, owner)) = tree.find_item_meta(path) {
            if perm == Permission::Private && owner.as_deref() != ctx.uid.as_deref() {
                return Ok(0);
            }
        }
        Ok(tree.get_item_data(path, offset, buf))
    }

    /// The item's declared size, subject to the same read check and
    /// ownership gate as `get_item_data`. Lets a caller size a read buffer
    /// exactly instead of over-allocating for the protocol's maximum item
    /// size; returns 0 wherever `get_item_data` would also return 0 bytes.
    pub fn item_data_size(
        &self,
        db_name: &str,
        path: &str,
        ctx: &RequestContext,
    ) -> CustodianResult<u64> {
        let db = self.lookup(db_name)?;
        if !self.rules_allow(db, path, PermsRequested::Read, ctx) {
            return Ok(0);
        }

        let tree = db.tree.lock();
        let Some((perm, owner)) = tree.find_item_meta(path) else {
            return Ok(0);
        };
        if perm == Permission::Private && owner.as_deref() != ctx.uid.as_deref() {
            return Ok(0);
        }
        Ok(tree.item_data_size(path).unwrap_or(0))
    }

    pub fn replace_item(
        &self,
        db_name: &str,
        path: &str,
        ctx: &RequestContext,
        owner: Option<String>,
        perm: Permission,
        data_type: DataType,
        data: Vec<u8>,
    ) -> CustodianResult<()> {
        let db = self.lookup(db_name)?;
        self.check(db, path, PermsRequested::Write, ctx)?;
        let mut tree = db.tree.lock();
        tree.replace_item(path, owner, perm, data_type, data)
    }

    pub fn delete_item(&self, db_name: &str, path: &str, ctx: &RequestContext) -> CustodianResult<()> {
        let db = self.lookup(db_name)?;
        self.check(db, path, PermsRequested::Write, ctx)?;
        let mut tree = db.tree.lock();
        tree.delete_item(path)
    }

    pub fn add_collection(
        &self,
        db_name: &str,
        path: &str,
        ctx: &RequestContext,
    ) -> CustodianResult<()> {
        let db = self.lookup(db_name)?;
        self.check(db, path, PermsRequested::Write, ctx)?;
        let mut tree = db.tree.lock();
        tree.add_collection(path)
    }

    pub fn delete_collection(
        &self,
        db_name: &str,
        path: &str,
        ctx: &RequestContext,
    ) -> CustodianResult<()> {
        let db = self.lookup(db_name)?;
        self.check(db, path, PermsRequested::Write, ctx)?;
        let mut tree = db.tree.lock();
        tree.delete_collection(path)
    }
}

impl Default for AccessManager {
    fn default() -> Self {
        Self::new()
    }
}
