//! Custodian: a small multi-tenant content server.
//!
//! Items live in typed, permissioned collections; every read and write
//! passes through a database's declarative access rules before touching
//! its on-disk tree.

pub mod access;
pub mod account;
pub mod collection;
pub mod config;
pub mod error;
pub mod item;
pub mod net;
pub mod protocol;
pub mod rules;
pub mod session;
pub mod tree;

pub use access::AccessManager;
pub use account::AccountManager;
pub use config::{ConfigBuilder, ServerConfig};
pub use error::{CustodianResult, ServerError};
pub use session::SessionManager;
pub use tree::CollectionTree;
