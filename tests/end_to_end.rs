//! End-to-end scenarios exercised through the public API surface
//! (`AccessManager` + `AccountManager`), not the internal tree directly.

use custodian::access::AccessManager;
use custodian::account::AccountManager;
use custodian::item::{DataType, Permission};
use custodian::rules::{PermsRequested, RequestContext};
use custodian::tree::CollectionTree;
use tempfile::tempdir;

fn bootstrap(rules: &str) -> (tempfile::TempDir, AccessManager) {
    let dir = tempdir().unwrap();
    let rules_path = dir.path().join("db.rules");
    std::fs::write(&rules_path, rules).unwrap();
    let mut access = AccessManager::new();
    access.add_db("db", dir.path().join("tree"), &rules_path).unwrap();
    access
        .with_admin_tree("db", |tree| tree.add_root_collection("public"))
        .unwrap();
    access
        .with_admin_tree("db", |tree| tree.add_root_collection("users"))
        .unwrap();
    (dir, access)
}

#[test]
fn fresh_server_create_read_survives_restart() {
    let dir = tempdir().unwrap();
    let rules_path = dir.path().join("db.rules");
    std::fs::write(&rules_path, "match public/{item} { allow rw }").unwrap();
    let tree_dir = dir.path().join("tree");

    {
        let mut access = AccessManager::new();
        access.add_db("db", &tree_dir, &rules_path).unwrap();
        access
            .with_admin_tree("db", |tree| tree.add_root_collection("public"))
            .unwrap();
        let ctx = RequestContext::anonymous(PermsRequested::Write);
        access
            .replace_item("db", "public/hello", &ctx, None, Permission::Public, DataType::Text, b"hi".to_vec())
            .unwrap();
    }

    // A fresh AccessManager reopening the same directory sees the same state.
    let mut reopened = AccessManager::new();
    reopened.add_db("db", &tree_dir, &rules_path).unwrap();
    let ctx = RequestContext::anonymous(PermsRequested::Read);
    let mut buf = [0u8; 2];
    let n = reopened.get_item_data("db", "public/hello", &ctx, 0, &mut buf).unwrap();
    assert_eq!(n, 2);
    assert_eq!(&buf, b"hi");
}

#[test]
fn cross_user_privacy_hides_others_private_items() {
    let (_dir, access) = bootstrap("match users/{uid}/{item} { allow rw: if uid == auth.uid }");

    let mut alice = RequestContext::anonymous(PermsRequested::Write);
    alice.uid = Some("alice".to_string());
    access
        .replace_item("db", "users/alice/diary", &alice, Some("alice".to_string()), Permission::Private, DataType::Text, b"secret".to_vec())
        .unwrap();

    let mut bob = RequestContext::anonymous(PermsRequested::Read);
    bob.uid = Some("bob".to_string());
    let mut bob_buf = [0u8; 8];
    let n = access
        .get_item_data("db", "users/alice/diary", &bob, 0, &mut bob_buf)
        .unwrap();
    assert_eq!(n, 0, "bob has no matching rule for alice's namespace");
    assert_eq!(bob_buf, [0u8; 8]);

    let mut alice_read = RequestContext::anonymous(PermsRequested::Read);
    alice_read.uid = Some("alice".to_string());
    let mut buf = [0u8; 8];
    let n = access.get_item_data("db", "users/alice/diary", &alice_read, 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"secret");
}

#[test]
fn public_read_private_write_scenario() {
    let (_dir, access) = bootstrap(
        "match public/{item} { allow r; allow w: if auth.uid == \"admin\" }",
    );
    let admin = RequestContext::admin();
    access
        .replace_item("db", "public/notice", &admin, None, Permission::Public, DataType::Text, b"welcome".to_vec())
        .unwrap();

    let anon = RequestContext::anonymous(PermsRequested::Read);
    let mut buf = [0u8; 16];
    let n = access.get_item_data("db", "public/notice", &anon, 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"welcome");

    let mut rando = RequestContext::anonymous(PermsRequested::Write);
    rando.uid = Some("rando".to_string());
    let err = access.replace_item("db", "public/notice", &rando, None, Permission::Public, DataType::Text, b"defaced".to_vec());
    assert!(err.is_err());
}

#[test]
fn malformed_path_rejected_before_rules_are_consulted() {
    let (_dir, access) = bootstrap("match a { allow rw }");
    let ctx = RequestContext::admin();
    let err = access.replace_item("db", "//double/slash", &ctx, None, Permission::Public, DataType::Text, b"x".to_vec());
    assert!(err.is_err());
}

#[test]
fn duplicate_account_creation_rejected() {
    let dir = tempdir().unwrap();
    let accounts = AccountManager::open(dir.path()).unwrap();
    accounts.create_account("alice", "alice@example.com", "pw1").unwrap();
    let err = accounts.create_account("alice", "other@example.com", "pw2").unwrap_err();
    assert!(matches!(err, custodian::error::ServerError::DuplicateAccount));
}

#[test]
fn rules_first_match_ordering_prefers_earlier_rule() {
    let (_dir, access) = bootstrap(
        "match a/{x} { allow rw: if x == \"open\" }\nmatch a/{x} { allow r }",
    );
    let admin = RequestContext::admin();
    access
        .replace_item("db", "a/open", &admin, None, Permission::Public, DataType::Text, b"1".to_vec())
        .unwrap();
    access
        .replace_item("db", "a/closed", &admin, None, Permission::Public, DataType::Text, b"2".to_vec())
        .unwrap();

    let writer = RequestContext::anonymous(PermsRequested::Write);
    assert!(access
        .replace_item("db", "a/open", &writer, None, Permission::Public, DataType::Text, b"3".to_vec())
        .is_ok());
    assert!(access
        .replace_item("db", "a/closed", &writer, None, Permission::Public, DataType::Text, b"3".to_vec())
        .is_err());

    let reader = RequestContext::anonymous(PermsRequested::Read);
    let mut buf = [0u8; 1];
    assert!(access.get_item_data("db", "a/closed", &reader, 0, &mut buf).is_ok());
}

#[test]
fn tree_survives_process_restart_via_formatted_collections() {
    let dir = tempdir().unwrap();
    {
        let mut tree = CollectionTree::open(dir.path()).unwrap();
        tree.add_root_collection("users").unwrap();
        tree.add_collection("users/alice").unwrap();
    }
    let reopened = CollectionTree::open(dir.path()).unwrap();
    assert!(reopened.collection_exists("users/alice"));
}
