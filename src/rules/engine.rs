//! Evaluates access decisions against a parsed, immutable rule set.

use super::parser::{parse_rules, CompareOp, Param, PathSegment, Rule};
use crate::error::CustodianResult;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Request identity and the access mode being attempted.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub uid: Option<String>,
    pub perms_requested: PermsRequested,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermsRequested {
    Read,
    Write,
    ReadWrite,
}

impl PermsRequested {
    fn as_grants(self) -> super::parser::Grants {
        match self {
            PermsRequested::Read => super::parser::Grants {
                read: true,
                write: false,
            },
            PermsRequested::Write => super::parser::Grants {
                read: false,
                write: true,
            },
            PermsRequested::ReadWrite => super::parser::Grants {
                read: true,
                write: true,
            },
        }
    }
}

impl RequestContext {
    pub fn anonymous(perms_requested: PermsRequested) -> Self {
        Self {
            uid: None,
            perms_requested,
            is_admin: false,
        }
    }

    pub fn admin() -> Self {
        Self {
            uid: None,
            perms_requested: PermsRequested::ReadWrite,
            is_admin: true,
        }
    }
}

/// Parsed, immutable after construction. `has_perms` is pure: it depends
/// only on `(path, rules, ctx)`.
pub struct RulesEngine {
    rules: Vec<Rule>,
}

impl RulesEngine {
    pub fn load_file(path: &Path) -> CustodianResult<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|_| crate::error::ServerError::FileOpen(path.to_path_buf()))?;
        Self::load_str(&contents)
    }

    pub fn load_str(contents: &str) -> CustodianResult<Self> {
        let rules = parse_rules(contents)?;
        Ok(Self { rules })
    }

    /// Admin contexts short-circuit to true. Otherwise: first matching
    /// rule (in declaration order), first passing prereq (in order)
    /// whose grants cover the requested mode, wins.
    pub fn has_perms(&self, path: &str, ctx: &RequestContext) -> bool {
        if ctx.is_admin {
            return true;
        }
        let wants = ctx.perms_requested.as_grants();
        let segments: Vec<&str> = path.split('/').collect();

        for rule in &self.rules {
            let Some(bindings) = match_pattern(&rule.pattern, &segments) else {
                continue;
            };
            for prereq in &rule.prereqs {
                let passes = match &prereq.check {
                    None => true,
                    Some(check) => {
                        let lhs = resolve_param(&check.lhs, &bindings, ctx);
                        let rhs = resolve_param(&check.rhs, &bindings, ctx);
                        compare(&lhs, &rhs, check.op)
                    }
                };
                if passes && prereq.grants.covers(wants) {
                    return true;
                }
            }
        }
        false
    }
}

/// Matches if `path.len >= pattern.len` and every literal segment equals
/// the corresponding path segment; extra trailing path segments are
/// allowed. Returns the variable bindings on success.
fn match_pattern<'a>(
    pattern: &[PathSegment],
    path_segments: &[&'a str],
) -> Option<HashMap<String, &'a str>> {
    if path_segments.len() < pattern.len() {
        return None;
    }
    let mut bindings = HashMap::new();
    for (seg, value) in pattern.iter().zip(path_segments.iter()) {
        match seg {
            PathSegment::Literal(lit) => {
                if lit != value {
                    return None;
                }
            }
            PathSegment::Variable(name) => {
                bindings.insert(name.clone(), *value);
            }
        }
    }
    Some(bindings)
}

fn resolve_param(param: &Param, bindings: &HashMap<String, &str>, ctx: &RequestContext) -> String {
    match param {
        Param::Literal(s) => s.clone(),
        Param::PathVar(name) => bindings.get(name).copied().unwrap_or("").to_string(),
        Param::AuthUid => ctx.uid.clone().unwrap_or_default(),
    }
}

fn compare(lhs: &str, rhs: &str, op: CompareOp) -> bool {
    let ordering = lhs.cmp(rhs);
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uid: Option<&str>, perms: PermsRequested) -> RequestContext {
        RequestContext {
            uid: uid.map(String::from),
            perms_requested: perms,
            is_admin: false,
        }
    }

    #[test]
    fn admin_short_circuits() {
        let engine = RulesEngine::load_str("match a { allow r }").unwrap();
        assert!(engine.has_perms("nowhere", &RequestContext::admin()));
    }

    #[test]
    fn owner_only_write_via_path_variable() {
        let engine =
            RulesEngine::load_str("match users/{uid} { allow rw: if uid == auth.uid }").unwrap();
        let alice = ctx(Some("alice"), PermsRequested::Write);
        assert!(engine.has_perms("users/alice/note", &alice));

        let bob = ctx(Some("bob"), PermsRequested::Write);
        assert!(!engine.has_perms("users/alice/note", &bob));
    }

    #[test]
    fn public_read_private_write_scenario() {
        let engine = RulesEngine::load_str(
            "match public/{item} { allow r; allow w: if auth.uid == \"admin\" }",
        )
        .unwrap();
        let anon = ctx(None, PermsRequested::Read);
        assert!(engine.has_perms("public/hello", &anon));

        let non_admin = ctx(Some("bob"), PermsRequested::Write);
        assert!(!engine.has_perms("public/hello", &non_admin));

        let admin_user = ctx(Some("admin"), PermsRequested::Write);
        assert!(engine.has_perms("public/hello", &admin_user));
    }

    #[test]
    fn first_match_wins_over_rules_and_prereqs() {
        let engine = RulesEngine::load_str(
            "match a/{x} { allow rw: if x == \"open\" }\nmatch a/{x} { allow r }",
        )
        .unwrap();
        let writer = ctx(None, PermsRequested::Write);
        assert!(!engine.has_perms("a/closed", &writer));
        assert!(engine.has_perms("a/open", &writer));

        let reader = ctx(None, PermsRequested::Read);
        assert!(engine.has_perms("a/closed", &reader));
    }

    #[test]
    fn extra_trailing_segments_are_governed_by_parent_rule() {
        let engine =
            RulesEngine::load_str("match users/{uid} { allow rw: if uid == auth.uid }").unwrap();
        let alice = ctx(Some("alice"), PermsRequested::Read);
        assert!(engine.has_perms("users/alice/notes/deep/path", &alice));
    }

    #[test]
    fn no_matching_rule_denies() {
        let engine = RulesEngine::load_str("match a { allow r }").unwrap();
        assert!(!engine.has_perms("b", &ctx(None, PermsRequested::Read)));
    }

    #[test]
    fn evaluation_is_pure_and_repeatable() {
        let engine = RulesEngine::load_str("match a/{x} { allow r: if x == \"y\" }").unwrap();
        let c = ctx(None, PermsRequested::Read);
        let first = engine.has_perms("a/y", &c);
        let second = engine.has_perms("a/y", &c);
        assert_eq!(first, second);
    }
}
