use crate::log::*;
use rustc_hash::FxHashMap as HashMap;
use std::sync::{Arc, Mutex};

/// Identity of a registered backend: where to forward and which path prefix it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingRule {
  /// opaque unique key chosen by the registrant
  pub backend_id: String,
  /// DNS name or literal address of the backend
  pub target_host: String,
  /// non-zero port of the backend
  pub target_port: u16,
  /// literal path prefix owned by the backend, non-empty
  pub path_pattern: String,
}

impl ForwardingRule {
  pub fn new(backend_id: &str, target_host: &str, target_port: u16, path_pattern: &str) -> Self {
    Self {
      backend_id: backend_id.to_string(),
      target_host: target_host.to_string(),
      target_port,
      path_pattern: path_pattern.to_string(),
    }
  }
}

/// Process-wide mapping of backend id to forwarding rule, shared by every session.
/// Mutated only by the registration handler, read by every forwarder.
#[derive(Debug, Default)]
pub struct BackendRegistry {
  inner: Mutex<HashMap<String, Arc<ForwardingRule>>>,
}

impl BackendRegistry {
  /// Insert or replace the rule for `rule.backend_id`. Idempotent for identical payloads,
  /// last-writer-wins for the same id.
  pub fn register(&self, rule: ForwardingRule) {
    let mut backends = self.inner.lock().unwrap();
    info!(
      "Registered backend: {} -> {}:{} pattern: {}",
      rule.backend_id, rule.target_host, rule.target_port, rule.path_pattern
    );
    backends.insert(rule.backend_id.clone(), Arc::new(rule));
  }

  /// Remove the rule if present. An absent id is a no-op.
  pub fn unregister(&self, backend_id: &str) {
    let mut backends = self.inner.lock().unwrap();
    if backends.remove(backend_id).is_some() {
      info!("Unregistered backend: {}", backend_id);
    }
  }

  /// Return the rule whose `path_pattern` is a prefix of `path`.
  /// When several rules match, the longest pattern wins. Registrants are expected
  /// to choose non-overlapping prefixes; the tie-break exists for the rest.
  /// The matched rule is cloned out so the lock is never held across I/O.
  pub fn find(&self, path: &str) -> Option<Arc<ForwardingRule>> {
    let backends = self.inner.lock().unwrap();
    backends
      .values()
      .filter(|rule| path.starts_with(rule.path_pattern.as_str()))
      .max_by_key(|rule| rule.path_pattern.len())
      .cloned()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().unwrap().is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rule(id: &str, port: u16, pattern: &str) -> ForwardingRule {
    ForwardingRule::new(id, "127.0.0.1", port, pattern)
  }

  #[test]
  fn find_returns_registered_rule_for_matching_prefix() {
    let registry = BackendRegistry::default();
    registry.register(rule("t1", 9999, "/api/"));

    let found = registry.find("/api/users").unwrap();
    assert_eq!(found.backend_id, "t1");
    assert_eq!(found.target_port, 9999);

    // every path beginning with the pattern matches
    assert!(registry.find("/api/").is_some());
    assert!(registry.find("/api/deeply/nested").is_some());
  }

  #[test]
  fn find_misses_unmatched_path() {
    let registry = BackendRegistry::default();
    registry.register(rule("t1", 9999, "/api/"));
    assert!(registry.find("/other").is_none());
  }

  #[test]
  fn longest_prefix_wins_on_overlap() {
    let registry = BackendRegistry::default();
    registry.register(rule("catchall", 9000, "/"));
    registry.register(rule("api", 9001, "/api/"));

    assert_eq!(registry.find("/api/x").unwrap().backend_id, "api");
    assert_eq!(registry.find("/index.html").unwrap().backend_id, "catchall");
  }

  #[test]
  fn reregistration_is_last_writer_wins() {
    let registry = BackendRegistry::default();
    registry.register(rule("t1", 9999, "/a/"));
    registry.register(rule("t1", 7777, "/b/"));

    assert!(registry.find("/a/x").is_none());
    assert_eq!(registry.find("/b/x").unwrap().target_port, 7777);
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn unregister_removes_rule_and_tolerates_absent_id() {
    let registry = BackendRegistry::default();
    registry.register(rule("t1", 9999, "/"));
    registry.unregister("t1");
    assert!(registry.find("/anything").is_none());

    // no-op on a missing id
    registry.unregister("t1");
    registry.unregister("never-registered");
    assert!(registry.is_empty());
  }

  #[test]
  fn identical_registrations_leave_single_entry() {
    let registry = BackendRegistry::default();
    registry.register(rule("t1", 9999, "/"));
    registry.register(rule("t1", 9999, "/"));
    assert_eq!(registry.len(), 1);
  }
}
