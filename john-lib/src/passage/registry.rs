use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::CipherMethod;

use super::types::{Passage, PassageSpec};

/// The live set of passages this node will authenticate against.
///
/// Readers (the accept loop, trial decryption) take a cheap [`Arc`] snapshot
/// via [`Self::snapshot`] and never block a writer; a `SyncPassages` update
/// swaps in a brand new map rather than mutating one in place, so a reader
/// mid-snapshot never observes a torn update.
pub struct PassageRegistry {
    passages: ArcSwap<HashMap<String, Arc<Passage>>>,
    default_method: CipherMethod,
}

impl PassageRegistry {
    pub fn new(initial: Vec<Passage>, default_method: CipherMethod) -> Self {
        let map = initial.into_iter().map(|p| (p.key().to_string(), Arc::new(p))).collect();
        Self { passages: ArcSwap::from_pointee(map), default_method }
    }

    /// A consistent point-in-time view of the registry. Cheap to take and
    /// safe to hold across an `await`.
    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<Passage>>> {
        self.passages.load_full()
    }

    /// The bootstrap manager passage, if the current snapshot still has one.
    pub fn manager(&self) -> Option<Arc<Passage>> {
        self.snapshot().values().find(|p| p.is_manager()).cloned()
    }

    /// Applies a `SyncPassages` update: passages present in `incoming` but
    /// missing from the current set are added, passages present now but
    /// missing from `incoming` are removed, and passages in both are
    /// replaced with the incoming definition. The manager passage is never
    /// removed by this, and every incoming entry is forced to
    /// [`super::Role::Client`] regardless of what it claims — see
    /// [`Passage::from_spec`].
    ///
    /// Returns `(added_or_replaced, removed)` counts for logging.
    pub fn sync(&self, incoming: &[PassageSpec]) -> (usize, usize) {
        let current = self.snapshot();
        let manager = current.values().find(|p| p.is_manager()).cloned();
        let manager_key = manager.as_ref().map(|m| m.key().to_string());

        let mut next: HashMap<String, Arc<Passage>> = HashMap::with_capacity(incoming.len() + 1);
        if let (Some(key), Some(manager)) = (manager_key.as_ref(), manager.as_ref()) {
            next.insert(key.clone(), manager.clone());
        }

        let mut changed = 0;
        for spec in incoming {
            let candidate = Passage::from_spec(spec, self.default_method);
            if Some(candidate.key()) == manager_key.as_deref() {
                // an entry presenting the manager's own credential is never
                // allowed to overwrite it, whatever id or role it claims
                continue;
            }
            next.insert(candidate.key().to_string(), Arc::new(candidate));
            changed += 1;
        }

        let removed = current.keys().filter(|k| !next.contains_key(*k)).count();
        self.passages.store(Arc::new(next));
        (changed, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passage::types::{OutboundSpec, Role};

    /// Every test id maps to its own 32-byte key (the id's first byte
    /// repeated) so passages built from different ids never collide under
    /// credential-based keying unless the test means them to.
    fn key_for(id: &str) -> Vec<u8> {
        vec![id.as_bytes().first().copied().unwrap_or(0); 32]
    }

    fn passage(id: &str, role: Role) -> Passage {
        Passage::new(id, CipherMethod::Chacha20Poly1305, key_for(id), role, None)
    }

    fn spec(id: &str) -> PassageSpec {
        PassageSpec { id: id.to_string(), password: format!("pw-{id}"), method: None, manager: false, out: None }
    }

    #[test]
    fn sync_adds_and_removes() {
        let manager = passage("manager", Role::Manager);
        let old = passage("old", Role::Client);
        let manager_key = manager.key().to_string();
        let registry = PassageRegistry::new(vec![manager, old], CipherMethod::Chacha20Poly1305);

        let new_spec = spec("new");
        let new_key = Passage::from_spec(&new_spec, CipherMethod::Chacha20Poly1305).key().to_string();
        let (added, removed) = registry.sync(&[new_spec]);
        assert_eq!(added, 1);
        assert_eq!(removed, 1);
        let snap = registry.snapshot();
        assert!(snap.contains_key(&manager_key));
        assert!(snap.contains_key(&new_key));
        assert!(!snap.contains_key(&passage("old", Role::Client).key().to_string()));
    }

    #[test]
    fn sync_cannot_remove_the_manager() {
        let registry =
            PassageRegistry::new(vec![passage("manager", Role::Manager)], CipherMethod::Chacha20Poly1305);
        registry.sync(&[spec("client")]);
        assert!(registry.manager().is_some());
    }

    #[test]
    fn sync_cannot_grant_manager_role() {
        let registry =
            PassageRegistry::new(vec![passage("manager", Role::Manager)], CipherMethod::Chacha20Poly1305);
        let mut malicious = spec("attacker");
        malicious.manager = true;
        let attacker_key = Passage::from_spec(&malicious, CipherMethod::Chacha20Poly1305).key().to_string();
        registry.sync(&[malicious]);
        let snap = registry.snapshot();
        assert!(!snap[&attacker_key].is_manager());
    }

    #[test]
    fn sync_entry_claiming_managers_id_does_not_overwrite_manager() {
        let registry =
            PassageRegistry::new(vec![passage("manager", Role::Manager)], CipherMethod::Chacha20Poly1305);
        let mut imposter = spec("manager");
        imposter.password = "totally different password".into();
        imposter.out = Some(OutboundSpec {
            address: "1.2.3.4:1".parse().unwrap(),
            password: "x".into(),
            method: None,
        });
        registry.sync(&[imposter]);
        assert!(registry.manager().unwrap().is_manager());
    }

    /// The manager's own credential under a different id and `manager: false`
    /// must still collide with its key and be refused, since identity is the
    /// credential, not the claimed id.
    #[test]
    fn sync_with_same_credentials_as_manager_does_not_demote_it() {
        let manager_master_key = crate::crypto::derive_master_key(CipherMethod::Chacha20Poly1305, "mgr-pw");
        let manager = Passage::new(
            "manager",
            CipherMethod::Chacha20Poly1305,
            manager_master_key,
            Role::Manager,
            None,
        );
        let registry = PassageRegistry::new(vec![manager], CipherMethod::Chacha20Poly1305);

        let imposter = PassageSpec {
            id: "not-the-manager".into(),
            password: "mgr-pw".into(),
            method: None,
            manager: false,
            out: None,
        };
        let (added, _removed) = registry.sync(&[imposter]);
        assert_eq!(added, 0);
        assert!(registry.manager().unwrap().is_manager());
        assert_eq!(registry.snapshot().len(), 1);
    }

    /// Two specs presenting the same `(method, password)` under different
    /// ids are the same credential and collapse to one registry entry.
    #[test]
    fn sync_dedupes_specs_with_the_same_credentials_regardless_of_id() {
        let registry =
            PassageRegistry::new(vec![passage("manager", Role::Manager)], CipherMethod::Chacha20Poly1305);
        let a = PassageSpec { id: "a".into(), password: "shared".into(), method: None, manager: false, out: None };
        let b = PassageSpec { id: "b".into(), password: "shared".into(), method: None, manager: false, out: None };

        let (added, _removed) = registry.sync(&[a, b]);
        assert_eq!(added, 2);
        // both specs derive the same credential key, so only one survives
        // alongside the manager
        assert_eq!(registry.snapshot().len(), 2);
    }
}
