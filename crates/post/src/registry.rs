use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use courier_core::Callable;
use tracing::debug;

use crate::error::PostError;

/// Name → callable table shared by the workers of one pool.
///
/// Populated during setup; lookups during execution only take the read lock.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Callable>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callable` under `name`. Names can be registered only once.
    pub fn register(&self, name: impl Into<String>, callable: Callable) -> Result<(), PostError> {
        let name = name.into();
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&name) {
            return Err(PostError::AlreadyRegistered(name));
        }
        debug!(function = %name, "registered function");
        entries.insert(name, callable);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Callable> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = Registry::new();
        registry.register("ping", Callable::dynamic(|| ())).unwrap();
        let err = registry
            .register("ping", Callable::dynamic(|| ()))
            .unwrap_err();
        assert!(matches!(err, PostError::AlreadyRegistered(ref n) if n == "ping"));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("ping"));
        assert!(registry.get("pong").is_none());
    }
}
