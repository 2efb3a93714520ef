//! ChardevRegistry: label-keyed store of live chardevs.
//!
//! The registry owns one `Arc` per chardev.  Frontends hold their own
//! `Arc`, so removing a label never tears down a chardev out from under a
//! bound frontend; [`ChardevRegistry::remove`] refuses while one is bound.
//!
//! A frontend that unbinds with `destroy = true` drops its chardev from the
//! registry that created it, through a weak back-reference held by the
//! chardev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chardev_core::{Backend, ChardevError, ReadinessHost};
use tracing::info;

use super::chardev::{Chardev, ReadPolicy};
use super::lock;

/// Shared map behind the registry handle.
#[derive(Default)]
pub(crate) struct RegistryInner {
    chardevs: Mutex<HashMap<String, Arc<Chardev>>>,
}

impl RegistryInner {
    /// Drops `label` without any in-use check.
    pub(crate) fn forget(&self, label: &str) -> Option<Arc<Chardev>> {
        lock(&self.chardevs).remove(label)
    }
}

/// Creates, looks up, and removes chardevs by label.
pub struct ChardevRegistry {
    inner: Arc<RegistryInner>,
    host: Arc<dyn ReadinessHost>,
    policy: ReadPolicy,
}

impl ChardevRegistry {
    /// Creates an empty registry whose chardevs use `host` by default.
    pub fn new(host: Arc<dyn ReadinessHost>) -> Self {
        Self::with_policy(host, ReadPolicy::default())
    }

    pub fn with_policy(host: Arc<dyn ReadinessHost>, policy: ReadPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner::default()),
            host,
            policy,
        }
    }

    /// Registers a plain chardev for `backend` under `label`.
    pub fn create(
        &self,
        label: &str,
        backend: impl Backend + 'static,
    ) -> Result<Arc<Chardev>, ChardevError> {
        let mut chardevs = lock(&self.inner.chardevs);
        if chardevs.contains_key(label) {
            return Err(ChardevError::DuplicateLabel(label.to_string()));
        }
        let chr = Chardev::build(
            label.to_string(),
            Box::new(backend),
            Arc::clone(&self.host),
            self.policy,
            None,
            Arc::downgrade(&self.inner),
        );
        chardevs.insert(label.to_string(), Arc::clone(&chr));
        info!("chardev '{label}' created");
        Ok(chr)
    }

    /// Registers a multiplexer named `label` on top of `underlying`.
    pub fn create_mux(&self, label: &str, underlying: &str) -> Result<Arc<Chardev>, ChardevError> {
        let base = {
            let chardevs = lock(&self.inner.chardevs);
            if chardevs.contains_key(label) {
                return Err(ChardevError::DuplicateLabel(label.to_string()));
            }
            chardevs
                .get(underlying)
                .cloned()
                .ok_or_else(|| ChardevError::UnknownLabel(underlying.to_string()))?
        };

        // Built outside the map lock: binding the mux onto `base` runs
        // frontend bookkeeping on it.
        let mux = Chardev::build_mux(
            label.to_string(),
            &base,
            Arc::clone(&self.host),
            self.policy,
            Arc::downgrade(&self.inner),
        )?;

        let mut chardevs = lock(&self.inner.chardevs);
        if chardevs.contains_key(label) {
            return Err(ChardevError::DuplicateLabel(label.to_string()));
        }
        chardevs.insert(label.to_string(), Arc::clone(&mux));
        info!("mux '{label}' created over '{underlying}'");
        Ok(mux)
    }

    pub fn get(&self, label: &str) -> Option<Arc<Chardev>> {
        lock(&self.inner.chardevs).get(label).cloned()
    }

    /// All registered labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = lock(&self.inner.chardevs).keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Unregisters `label`.
    ///
    /// Refused with `InUse` while a frontend (or a mux) is bound to it.  The
    /// chardev's read watch is cancelled before it is handed back.
    pub fn remove(&self, label: &str) -> Result<Arc<Chardev>, ChardevError> {
        let chr = {
            let mut chardevs = lock(&self.inner.chardevs);
            let chr = chardevs
                .get(label)
                .ok_or_else(|| ChardevError::UnknownLabel(label.to_string()))?;
            if chr.has_frontend() {
                return Err(ChardevError::InUse(label.to_string()));
            }
            chardevs.remove(label)
        };
        let chr = chr.ok_or_else(|| ChardevError::UnknownLabel(label.to_string()))?;
        chr.remove_pending();
        info!("chardev '{label}' removed");
        Ok(chr)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.chardevs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Default host handed to every chardev this registry creates.
    pub fn host(&self) -> &Arc<dyn ReadinessHost> {
        &self.host
    }
}
