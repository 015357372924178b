//! Dataset Registry
//!
//! Predictions carry a dataset index; a [`Dataset`] binds that index to the
//! label list loaded from a labels file (one label per line). Datasets are
//! shared: loading the same path twice through a [`Registry`] yields the
//! same instance, so every detector classifying against one label file
//! agrees on the dataset id.
//!
//! A process-wide registry is available through [`Registry::global`]; tests
//! construct their own instances instead.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{Fault, Result};
use crate::zone::Zone;

/// An indexed list of class labels.
#[derive(Debug)]
pub struct Dataset {
    id: i16,
    path: String,
    labels: Vec<String>,
}

impl Dataset {
    /// Dataset index carried by predictions classified against it.
    #[must_use]
    pub const fn id(&self) -> i16 {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn label(&self, id: i16) -> Option<&str> {
        usize::try_from(id).ok().and_then(|i| self.labels.get(i)).map(String::as_str)
    }

    /// Label of a zone's context prediction, when it belongs to this
    /// dataset.
    #[must_use]
    pub fn describe(&self, zone: &Zone) -> Option<&str> {
        if zone.context.dataset != self.id {
            return None;
        }
        self.label(zone.context.id)
    }
}

/// Path-keyed dataset store assigning dataset ids on first load.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<FxHashMap<String, Arc<Dataset>>>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    /// Loads a labels file, or returns the already-loaded instance for the
    /// same path.
    pub fn load(&self, path: &str) -> Result<Arc<Dataset>> {
        let mut inner = self.inner.lock();
        if let Some(found) = inner.get(path) {
            return Ok(Arc::clone(found));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            log::warn!("dataset: cannot read labels file {path}: {e}");
            Fault::NotExisting
        })?;
        let labels: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        if labels.is_empty() {
            return Err(Fault::InvalidValue);
        }

        let id = i16::try_from(inner.len()).map_err(|_| Fault::InvalidRange)?;
        let dataset = Arc::new(Dataset {
            id,
            path: path.to_owned(),
            labels,
        });
        inner.insert(path.to_owned(), Arc::clone(&dataset));
        Ok(dataset)
    }

    /// Registers an in-memory label list under a synthetic path (sources
    /// without a file, and tests).
    pub fn register(&self, path: &str, labels: Vec<String>) -> Result<Arc<Dataset>> {
        let mut inner = self.inner.lock();
        if inner.contains_key(path) {
            return Err(Fault::InvalidRequest);
        }
        let id = i16::try_from(inner.len()).map_err(|_| Fault::InvalidRange)?;
        let dataset = Arc::new(Dataset {
            id,
            path: path.to_owned(),
            labels,
        });
        inner.insert(path.to_owned(), Arc::clone(&dataset));
        Ok(dataset)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Arc<Dataset>> {
        self.inner.lock().get(path).map(Arc::clone)
    }

    /// Drops every loaded dataset.
    pub fn shutdown(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::zone::Prediction;

    fn registry_with(labels: &[&str]) -> (Registry, Arc<Dataset>) {
        let registry = Registry::new();
        let dataset = registry
            .register("memory:test", labels.iter().map(|s| (*s).to_owned()).collect())
            .unwrap();
        (registry, dataset)
    }

    #[test]
    fn same_path_shares_one_instance() {
        let (registry, dataset) = registry_with(&["person", "car"]);
        assert_eq!(
            registry.register("memory:test", vec!["other".into()]).unwrap_err(),
            Fault::InvalidRequest
        );
        assert!(Arc::ptr_eq(&registry.get("memory:test").unwrap(), &dataset));
    }

    #[test]
    fn ids_are_assigned_in_load_order() {
        let registry = Registry::new();
        let a = registry.register("a", vec!["x".into()]).unwrap();
        let b = registry.register("b", vec!["y".into()]).unwrap();
        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
    }

    #[test]
    fn describe_matches_dataset_and_class() {
        let (_registry, dataset) = registry_with(&["person", "car"]);
        let zone = Zone::with_prediction(
            Rect::of_size(10, 10),
            Prediction::new(0.9, dataset.id(), 1),
        );
        assert_eq!(dataset.describe(&zone), Some("car"));

        let foreign = Zone::with_prediction(Rect::of_size(10, 10), Prediction::new(0.9, 99, 1));
        assert_eq!(dataset.describe(&foreign), None);
    }

    #[test]
    fn shutdown_clears_the_store() {
        let (registry, _dataset) = registry_with(&["person"]);
        registry.shutdown();
        assert!(registry.get("memory:test").is_none());
    }
}
