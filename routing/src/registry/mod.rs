//! Backend registry: catalog of model backends and their capability profiles
//!
//! Registration is the only mutation point. Readers take an immutable
//! [`RegistrySnapshot`]; writers build a new snapshot and swap it in, so a
//! routing decision never observes a mutation half-way through.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::RegistryError;
use crate::types::{BackendId, BackendProfile};

/// Immutable view of the registry at one point in time.
///
/// Backends are kept in registration order; that order is the router's last
/// tie-breaker.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<BackendProfile>,
    index: HashMap<BackendId, usize>,
}

impl RegistrySnapshot {
    /// Build a snapshot directly from profiles, applying the same
    /// replace-by-id rule as [`BackendRegistry::register`].
    pub fn from_profiles(profiles: impl IntoIterator<Item = BackendProfile>) -> Self {
        let mut snapshot = Self::default();
        for profile in profiles {
            snapshot.upsert(profile);
        }
        snapshot
    }

    fn upsert(&mut self, profile: BackendProfile) -> bool {
        match self.index.get(&profile.id) {
            Some(&pos) => {
                self.entries[pos] = profile;
                true
            }
            None => {
                self.index.insert(profile.id.clone(), self.entries.len());
                self.entries.push(profile);
                false
            }
        }
    }

    /// Look up a backend by id.
    pub fn get(&self, id: &BackendId) -> Result<&BackendProfile, RegistryError> {
        self.index
            .get(id)
            .map(|&pos| &self.entries[pos])
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Backends currently marked available, in registration order.
    pub fn list_available(&self) -> Vec<&BackendProfile> {
        self.entries.iter().filter(|p| p.available).collect()
    }

    /// Every registered backend with its registration position.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BackendProfile)> {
        self.entries.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Thread-safe registry of backends.
///
/// Cloning a snapshot out is an `Arc` clone; the lock only guards the swap.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with a batch of profiles.
    pub fn with_profiles(
        profiles: impl IntoIterator<Item = BackendProfile>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.register_all(profiles)?;
        Ok(registry)
    }

    /// Current snapshot. Later mutations do not affect the returned value.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Add or replace a backend by id.
    ///
    /// Re-registering an id replaces the profile but keeps its original
    /// registration position.
    pub fn register(&self, profile: BackendProfile) -> Result<(), RegistryError> {
        self.register_all(std::iter::once(profile))
    }

    /// Register a batch atomically: either every profile lands or none does.
    pub fn register_all(
        &self,
        profiles: impl IntoIterator<Item = BackendProfile>,
    ) -> Result<(), RegistryError> {
        let profiles: Vec<BackendProfile> = profiles.into_iter().collect();
        for profile in &profiles {
            profile
                .validate()
                .map_err(|message| RegistryError::InvalidProfile {
                    id: profile.id.clone(),
                    message,
                })?;
        }

        self.mutate(|snapshot| {
            for profile in profiles {
                let id = profile.id.clone();
                let replaced = snapshot.upsert(profile);
                info!(backend = %id, replaced, "Registered backend");
            }
            Ok(())
        })
    }

    /// Explicitly toggle a backend's availability flag.
    pub fn set_available(&self, id: &BackendId, available: bool) -> Result<(), RegistryError> {
        self.mutate(|snapshot| {
            let pos = *snapshot
                .index
                .get(id)
                .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
            snapshot.entries[pos].available = available;
            debug!(backend = %id, available, "Backend availability changed");
            Ok(())
        })
    }

    /// Look up a backend by id in the current snapshot.
    pub fn get(&self, id: &BackendId) -> Result<BackendProfile, RegistryError> {
        self.snapshot().get(id).cloned()
    }

    /// Available backends in registration order, cloned out of the current snapshot.
    pub fn list_available(&self) -> Vec<BackendProfile> {
        self.snapshot()
            .list_available()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn mutate<F>(&self, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut RegistrySnapshot) -> Result<(), RegistryError>,
    {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = RegistrySnapshot::clone(&guard);
        f(&mut next)?;
        *guard = Arc::new(next);
        Ok(())
    }
}
