// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Name → ring lookup.
//!
//! Ring names are the contract between the datapath and sibling processes:
//! a process that knows a name (see [`crate::names`]) finds the ring here.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::ring::{Ring, RingError, RingParams};

/// Process-wide registry of named rings.
#[derive(Debug, Default)]
pub struct RingRegistry {
    rings: RwLock<HashMap<String, Arc<Ring>>>,
}

impl RingRegistry {
    #[must_use]
    pub fn new() -> RingRegistry {
        RingRegistry::default()
    }

    /// Create a ring and register it under its name.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Exists`] if the name is taken, or any parameter
    /// validation error from [`Ring::with_params`].
    pub fn create(&self, params: &RingParams) -> Result<Arc<Ring>, RingError> {
        let ring = Arc::new(Ring::with_params(params)?);
        let mut rings = self.rings.write();
        if rings.contains_key(params.name.as_str()) {
            return Err(RingError::Exists(params.name.clone()));
        }
        rings.insert(params.name.clone(), Arc::clone(&ring));
        info!("created ring {}", params.name);
        Ok(ring)
    }

    /// Find a ring by name, creating it from `params` when absent.
    ///
    /// # Errors
    ///
    /// Returns a parameter validation error from [`Ring::with_params`].
    pub fn ensure(&self, params: &RingParams) -> Result<Arc<Ring>, RingError> {
        match self.lookup(&params.name) {
            Ok(ring) => Ok(ring),
            Err(RingError::NotFound(_)) => match self.create(params) {
                Ok(ring) => Ok(ring),
                // lost a race against another creator; theirs wins
                Err(RingError::Exists(_)) => self.lookup(&params.name),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Find a ring by name.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::NotFound`] if no ring is registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<Arc<Ring>, RingError> {
        self.rings
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RingError::NotFound(name.to_string()))
    }
}
