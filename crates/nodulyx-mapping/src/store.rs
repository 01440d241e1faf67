//! Profile store contract.
//!
//! Profile persistence is an external collaborator; the engine only needs
//! case-to-profile lookup with a guaranteed generic fallback.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use nodulyx_common::Result;

use crate::profile::MappingProfile;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Profile registered for the case, falling back to the generic
    /// comprehensive profile when none is.
    async fn get_profile_for_case(&self, case_name: &str) -> Result<Arc<MappingProfile>>;
}

/// In-process registry keyed by case name.
pub struct StaticProfileStore {
    by_case: HashMap<String, Arc<MappingProfile>>,
    fallback: Arc<MappingProfile>,
}

impl StaticProfileStore {
    pub fn new() -> Self {
        Self {
            by_case: HashMap::new(),
            fallback: Arc::new(MappingProfile::generic()),
        }
    }

    /// Register a profile for every case it names.
    pub fn register(&mut self, profile: MappingProfile) {
        let profile = Arc::new(profile);
        for case in &profile.case_names {
            self.by_case.insert(case.clone(), profile.clone());
        }
    }

    pub fn with_profiles(profiles: Vec<MappingProfile>) -> Self {
        let mut store = Self::new();
        for p in profiles {
            store.register(p);
        }
        store
    }
}

impl Default for StaticProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for StaticProfileStore {
    async fn get_profile_for_case(&self, case_name: &str) -> Result<Arc<MappingProfile>> {
        match self.by_case.get(case_name) {
            Some(profile) => Ok(profile.clone()),
            None => {
                debug!(case = case_name, "No case-specific profile, using generic");
                Ok(self.fallback.clone())
            }
        }
    }
}
