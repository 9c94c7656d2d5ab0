use std::collections::BTreeMap;

use tracing::debug;

use guild_core::config::{CredentialRequirement, CredentialRule};
use guild_core::types::RequirementId;

/// Session-scoped secret values keyed by requirement id.
///
/// Values never leave the store through logs or `Debug` output.
#[derive(Clone, Default)]
pub struct CredentialStore {
    requirements: BTreeMap<RequirementId, CredentialRequirement>,
    values: BTreeMap<RequirementId, String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with the given requirement catalog registered.
    pub fn with_requirements(requirements: impl IntoIterator<Item = CredentialRequirement>) -> Self {
        let mut store = Self::new();
        for requirement in requirements {
            store.register(requirement);
        }
        store
    }

    /// Register (or replace) a requirement and its validation rule.
    pub fn register(&mut self, requirement: CredentialRequirement) {
        self.requirements.insert(requirement.id.clone(), requirement);
    }

    pub fn requirement(&self, id: &RequirementId) -> Option<&CredentialRequirement> {
        self.requirements.get(id)
    }

    pub fn requirements(&self) -> impl Iterator<Item = &CredentialRequirement> {
        self.requirements.values()
    }

    /// Store a value and report whether it passes the requirement's rule.
    pub fn set(&mut self, id: impl Into<RequirementId>, value: impl Into<String>) -> bool {
        let id = id.into();
        self.values.insert(id.clone(), value.into());
        let valid = self.validate(&id);
        debug!(credential = %id, valid, "Credential updated");
        valid
    }

    pub fn get(&self, id: &RequirementId) -> Option<&str> {
        self.values.get(id).map(String::as_str)
    }

    pub fn remove(&mut self, id: &RequirementId) -> Option<String> {
        self.values.remove(id)
    }

    /// Whether a value is present and passes the registered rule.
    /// Ids without a registered requirement only need a non-empty value.
    pub fn validate(&self, id: &RequirementId) -> bool {
        let Some(value) = self.values.get(id) else {
            return false;
        };
        match self.requirements.get(id) {
            Some(requirement) => requirement.validate(value),
            None => CredentialRule::NonEmpty.validate(value),
        }
    }

    /// The ids among `ids` that are absent or invalid, in the order given.
    pub fn missing_for<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a RequirementId>,
    ) -> Vec<RequirementId> {
        ids.into_iter()
            .filter(|id| !self.validate(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values: BTreeMap<&str, &str> = self
            .values
            .keys()
            .map(|id| (id.as_str(), "<redacted>"))
            .collect();
        f.debug_struct("CredentialStore")
            .field("requirements", &self.requirements.keys().collect::<Vec<_>>())
            .field("values", &values)
            .finish()
    }
}
