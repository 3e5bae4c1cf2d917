use std::fmt;
use std::sync::Arc;
use log::debug;
use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::payload::ImagePayload;

/// Identifier of a class. Allocated by the registry and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassId(u64);

impl ClassId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown class: {0}")]
    UnknownClass(ClassId),
    #[error("Sample index {index} out of range for {class} ({len} samples)")]
    SampleOutOfRange {
        class: ClassId,
        index: usize,
        len: usize,
    },
    #[error("Class name cannot be empty")]
    EmptyName,
    #[error("Class registry is read-only while training is in progress")]
    Locked,
}

/// A user-defined label together with its example images.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    id: ClassId,
    name: String,
    samples: Vec<ImagePayload>,
}

impl ClassDefinition {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples(&self) -> &[ImagePayload] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Ordered collection of class definitions.
///
/// The registry only guards its own invariants (unique ids, non-empty names,
/// valid sample indices). Whether it may be mutated at all, e.g. during a
/// training run, is decided by its owner.
#[derive(Debug, Default, Clone)]
pub struct ClassRegistry {
    classes: Vec<ClassDefinition>,
    next_id: u64,
    revision: u64,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, empty class and returns its id.
    pub fn add_class(&mut self, name: impl Into<String>) -> Result<ClassId, RegistryError> {
        let name = Self::validate_name(name.into())?;
        let id = ClassId(self.next_id);
        self.next_id += 1;
        debug!("Adding class {} '{}'", id, name);
        self.classes.push(ClassDefinition {
            id,
            name,
            samples: Vec::new(),
        });
        self.touch();
        Ok(id)
    }

    pub fn rename_class(&mut self, id: ClassId, name: impl Into<String>) -> Result<(), RegistryError> {
        let name = Self::validate_name(name.into())?;
        let class = self.get_mut(id)?;
        class.name = name;
        self.touch();
        Ok(())
    }

    pub fn add_sample(&mut self, id: ClassId, payload: ImagePayload) -> Result<(), RegistryError> {
        self.get_mut(id)?.samples.push(payload);
        self.touch();
        Ok(())
    }

    pub fn remove_sample(&mut self, id: ClassId, index: usize) -> Result<ImagePayload, RegistryError> {
        let class = self.get_mut(id)?;
        let len = class.samples.len();
        if index >= len {
            return Err(RegistryError::SampleOutOfRange { class: id, index, len });
        }
        let removed = class.samples.remove(index);
        self.touch();
        Ok(removed)
    }

    pub fn delete_class(&mut self, id: ClassId) -> Result<ClassDefinition, RegistryError> {
        let position = self
            .classes
            .iter()
            .position(|c| c.id == id)
            .ok_or(RegistryError::UnknownClass(id))?;
        let removed = self.classes.remove(position);
        debug!("Deleted class {} '{}'", id, removed.name);
        self.touch();
        Ok(removed)
    }

    /// Classes in creation order.
    pub fn list_classes(&self) -> &[ClassDefinition] {
        &self.classes
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassDefinition> {
        self.classes.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Ids of all classes holding fewer than `min_samples` samples.
    pub fn validate(&self, min_samples: usize) -> Vec<ClassId> {
        self.classes
            .iter()
            .filter(|c| c.samples.len() < min_samples)
            .map(|c| c.id)
            .collect()
    }

    /// Monotonic counter bumped by every successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn get_mut(&mut self, id: ClassId) -> Result<&mut ClassDefinition, RegistryError> {
        self.classes
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(RegistryError::UnknownClass(id))
    }

    fn validate_name(name: String) -> Result<String, RegistryError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        Ok(trimmed.to_string())
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

/// Shared read-only handle on a registry whose writes go through its owner.
#[derive(Debug, Clone)]
pub struct RegistryView {
    inner: Arc<RwLock<ClassRegistry>>,
}

impl RegistryView {
    pub(crate) fn new(inner: Arc<RwLock<ClassRegistry>>) -> Self {
        Self { inner }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ClassRegistry> {
        self.inner.read().await
    }

    /// Copies the current class list.
    pub async fn snapshot(&self) -> Vec<ClassDefinition> {
        self.inner.read().await.list_classes().to_vec()
    }
}

/// A view over a registry nobody can mutate any more.
impl From<ClassRegistry> for RegistryView {
    fn from(registry: ClassRegistry) -> Self {
        Self::new(Arc::new(RwLock::new(registry)))
    }
}
