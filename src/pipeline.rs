//! Directive sets and pipelines.
//!
//! A [`DirectiveSet`] is what a payload asked for; a [`Pipeline`] is what
//! will run. [`PipelineBuilder::build`] turns one into the other by walking
//! the registry's canonical order and asking each present directive's factory
//! for an operation, so the resulting stage order never depends on how the
//! payload was written.
//!
//! ```text
//! {"Resize": {...}, "ConvertColorToGray": true}
//!        │
//!        ▼  canonical order
//! identity → ConvertColorToGray → Resize
//! ```

use crate::error::{ProcessingError, ValidationError};
use crate::imaging::BoxedOperation;
use crate::registry;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Directive name → parameters, as supplied by one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectiveSet {
    entries: BTreeMap<String, Value>,
}

impl DirectiveSet {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Directive names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Map<String, Value>> for DirectiveSet {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl FromIterator<(String, Value)> for DirectiveSet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// What to do with directive names the registry does not know.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownDirectivePolicy {
    #[default]
    Reject,
    Ignore,
}

/// One bound operation.
#[derive(Debug)]
pub struct Stage {
    pub name: &'static str,
    pub operation: BoxedOperation,
}

/// Ordered stages rooted at the identity transform.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// A pipeline that returns its input unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Compose `stage` after every existing stage.
    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order. Each stage consumes the previous output, so
    /// a failing stage leaves nothing half-written.
    pub fn apply(&self, image: DynamicImage) -> Result<DynamicImage, ProcessingError> {
        self.stages.iter().try_fold(image, |img, stage| {
            stage
                .operation
                .apply(img)
                .map_err(|source| ProcessingError::Stage {
                    stage: stage.name,
                    source,
                })
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineBuilder {
    policy: UnknownDirectivePolicy,
}

impl PipelineBuilder {
    pub fn new(policy: UnknownDirectivePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> UnknownDirectivePolicy {
        self.policy
    }

    /// Validate every directive and assemble the pipeline in canonical order.
    pub fn build(&self, directives: &DirectiveSet) -> Result<Pipeline, ValidationError> {
        for name in directives.names() {
            if registry::lookup(name).is_none() {
                match self.policy {
                    UnknownDirectivePolicy::Reject => {
                        return Err(ValidationError::UnknownDirective(name.to_string()));
                    }
                    UnknownDirectivePolicy::Ignore => {
                        tracing::debug!(directive = name, "ignoring unknown directive");
                    }
                }
            }
        }

        let mut pipeline = Pipeline::identity();
        for spec in registry::operations() {
            let Some(value) = directives.get(spec.name) else {
                continue;
            };
            if let Some(operation) = spec.build(value)? {
                pipeline = pipeline.then(Stage {
                    name: spec.name,
                    operation,
                });
            }
        }
        tracing::debug!(stages = ?pipeline.stage_names(), "pipeline built");
        Ok(pipeline)
    }
}
