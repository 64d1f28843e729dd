//! Enrichment steps for canonical indicators
//!
//! Enrichment is total: a step whose backing dependency is missing degrades
//! to a recorded no-op and the pipeline continues. Steps only ever add
//! metadata keys; confidence arithmetic belongs to the deduplicator.

pub mod geoip;
pub mod url_suspicion;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Ioc, IocType};

/// A dependency needed by one enrichment step is unreachable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("enrichment step {step} unavailable: {reason}")]
pub struct StepUnavailable {
    pub step: &'static str,
    pub reason: String,
}

/// One enrichment step, contributing a single metadata key (its name).
#[async_trait]
pub trait EnrichmentStep: Send + Sync {
    /// Step name, used as the metadata key.
    fn name(&self) -> &'static str;

    /// Whether this step applies to the given indicator type.
    fn supports(&self, ioc_type: IocType) -> bool;

    /// Produce the step's metadata value for the indicator.
    async fn apply(&self, ioc: &Ioc) -> Result<Value, StepUnavailable>;
}

/// Ordered list of enrichment steps applied to every indicator
pub struct Enricher {
    steps: Vec<Box<dyn EnrichmentStep>>,
}

impl Enricher {
    pub fn new() -> Self {
        Self { steps: vec![] }
    }

    pub fn add_step(&mut self, step: Box<dyn EnrichmentStep>) {
        self.steps.push(step);
    }

    /// Attach metadata from every applicable step. Never fails: an
    /// unavailable step records `"unavailable"` under its key instead.
    pub async fn enrich(&self, mut ioc: Ioc) -> Ioc {
        for step in &self.steps {
            if !step.supports(ioc.ioc_type) {
                continue;
            }
            match step.apply(&ioc).await {
                Ok(value) => {
                    ioc.metadata.insert(step.name().to_string(), value);
                }
                Err(err) => {
                    tracing::warn!(
                        step = step.name(),
                        indicator = %ioc.value,
                        error = %err,
                        "enrichment step degraded to no-op"
                    );
                    ioc.metadata
                        .insert(step.name().to_string(), Value::String("unavailable".into()));
                }
            }
        }
        ioc
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new()
    }
}
