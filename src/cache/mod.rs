//! Derived variant cache
//!
//! Orchestrates one variant request: authorization guard → key lookup →
//! (on miss) transform pipeline → persist. The cache is write-once: a
//! stored variant is served forever for its key and a hit never invokes
//! the pipeline.
//!
//! There is no at-most-one guarantee per key. Two requests racing on a
//! miss may both run the pipeline; the store adapter's idempotent insert
//! makes the redundant result invisible to callers.

use std::sync::Arc;

use crate::auth::{authorize, AccessDecision, VariantRequest};
use crate::error::ServiceError;
use crate::metrics::ServiceMetrics;
use crate::model::ImageRecord;
use crate::pipeline::TransformPipeline;
use crate::store::{BlobStore, Projection};

pub struct DerivedVariantCache {
    store: BlobStore,
    pipeline: Arc<TransformPipeline>,
    secret: String,
    deny_original: bool,
}

impl DerivedVariantCache {
    pub fn new(
        store: BlobStore,
        pipeline: Arc<TransformPipeline>,
        secret: String,
        deny_original: bool,
    ) -> Self {
        Self {
            store,
            pipeline,
            secret,
            deny_original,
        }
    }

    /// Resolve a request to a stored record, computing the variant on a
    /// first authorized request for its parameter combination.
    pub async fn get_or_compute(
        &self,
        request: &VariantRequest,
    ) -> Result<ImageRecord, ServiceError> {
        let metrics = ServiceMetrics::global();

        match authorize(request, &self.secret, self.deny_original) {
            AccessDecision::Deny => {
                metrics.auth_rejections.inc();
                tracing::info!(id = %request.id, "variant request rejected");
                Err(ServiceError::AuthorizationFailure)
            }
            AccessDecision::ServeOriginal => self
                .store
                .find_by_id(&request.id, Projection::Full)
                .await?
                .ok_or(ServiceError::NotFound),
            AccessDecision::ComputeVariant(params) => {
                let key = params.variant_key();
                if let Some(hit) = self.store.find_by_id(&key, Projection::Full).await? {
                    metrics.cache_hits.inc();
                    return Ok(hit);
                }
                metrics.cache_misses.inc();

                // No variant can exist without its parent.
                let original = self
                    .store
                    .find_by_id(&params.parent_id, Projection::Full)
                    .await?
                    .ok_or_else(|| {
                        tracing::info!(id = %params.parent_id, "source image not found");
                        ServiceError::NotFound
                    })?;

                tracing::info!(
                    parent_id = %params.parent_id,
                    variant_key = %key,
                    width = params.width,
                    height = params.height,
                    quality = params.quality,
                    "computing variant"
                );
                let stored = self.pipeline.run(&original, &params, false).await?;
                Ok(stored)
            }
        }
    }
}
