use prometheus::{
    histogram_opts, opts, register_histogram_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry, Histogram,
    HistogramTimer, IntCounter, IntCounterVec, Registry,
};

use crate::Error;

/// Step label for failures that happen before any resource is synced
const FETCH_STEP: &str = "fetch kueue";

/// Sync loop metrics
#[derive(Clone)]
pub struct Metrics {
    pub syncs: IntCounter,
    /// Failed passes by step and root cause
    pub failures: IntCounterVec,
    pub sync_duration: Histogram,
}

impl Metrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let syncs = register_int_counter_with_registry!(
            "kueue_operator_syncs_total",
            "Sync passes started",
            registry
        )?;
        let failures = register_int_counter_vec_with_registry!(
            opts!(
                "kueue_operator_sync_failures_total",
                "Sync passes that failed"
            ),
            &["step", "error"],
            registry
        )?;
        let sync_duration = register_histogram_with_registry!(
            histogram_opts!(
                "kueue_operator_sync_duration_seconds",
                "Duration of a sync pass",
                vec![0.05, 0.1, 0.5, 1., 2.5, 5., 15., 60.]
            ),
            registry
        )?;
        Ok(Self {
            syncs,
            failures,
            sync_duration,
        })
    }

    /// Count a pass, timing it until the returned timer is dropped
    pub fn start_sync(&self) -> HistogramTimer {
        self.syncs.inc();
        self.sync_duration.start_timer()
    }

    pub fn sync_failure(&self, err: &Error) {
        self.failures
            .with_label_values(&[err.step().unwrap_or(FETCH_STEP), err.metric_label()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_labelled_by_step_and_cause() {
        let registry = Registry::new();
        let metrics = Metrics::register(&registry).unwrap();

        let err = Error::AssetNotFound("deployment.yaml".into()).during("manage deployment");
        metrics.sync_failure(&err);
        metrics.sync_failure(&Error::MissingObjectKey("metadata.uid"));
        drop(metrics.start_sync());

        assert_eq!(
            metrics
                .failures
                .with_label_values(&["manage deployment", "AssetNotFound"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .failures
                .with_label_values(&[FETCH_STEP, "MissingObjectKey"])
                .get(),
            1
        );
        assert_eq!(metrics.syncs.get(), 1);
        assert_eq!(metrics.sync_duration.get_sample_count(), 1);
        assert!(Metrics::register(&registry).is_err(), "names are unique per registry");
    }
}
