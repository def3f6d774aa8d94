//! Metrics names, described once on first use.
//!
//! Only compiled with the `metrics` feature. Call sites record through the
//! `metrics` facade; installing a recorder is up to the application.

use lazy_static::lazy_static;

lazy_static! {
    // Cache guard

    /// Reads answered by a cached value.
    pub static ref GUARD_HIT: &'static str = {
        metrics::describe_counter!(
            "bulwark_guard_hit_total",
            "Total number of guarded reads answered from the store."
        );
        "bulwark_guard_hit_total"
    };
    /// Reads that found nothing usable in the store.
    pub static ref GUARD_MISS: &'static str = {
        metrics::describe_counter!(
            "bulwark_guard_miss_total",
            "Total number of guarded reads that missed the store."
        );
        "bulwark_guard_miss_total"
    };
    /// Reads answered by a cached null marker.
    pub static ref GUARD_NULL_HIT: &'static str = {
        metrics::describe_counter!(
            "bulwark_guard_null_hit_total",
            "Total number of guarded reads answered by a null marker."
        );
        "bulwark_guard_null_hit_total"
    };
    /// Fetch function invocations.
    pub static ref GUARD_FETCH: &'static str = {
        metrics::describe_counter!(
            "bulwark_guard_fetch_total",
            "Total number of fetch function calls made on a miss."
        );
        "bulwark_guard_fetch_total"
    };

    // Degradation

    /// Breaker transitions to open, forced or threshold driven.
    pub static ref DEGRADATION_OPENED: &'static str = {
        metrics::describe_counter!(
            "bulwark_degradation_open_total",
            "Total number of times the degradation breaker opened."
        );
        "bulwark_degradation_open_total"
    };
    /// Reads answered without the fetch function because the breaker was open.
    pub static ref DEGRADATION_REJECTED: &'static str = {
        metrics::describe_counter!(
            "bulwark_degradation_rejected_total",
            "Total number of reads short-circuited by an open breaker."
        );
        "bulwark_degradation_rejected_total"
    };

    // Worker pool

    /// Tasks that ran to completion, labelled by pool kind.
    pub static ref POOL_TASKS_COMPLETED: &'static str = {
        metrics::describe_counter!(
            "bulwark_pool_tasks_completed_total",
            "Total number of pool tasks that completed."
        );
        "bulwark_pool_tasks_completed_total"
    };
    /// Tasks that panicked, labelled by pool kind.
    pub static ref POOL_TASKS_PANICKED: &'static str = {
        metrics::describe_counter!(
            "bulwark_pool_tasks_panicked_total",
            "Total number of pool tasks that panicked."
        );
        "bulwark_pool_tasks_panicked_total"
    };

    // Scope guards

    /// Guards cleaned up by drop, labelled by guard kind.
    pub static ref SCOPE_IMPLICIT_RELEASE: &'static str = {
        metrics::describe_counter!(
            "bulwark_scope_implicit_release_total",
            "Total number of guards cleaned up without an explicit finish."
        );
        "bulwark_scope_implicit_release_total"
    };
}
