#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for dependency validation and resolution.
//!
//! ## Test Coverage
//!
//! - Missing and unsatisfied required dependencies (DEP001)
//! - Optional TEST-scope dependencies downgraded to warnings
//! - Range conflicts across plugins and cycle detection
//! - Cache idempotence, invalidation on range change, single flight
//! - Index retry, exhaustion and timeouts

use std::sync::Arc;
use std::time::Duration;

use lakebench_kernel::cache::fingerprint;
use lakebench_kernel::config::DependencyConfig;
use lakebench_sdk::diagnostics::ErrorCode;
use lakebench_sdk::types::{DependencyScope, DependencySpec, FormatKind};
use lakebench_test_utils::{FixtureIndex, assert, fast_config, manager, plugin_with_deps};

fn delta_plugin(range: &str) -> lakebench_sdk::types::PluginMetadata {
    plugin_with_deps(
        "delta-plugin",
        FormatKind::Delta,
        &[DependencySpec::required("delta-spark", range)],
    )
}

#[tokio::test]
async fn unsatisfied_required_dependency_reports_dep001() {
    let index = Arc::new(FixtureIndex::new().with_package("delta-spark", &["1.9.0"]));
    let mgr = manager(&index, fast_config());

    let result = mgr.validate_dependencies(&delta_plugin(">=2.0.0")).await;

    assert!(!result.is_valid);
    assert::error_codes(&result, &["DEP001"]);
    let err = assert::find_error(&result, "DEP001");
    assert_eq!(err.context.dependency.as_deref(), Some("delta-spark"));
    assert_eq!(err.context.required_version.as_deref(), Some(">=2.0.0"));
    assert_eq!(err.context.found_version.as_deref(), Some("1.9.0"));
    assert!(!err.resolution.is_empty());
}

#[tokio::test]
async fn optional_test_dependency_only_warns() {
    let index = Arc::new(FixtureIndex::new().with_package("pyarrow", &["9.0.0"]));
    let mgr = manager(&index, fast_config());
    let iceberg = plugin_with_deps(
        "iceberg-plugin",
        FormatKind::Iceberg,
        &[DependencySpec::optional("pyarrow", ">=10.0").in_scope(DependencyScope::Test)],
    );

    let result = mgr.validate_dependencies(&iceberg).await;

    assert!(result.is_valid);
    assert!(result.errors.is_empty());
    assert::warning_contains(&result, "pyarrow");
}

#[tokio::test]
async fn structured_error_serializes_with_stable_fields() {
    let index = Arc::new(FixtureIndex::new().with_package("delta-spark", &["1.9.0"]));
    let mgr = manager(&index, fast_config());

    let result = mgr.validate_dependencies(&delta_plugin(">=2.0.0")).await;
    let json = serde_json::to_value(&result.errors[0]).unwrap();

    assert_eq!(json["code"], "DEP001");
    assert_eq!(json["severity"], "ERROR");
    assert_eq!(json["component"], "delta-plugin");
    assert_eq!(json["context"]["found_version"], "1.9.0");
    assert!(json["context"]["timestamp"].is_string());
    assert!(json["resolution"].is_array());
}

#[tokio::test]
async fn repeated_validation_uses_no_lookups() {
    let index = Arc::new(FixtureIndex::new().with_package("delta-spark", &["2.4.0"]));
    let mgr = manager(&index, fast_config());
    let meta = delta_plugin(">=2.0.0");

    let first = mgr.validate_dependencies(&meta).await;
    let after_first = index.total_lookups();
    let second = mgr.validate_dependencies(&meta).await;

    assert_eq!(first, second);
    assert_eq!(after_first, 1);
    assert_eq!(index.total_lookups(), after_first);
}

#[tokio::test]
async fn changed_range_invalidates_previous_result() {
    let index = Arc::new(FixtureIndex::new().with_package("delta-spark", &["2.4.0"]));
    let config = DependencyConfig {
        index_cache_ttl: Duration::ZERO,
        ..fast_config()
    };
    let mgr = manager(&index, config);
    let loose = delta_plugin(">=2.0.0");
    let strict = delta_plugin(">=3.0.0");

    assert!(mgr.validate_dependencies(&loose).await.is_valid);
    let strict_result = mgr.validate_dependencies(&strict).await;

    assert!(!strict_result.is_valid);
    assert_eq!(index.lookups("delta-spark"), 2);
    assert!(mgr.cache().get(&fingerprint(&loose)).await.is_none());
    assert!(mgr.cache().get(&fingerprint(&strict)).await.is_some());
}

#[tokio::test]
async fn invalidate_by_plugin_id_forces_fresh_lookup() {
    let index = Arc::new(FixtureIndex::new().with_package("delta-spark", &["2.4.0"]));
    let config = DependencyConfig {
        index_cache_ttl: Duration::ZERO,
        ..fast_config()
    };
    let mgr = manager(&index, config);
    let meta = delta_plugin(">=2.0.0");

    mgr.validate_dependencies(&meta).await;
    mgr.cache().invalidate_by_plugin_id("delta-plugin").await;
    mgr.validate_dependencies(&meta).await;

    assert_eq!(index.lookups("delta-spark"), 2);
}

#[tokio::test]
async fn concurrent_validations_share_one_resolution() {
    let index = Arc::new(
        FixtureIndex::new()
            .with_package("delta-spark", &["2.4.0"])
            .with_package("pyarrow", &["14.0.1"]),
    );
    index.set_latency(Duration::from_millis(50));
    let mgr = manager(&index, fast_config());
    let meta = plugin_with_deps(
        "delta-plugin",
        FormatKind::Delta,
        &[
            DependencySpec::required("delta-spark", ">=2.0.0"),
            DependencySpec::required("pyarrow", ">=10.0"),
        ],
    );

    let mut handles = Vec::new();
    for _ in 0..10 {
        let mgr = mgr.clone();
        let meta = meta.clone();
        handles.push(tokio::spawn(async move { mgr.validate_dependencies(&meta).await }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_valid);
    }
    assert_eq!(index.lookups("delta-spark"), 1);
    assert_eq!(index.lookups("pyarrow"), 1);
}

#[tokio::test]
async fn transient_index_failures_are_retried() {
    let index = Arc::new(FixtureIndex::new().with_package("delta-spark", &["2.4.0"]));
    index.fail_next("delta-spark", 2);
    let mgr = manager(&index, fast_config());

    let result = mgr.validate_dependencies(&delta_plugin(">=2.0.0")).await;

    assert!(result.is_valid);
    assert_eq!(index.lookups("delta-spark"), 3);
}

#[tokio::test]
async fn exhausted_retries_mark_dependency_missing_and_skip_cache() {
    let index = Arc::new(FixtureIndex::new().with_package("delta-spark", &["2.4.0"]));
    index.fail_next("delta-spark", 5);
    let mgr = manager(&index, fast_config());
    let meta = delta_plugin(">=2.0.0");

    let first = mgr.validate_dependencies(&meta).await;
    assert::error_codes(&first, &["DEP001"]);
    assert::warning_contains(&first, "DEP_INDEX_UNAVAILABLE");
    assert_eq!(index.lookups("delta-spark"), 3);
    assert!(mgr.cache().get(&fingerprint(&meta)).await.is_none());

    // Two injected failures remain; the third attempt reaches the index.
    let second = mgr.validate_dependencies(&meta).await;
    assert!(second.is_valid);
    assert_eq!(index.lookups("delta-spark"), 6);
}

#[tokio::test]
async fn slow_index_times_out_as_unavailable() {
    let index = Arc::new(FixtureIndex::new().with_package("delta-spark", &["2.4.0"]));
    index.set_latency(Duration::from_millis(300));
    let config = DependencyConfig {
        lookup_timeout: Duration::from_millis(20),
        retry_attempts: 2,
        ..fast_config()
    };
    let mgr = manager(&index, config);

    let result = mgr.validate_dependencies(&delta_plugin(">=2.0.0")).await;

    assert::error_codes(&result, &["DEP001"]);
    assert::warning_contains(&result, "timed out");
    assert_eq!(index.lookups("delta-spark"), 2);
}

#[tokio::test]
async fn missing_package_is_not_retried() {
    let index = Arc::new(FixtureIndex::new());
    let mgr = manager(&index, fast_config());

    let result = mgr.validate_dependencies(&delta_plugin(">=2.0.0")).await;

    assert::error_codes(&result, &["DEP001"]);
    assert_eq!(result.errors[0].context.found_version, None);
    assert_eq!(index.lookups("delta-spark"), 1);
}

#[test]
fn disjoint_ranges_are_reported_for_both_plugins() {
    let index = Arc::new(FixtureIndex::new());
    let mgr = manager(&index, fast_config());
    let plugins = vec![
        plugin_with_deps(
            "plugin-a",
            FormatKind::Delta,
            &[DependencySpec::required("libX", ">=2.0,<3.0")],
        ),
        plugin_with_deps(
            "plugin-b",
            FormatKind::Iceberg,
            &[DependencySpec::required("libX", ">=3.0,<4.0")],
        ),
    ];

    let result = mgr.resolve_dependencies(&plugins).unwrap();

    assert!(!result.is_compatible);
    let conflicting: Vec<_> = result.conflicting_plugins().into_iter().collect();
    assert_eq!(conflicting, vec!["plugin-a", "plugin-b"]);
}

#[test]
fn plugin_cycle_fails_resolution() {
    let index = Arc::new(FixtureIndex::new());
    let mgr = manager(&index, fast_config());
    let plugins = vec![
        plugin_with_deps("a", FormatKind::Delta, &[DependencySpec::required("b", ">=1.0.0")]),
        plugin_with_deps("b", FormatKind::Iceberg, &[DependencySpec::required("c", ">=1.0.0")]),
        plugin_with_deps("c", FormatKind::Hudi, &[DependencySpec::required("a", ">=1.0.0")]),
    ];

    let err = mgr.resolve_dependencies(&plugins).unwrap_err();

    assert!(err.errors.iter().any(|e| e.code == ErrorCode::DependencyCycle));
    assert!(err.to_string().contains("DEP_CYCLE"));
}

#[test]
fn compatible_plugins_resolve_cleanly() {
    let index = Arc::new(FixtureIndex::new());
    let mgr = manager(&index, fast_config());
    let plugins = vec![
        plugin_with_deps("base", FormatKind::Delta, &[DependencySpec::required("pyarrow", ">=10.0")]),
        plugin_with_deps(
            "ext",
            FormatKind::Iceberg,
            &[
                DependencySpec::required("base", "^1.0"),
                DependencySpec::required("pyarrow", ">=12.0,<15.0"),
            ],
        ),
    ];

    let result = mgr.resolve_dependencies(&plugins).unwrap();
    assert!(result.is_compatible);
    assert_eq!(index.total_lookups(), 0);
}
