//! # Dispatcher Integration Tests
//!
//! End-to-end splitting and delivery through a started load balancer:
//! - N items over M endpoints become M sub-batches with no loss or duplication
//! - per-endpoint order is preserved
//! - failures are isolated per endpoint and reported with their sub-batch
//! - keyless items, empty fleets, timeouts and cancellation

mod common;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use common::{ep, eps, spans, static_balancer, trace_id, within, Gate, MockResolver, RecordingFactory};
use loadbalancing_exporter::load_balancing::{DispatchContext, DispatchError};
use loadbalancing_exporter::pdata::{
    InstrumentationScope, LogRecord, Logs, Metric, Metrics, NumberDataPoint, NumberValue, Resource,
    ResourceGroup, ScopeGroup, Span, TraceId, Traces,
};
use loadbalancing_exporter::{
    Dispatcher, LoadBalancer, LoadBalancerError, LoadBalancerTelemetry, LogAdapter, MetricAdapter,
    TraceAdapter,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

fn trace_dispatcher(balancer: Arc<LoadBalancer<Traces>>) -> Dispatcher<TraceAdapter> {
    Dispatcher::new(TraceAdapter::default(), balancer, LoadBalancerTelemetry::noop())
}

fn span_names(batch: &Traces) -> Vec<String> {
    batch.items().map(|(_, span)| span.name.clone()).collect()
}

fn span_index(name: &str) -> usize {
    name.trim_start_matches("span-").parse().unwrap()
}

#[tokio::test]
async fn test_items_are_split_without_loss_or_duplication() {
    let factory = RecordingFactory::new();
    let balancer = static_balancer(&["a", "b", "c"], &factory).await;
    let dispatcher = trace_dispatcher(Arc::clone(&balancer));

    let ids: Vec<TraceId> = (0..300).map(trace_id).collect();
    let ring = balancer.ring();
    let expected_endpoints: BTreeSet<String> = ids
        .iter()
        .map(|id| ring.locate(&id.routing_key().unwrap()).unwrap().to_string())
        .collect();

    let report = dispatcher.dispatch(spans(&ids), &DispatchContext::new()).await.unwrap();

    assert_eq!(report.item_count(), 300);
    assert_eq!(report.deliveries.len(), expected_endpoints.len());

    let mut delivered = Vec::new();
    for endpoint in ["a", "b", "c"] {
        let exporter = factory.exporter(endpoint).unwrap();
        let batches = exporter.batches();
        if expected_endpoints.contains(endpoint) {
            assert_eq!(batches.len(), 1, "{} should receive exactly one sub-batch", endpoint);
        }
        for batch in &batches {
            delivered.extend(span_names(batch));
        }
    }

    let mut expected: Vec<String> = (0..300).map(|i| format!("span-{}", i)).collect();
    delivered.sort();
    expected.sort();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn test_relative_order_is_preserved_per_endpoint() {
    let factory = RecordingFactory::new();
    let balancer = static_balancer(&["a", "b"], &factory).await;
    let dispatcher = trace_dispatcher(balancer);

    let ids: Vec<TraceId> = (0..100).map(trace_id).collect();
    dispatcher.dispatch(spans(&ids), &DispatchContext::new()).await.unwrap();

    for endpoint in ["a", "b"] {
        for batch in factory.exporter(endpoint).unwrap().batches() {
            let indices: Vec<usize> = span_names(&batch).iter().map(|name| span_index(name)).collect();
            let mut sorted = indices.clone();
            sorted.sort();
            assert_eq!(indices, sorted);
        }
    }
}

#[tokio::test]
async fn test_resource_and_scope_placement_is_kept() {
    let factory = RecordingFactory::new();
    let balancer = static_balancer(&["a", "b"], &factory).await;
    let dispatcher = trace_dispatcher(balancer);

    let batch = Traces::new(vec![
        ResourceGroup::new(
            Resource::for_service("frontend"),
            vec![ScopeGroup::new(
                InstrumentationScope::new("http", "1.0"),
                (0..20).map(|n| Span::new(trace_id(n), format!("span-{}", n))).collect(),
            )],
        ),
        ResourceGroup::new(
            Resource::for_service("backend"),
            vec![ScopeGroup::new(
                InstrumentationScope::new("db", "2.0"),
                (20..40).map(|n| Span::new(trace_id(n), format!("span-{}", n))).collect(),
            )],
        ),
    ]);

    dispatcher.dispatch(batch, &DispatchContext::new()).await.unwrap();

    for endpoint in ["a", "b"] {
        for sub_batch in factory.exporter(endpoint).unwrap().batches() {
            for (resource, span) in sub_batch.items() {
                let index = span_index(&span.name);
                let service = resource.service_name().unwrap();
                if index < 20 {
                    assert_eq!(service, "frontend");
                } else {
                    assert_eq!(service, "backend");
                }
            }
            for group in &sub_batch.resource_groups {
                assert!(!group.scope_groups.is_empty());
                for scope_group in &group.scope_groups {
                    assert!(!scope_group.items.is_empty());
                }
            }
        }
    }
}

#[tokio::test]
async fn test_failing_endpoint_is_reported_alone() {
    let factory = RecordingFactory::new();
    factory.fail_exports("b");
    let balancer = static_balancer(&["a", "b", "c"], &factory).await;
    let dispatcher = trace_dispatcher(Arc::clone(&balancer));

    let ids: Vec<TraceId> = (0..300).map(trace_id).collect();
    let ring = balancer.ring();
    let items_for_b = ids
        .iter()
        .filter(|id| ring.locate(&id.routing_key().unwrap()).unwrap().as_str() == "b")
        .count();
    assert!(items_for_b > 0);

    let err = dispatcher.dispatch(spans(&ids), &DispatchContext::new()).await.unwrap_err();

    assert_eq!(err.failed_endpoints(), vec![&ep("b")]);
    assert!(err.is_retryable());
    let delivered: BTreeSet<String> = err.delivered().iter().map(|d| d.endpoint.to_string()).collect();
    assert!(!delivered.contains("b"));
    assert_eq!(
        err.delivered().iter().map(|d| d.items).sum::<usize>() + items_for_b,
        300
    );

    match err {
        DispatchError::Partial { failed, .. } => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].batch.item_count(), items_for_b);
            assert_eq!(failed[0].error.error_type(), "export_error");
        }
        other => panic!("expected a partial failure, got {}", other),
    }

    assert!(factory.exporter("a").unwrap().export_count() + factory.exporter("c").unwrap().export_count() >= 1);
}

#[tokio::test]
async fn test_keyless_item_goes_to_the_only_endpoint() {
    let factory = RecordingFactory::new();
    let balancer = static_balancer(&["A"], &factory).await;
    let dispatcher = trace_dispatcher(balancer);

    let report = dispatcher
        .dispatch(spans(&[TraceId::EMPTY]), &DispatchContext::new())
        .await
        .unwrap();

    assert_eq!(report.endpoints(), vec![&ep("A")]);
    assert_eq!(factory.exporter("A").unwrap().export_count(), 1);
}

#[tokio::test]
async fn test_scenario_two_items_to_a_one_to_b() {
    let factory = RecordingFactory::new();
    let balancer = static_balancer(&["A", "B"], &factory).await;
    let ring = balancer.ring();
    let dispatcher = trace_dispatcher(Arc::clone(&balancer));

    let owned_by = |name: &str| {
        (0..1000)
            .map(trace_id)
            .filter(|id| ring.locate(&id.routing_key().unwrap()).unwrap().as_str() == name)
            .collect::<Vec<_>>()
    };
    let (on_a, on_b) = (owned_by("A"), owned_by("B"));
    let batch = spans(&[on_a[0], on_b[0], on_a[1]]);

    let report = dispatcher.dispatch(batch, &DispatchContext::new()).await.unwrap();

    let per_endpoint: HashMap<String, usize> = report
        .deliveries
        .iter()
        .map(|d| (d.endpoint.to_string(), d.items))
        .collect();
    assert_eq!(per_endpoint.get("A"), Some(&2));
    assert_eq!(per_endpoint.get("B"), Some(&1));
    assert_eq!(
        span_names(&factory.exporter("A").unwrap().batches()[0]),
        vec!["span-0".to_string(), "span-2".to_string()]
    );
}

#[tokio::test]
async fn test_no_endpoints_rejects_the_batch() {
    let factory = RecordingFactory::new();
    let balancer = Arc::new(LoadBalancer::new(
        MockResolver::new(Vec::new()),
        factory.as_factory(),
        common::settings(),
        LoadBalancerTelemetry::noop(),
    ));
    balancer.start().await.unwrap();
    let dispatcher = trace_dispatcher(balancer);

    let err = dispatcher
        .dispatch(spans(&[trace_id(1)]), &DispatchContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Routing(LoadBalancerError::NoEndpoints)));
    assert!(err.into_failed_batches().is_empty());
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_endpoint_without_running_exporter_is_a_delivery_failure() {
    let factory = RecordingFactory::new();
    factory.fail_starts("b", usize::MAX);
    let balancer = static_balancer(&["a", "b"], &factory).await;
    let dispatcher = trace_dispatcher(Arc::clone(&balancer));

    let ids: Vec<TraceId> = (0..100).map(trace_id).collect();
    let err = dispatcher.dispatch(spans(&ids), &DispatchContext::new()).await.unwrap_err();

    assert_eq!(err.failed_endpoints(), vec![&ep("b")]);
    match &err {
        DispatchError::Partial { failed, .. } => {
            assert_eq!(failed[0].error, LoadBalancerError::not_ready(&ep("b")));
        }
        other => panic!("expected a partial failure, got {}", other),
    }
    assert_eq!(factory.exporter("a").unwrap().export_count(), 1);
}

#[tokio::test]
async fn test_empty_batch_succeeds_without_exports() {
    let factory = RecordingFactory::new();
    let balancer = static_balancer(&["a"], &factory).await;
    let dispatcher = trace_dispatcher(balancer);

    let report = dispatcher.dispatch(Traces::default(), &DispatchContext::new()).await.unwrap();

    assert!(report.deliveries.is_empty());
    assert_eq!(factory.exporter("a").unwrap().export_count(), 0);
}

#[tokio::test]
async fn test_deadline_aborts_slow_export() {
    let factory = RecordingFactory::new();
    factory.gate_exports(Gate::new());
    let balancer = static_balancer(&["a"], &factory).await;
    let dispatcher = trace_dispatcher(balancer);

    let ctx = DispatchContext::new().with_timeout(Duration::from_millis(50));
    let err = within(dispatcher.dispatch(spans(&[trace_id(1)]), &ctx)).await.unwrap_err();

    match err {
        DispatchError::Partial { delivered, failed } => {
            assert!(delivered.is_empty());
            assert!(matches!(failed[0].error, LoadBalancerError::Timeout { .. }));
            assert_eq!(failed[0].batch.item_count(), 1);
        }
        other => panic!("expected a partial failure, got {}", other),
    }
}

#[tokio::test]
async fn test_cancellation_aborts_export() {
    let factory = RecordingFactory::new();
    let gate = Gate::new();
    factory.gate_exports(Arc::clone(&gate));
    let balancer = static_balancer(&["a"], &factory).await;
    let dispatcher = Arc::new(trace_dispatcher(balancer));

    let token = CancellationToken::new();
    let ctx = DispatchContext::new().with_cancellation(token.clone());
    let task = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.dispatch(spans(&[trace_id(1)]), &ctx).await })
    };

    within(gate.entered()).await;
    token.cancel();

    let err = within(task).await.unwrap().unwrap_err();
    match err {
        DispatchError::Partial { failed, .. } => {
            assert_eq!(failed[0].error, LoadBalancerError::Cancelled);
        }
        other => panic!("expected a partial failure, got {}", other),
    }
}

#[tokio::test]
async fn test_default_timeout_applies_without_deadline() {
    let factory = RecordingFactory::new();
    factory.gate_exports(Gate::new());
    let balancer = static_balancer(&["a"], &factory).await;
    let dispatcher = trace_dispatcher(balancer).with_default_timeout(Some(Duration::from_millis(20)));

    let err = within(dispatcher.dispatch(spans(&[trace_id(7)]), &DispatchContext::new()))
        .await
        .unwrap_err();

    match err {
        DispatchError::Partial { failed, .. } => {
            assert_eq!(failed[0].error, LoadBalancerError::Timeout { timeout_ms: 20 });
        }
        other => panic!("expected a partial failure, got {}", other),
    }
}

#[tokio::test]
async fn test_logs_with_and_without_trace_id_are_delivered() {
    let factory = RecordingFactory::<Logs>::new();
    let balancer = static_balancer(&["a", "b"], &factory).await;
    let dispatcher = Dispatcher::new(LogAdapter, balancer, LoadBalancerTelemetry::noop());

    let records = vec![
        LogRecord::new("correlated").with_trace_id(trace_id(1)),
        LogRecord::new("uncorrelated"),
        LogRecord::new("also uncorrelated"),
    ];
    let logs = Logs::single(Resource::for_service("api"), InstrumentationScope::default(), records);

    let report = dispatcher.dispatch(logs, &DispatchContext::new()).await.unwrap();
    assert_eq!(report.item_count(), 3);

    // Both uncorrelated records share the fallback endpoint
    let fallback = dispatcher.balancer().ring().locate(&loadbalancing_exporter::RoutingKey::EMPTY).unwrap().clone();
    let fallback_exporter = factory.exporter(fallback.as_str()).unwrap();
    let uncorrelated = fallback_exporter
        .batches()
        .iter()
        .flat_map(|batch| batch.items().map(|(_, record)| record.trace_id.is_empty()).collect::<Vec<_>>())
        .filter(|empty| *empty)
        .count();
    assert_eq!(uncorrelated, 2);
}

#[tokio::test]
async fn test_two_traces_on_two_endpoints_give_two_exports() {
    let factory = RecordingFactory::new();
    let balancer = static_balancer(&["a", "b"], &factory).await;
    let ring = balancer.ring();
    let dispatcher = trace_dispatcher(Arc::clone(&balancer));

    let first = (0..1000).map(trace_id).find(|id| ring.locate(&id.routing_key().unwrap()).unwrap().as_str() == "a").unwrap();
    let second = (0..1000).map(trace_id).find(|id| ring.locate(&id.routing_key().unwrap()).unwrap().as_str() == "b").unwrap();

    dispatcher
        .dispatch(spans(&[first, second, first]), &DispatchContext::new())
        .await
        .unwrap();

    let exports = factory.exporter("a").unwrap().export_count() + factory.exporter("b").unwrap().export_count();
    assert_eq!(exports, 2);
}

#[tokio::test]
async fn test_metrics_route_by_resource() {
    let factory = RecordingFactory::<Metrics>::new();
    let balancer = static_balancer(&["a", "b", "c"], &factory).await;
    let dispatcher = Dispatcher::new(MetricAdapter::default(), balancer, LoadBalancerTelemetry::noop());

    let group = |service: &str| {
        ResourceGroup::new(
            Resource::for_service(service),
            vec![ScopeGroup::new(
                InstrumentationScope::new("runtime", "1.0"),
                vec![
                    Metric::gauge("heap", vec![NumberDataPoint::new(NumberValue::Int(10))]),
                    Metric::sum("requests", vec![NumberDataPoint::new(NumberValue::Double(1.5))], true),
                ],
            )],
        )
    };
    let services: Vec<String> = (0..10).map(|n| format!("service-{}", n)).collect();
    let batch = Metrics::new(services.iter().map(|service| group(service)).collect());

    let report = dispatcher.dispatch(batch, &DispatchContext::new()).await.unwrap();
    assert_eq!(report.item_count(), 20);

    // Every resource lands on exactly one endpoint with both of its metrics
    for endpoint in ["a", "b", "c"] {
        if let Some(exporter) = factory.exporter(endpoint) {
            for batch in exporter.batches() {
                for group in &batch.resource_groups {
                    let metrics: usize = group.scope_groups.iter().map(|sg| sg.items.len()).sum();
                    assert_eq!(metrics, 2);
                }
            }
        }
    }
}

#[tokio::test]
async fn test_backend_outcome_metrics_are_recorded() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let telemetry = LoadBalancerTelemetry::with_recorder(Arc::new(recorder));

    let factory = RecordingFactory::new();
    factory.fail_exports("only-fails");
    let balancer = static_balancer(&["only-fails"], &factory).await;
    let dispatcher = Dispatcher::new(TraceAdapter::default(), balancer, telemetry);

    let _ = dispatcher.dispatch(spans(&[trace_id(1)]), &DispatchContext::new()).await;

    let rendered = handle.render();
    assert!(rendered.contains(r#"loadbalancer_backend_outcome{endpoint="only-fails",success="false"} 1"#));
    assert!(rendered.contains("loadbalancer_backend_latency"));
}

#[tokio::test]
async fn test_many_concurrent_dispatches() {
    let factory = RecordingFactory::new();
    let balancer = static_balancer(&["a", "b", "c", "d"], &factory).await;
    let dispatcher = Arc::new(trace_dispatcher(balancer));

    let tasks: Vec<_> = (0..20u64)
        .map(|round| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let ids: Vec<TraceId> = (round * 50..(round + 1) * 50).map(trace_id).collect();
                dispatcher.dispatch(spans(&ids), &DispatchContext::new()).await
            })
        })
        .collect();

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap().unwrap().item_count();
    }
    assert_eq!(total, 1000);

    let exported: usize = eps(&["a", "b", "c", "d"])
        .iter()
        .filter_map(|endpoint| factory.exporter(endpoint.as_str()))
        .flat_map(|exporter| exporter.batches())
        .map(|batch| batch.item_count())
        .sum();
    assert_eq!(exported, 1000);
}
