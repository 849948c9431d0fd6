use std::collections::HashSet;
use std::time::Duration;

use httpmock::MockServer;
use metrics_util::debugging::DebuggingRecorder;
use varnish_xkey::application::ttl::TtlResolver;
use varnish_xkey::domain::{
    keys::CacheTag,
    layout::{ContentItem, LayoutKind, LayoutNode, Section},
    purge::PurgeTarget,
    ttl::TtlTable,
};
use varnish_xkey::infra::purge::{BroadcastConfig, HttpPurgeBroadcaster};

#[tokio::test]
async fn purge_and_ttl_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Broadcast outcome + latency
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/superot_1");
            then.status(200);
        })
        .await;
    let target = PurgeTarget::parse(&server.address().to_string()).expect("target");
    let broadcaster = HttpPurgeBroadcaster::new(BroadcastConfig::new(
        vec![target.clone()],
        Duration::from_secs(2),
    ))
    .expect("client");
    let report = broadcaster
        .broadcast(&CacheTag::raw("superot_1").expect("tag"), &[target])
        .await
        .expect("dispatched");
    assert!(report.is_success());

    // TTL resolution source
    let resolver = TtlResolver::new(TtlTable::new(600).with_layout("weather", 60));
    let item = ContentItem::new(1_u64)
        .with_section(Section::new(vec![LayoutNode::new(LayoutKind::Weather)]));
    assert_eq!(resolver.resolve(Some(&item)), 60);
    assert_eq!(resolver.resolve(None), 600);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "varnish_xkey_purge_total",
        "varnish_xkey_purge_ms",
        "varnish_xkey_ttl_resolved_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
