use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use vigil_notify::{
    AlertDispatcher, AlertsConfig, ChannelConfig, ChannelTransport, DedupConfig, DispatchOutcome,
    RetryConfig, SlackConfig, WebhookConfig,
};
use vigil_types::{
    Comparator, Finding, Report, Resource, ResourceSection, Severity, StatisticKind, ThresholdRule,
    TimeWindow,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn critical_report() -> Report {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let rule = ThresholdRule::metric(
        "cpu-critical",
        "highCpuCount",
        "CPUUtilization",
        StatisticKind::Avg,
        Comparator::Gt,
        90.0,
        Severity::Critical,
    );
    let finding = Finding::from_threshold("i-web-1", &rule, 97.5, now);

    let mut counts_by_severity = BTreeMap::new();
    counts_by_severity.insert(Severity::Critical, 1);
    let mut counts_by_category = BTreeMap::new();
    counts_by_category.insert("highCpuCount".to_string(), 1);

    Report {
        generated_at: now,
        window: TimeWindow::lookback(now, 24, 300),
        regions: vec!["us-east-1".to_string()],
        thresholds_used: vec![rule],
        resources: vec![ResourceSection {
            resource: Resource::new("i-web-1", "instance", "us-east-1").reference(),
            effective_severity: Some(Severity::Critical),
            findings: vec![finding],
            data_gaps: vec![],
        }],
        operations: vec![],
        scope_gaps: vec![],
        counts_by_severity,
        counts_by_category,
        recommendations: vec![],
        tagging: None,
    }
}

fn alerts_config(channels: Vec<ChannelConfig>, dedup: DedupConfig) -> AlertsConfig {
    AlertsConfig {
        channels,
        dedup,
        retry: RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
        },
        max_findings_per_alert: 20,
    }
}

fn webhook_channel(server: &MockServer) -> ChannelConfig {
    let mut headers = BTreeMap::new();
    headers.insert("X-Vigil-Token".to_string(), "secret".to_string());
    ChannelConfig {
        name: "pager".to_string(),
        min_severity: Severity::Warning,
        transport: ChannelTransport::Webhook(WebhookConfig {
            url: format!("{}/hooks/vigil", server.uri()),
            headers,
        }),
    }
}

#[tokio::test]
async fn unreachable_channel_does_not_block_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/vigil"))
        .and(header("X-Vigil-Token", "secret"))
        .and(body_partial_json(serde_json::json!({
            "severity": "CRITICAL",
            "findings": 1
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let slack = ChannelConfig {
        name: "ops-slack".to_string(),
        min_severity: Severity::Info,
        transport: ChannelTransport::Slack(SlackConfig {
            webhook_url: "http://127.0.0.1:1/services/unreachable".to_string(),
        }),
    };
    let config = alerts_config(
        vec![slack, webhook_channel(&server)],
        DedupConfig {
            enabled: false,
            ..DedupConfig::default()
        },
    );

    let dispatcher = AlertDispatcher::from_config(&config);
    let records = dispatcher.dispatch(&critical_report()).await;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].channel, "ops-slack");
    assert!(matches!(records[0].outcome, DispatchOutcome::Failed { .. }));
    assert_eq!(records[1].channel, "pager");
    assert_eq!(records[1].outcome, DispatchOutcome::Sent);
}

#[tokio::test]
async fn server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/vigil"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let config = alerts_config(
        vec![webhook_channel(&server)],
        DedupConfig {
            enabled: false,
            ..DedupConfig::default()
        },
    );

    let records = AlertDispatcher::from_config(&config)
        .dispatch(&critical_report())
        .await;

    match &records[0].outcome {
        DispatchOutcome::Failed { error } => assert!(error.contains("502")),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn repeated_run_is_suppressed_by_state_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/vigil"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dedup = DedupConfig {
        enabled: true,
        state_path: dir.path().join("alert-state.json"),
        cooldown_minutes: 60,
    };
    let config = alerts_config(vec![webhook_channel(&server)], dedup);
    let report = critical_report();

    // 每次运行重新加载状态文件，模拟两次独立的进程
    let first = AlertDispatcher::from_config(&config)
        .dispatch_at(&report, report.generated_at)
        .await;
    let second = AlertDispatcher::from_config(&config)
        .dispatch_at(&report, report.generated_at + chrono::Duration::minutes(15))
        .await;

    assert_eq!(first[0].outcome, DispatchOutcome::Sent);
    assert_eq!(second[0].outcome, DispatchOutcome::Suppressed);
    assert!(dir.path().join("alert-state.json").exists());
}
