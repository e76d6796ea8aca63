#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Destination validation tests with a table-driven resolver.

use std::sync::Arc;

use egress::error::{DnsError, DnsFailureKind, ErrorKind, ValidationError};
use egress::validate::{Scheme, Validator};
use egress_test_utils::{StaticResolver, ip};

fn validator(resolver: &StaticResolver) -> Validator {
    Validator::new(Arc::new(resolver.clone()))
}

#[tokio::test]
async fn test_any_private_answer_is_rebinding() {
    let resolver = StaticResolver::new().with("example.com", &["1.2.3.4", "127.0.0.1"]);

    let err = validator(&resolver)
        .validate_resolved("https://example.com/webhook")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RebindingDetected);
    assert_eq!(
        err.to_string(),
        "domain example.com resolves to private IP address: 127.0.0.1"
    );
}

#[tokio::test]
async fn test_private_ipv6_answer_is_rebinding() {
    let resolver =
        StaticResolver::new().with("example.com", &["93.184.216.34", "::ffff:169.254.169.254"]);

    let err = validator(&resolver)
        .validate_resolved("http://example.com/")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::RebindingDetected {
            host: "example.com".to_string(),
            ip: ip("::ffff:169.254.169.254"),
        }
    );
}

#[tokio::test]
async fn test_first_public_answer_is_selected() {
    let resolver = StaticResolver::new().with("example.com", &["1.2.3.4", "5.6.7.8"]);

    let destination = validator(&resolver)
        .validate_resolved("http://example.com/webhook")
        .await
        .unwrap();

    assert_eq!(destination.resolved_ip(), ip("1.2.3.4"));
    assert_eq!(destination.scheme(), Scheme::Http);
    assert!(!destination.is_bracketed());
    assert_eq!(destination.original_url().as_str(), "http://example.com/webhook");
}

#[tokio::test]
async fn test_ipv6_answer_is_bracketed() {
    let resolver = StaticResolver::new().with("v6.example.com", &["2606:4700::1111"]);

    let destination = validator(&resolver)
        .validate_resolved("https://v6.example.com/")
        .await
        .unwrap();
    assert!(destination.is_bracketed());
    assert_eq!(destination.ip_host(), "[2606:4700::1111]");
}

#[tokio::test]
async fn test_resolver_failures_fail_closed() {
    let resolver = StaticResolver::new().with_error(
        "flaky.example",
        DnsError::Upstream {
            host: "flaky.example".to_string(),
            message: "HTTP 502".to_string(),
        },
    );
    let v = validator(&resolver);

    let err = v.validate_resolved("https://flaky.example/").await.unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::DnsResolutionFailure(DnsFailureKind::UpstreamFailure)
    );

    let err = v.validate_resolved("https://unknown.example/").await.unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::DnsResolutionFailure(DnsFailureKind::NoRecords)
    );
}

#[tokio::test]
async fn test_literal_and_rejected_hosts_are_not_resolved() {
    let resolver = StaticResolver::new();
    let v = validator(&resolver);

    let destination = v.validate_resolved("https://8.8.8.8/webhook").await.unwrap();
    assert_eq!(destination.resolved_ip(), ip("8.8.8.8"));

    for url in [
        "http://127.0.0.1/",
        "http://169.254.169.254/latest/meta-data/",
        "http://0x7f000001/",
        "http://localhost:3000/",
        "ftp://example.com/",
    ] {
        assert!(v.validate_resolved(url).await.is_err(), "{url} must be rejected");
    }

    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn test_configured_restrictions_apply_before_resolution() {
    let resolver = StaticResolver::new().with("vault.corp.example", &["1.2.3.4"]);
    let v = validator(&resolver).with_restricted_hostnames(["corp.example"]);

    let err = v
        .validate_resolved("https://vault.corp.example/")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RestrictedHostname);
    assert_eq!(resolver.calls(), 0);
}

#[test]
fn test_syntax_check_needs_no_resolver() {
    let checked = egress::validate_syntax("https://Example.COM:8443/path").unwrap();
    assert_eq!(
        checked.host(),
        &egress::CheckedHost::Domain("example.com".to_string())
    );
    assert_eq!(checked.url().port(), Some(8443));

    let err = egress::validate_syntax("http://[fe80::1]/").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PrivateAddress);

    let err = egress::validate_syntax("http://[fc00::1]:8080/").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PrivateAddress);
}
