mod helpers;

use helpers::{apache_collector, read_data, FQDN};
use ondemand_exporter::apache::{ApacheCollector, ApacheError, ConnectionCounts, StatusSource};
use std::io::Write;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn status_server(template: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/server-status"))
        .respond_with(template)
        .mount(&server)
        .await;
    server
}

fn fixture_counts() -> ConnectionCounts {
    ConnectionCounts {
        websocket_connections: 5,
        unique_websocket_clients: 3,
        client_connections: 63,
        unique_client_connections: 38,
    }
}

#[tokio::test]
async fn test_status_page_fixture_counts() {
    let server = status_server(ResponseTemplate::new(200).set_body_string(read_data("apache/server-status.html"))).await;
    let collector = apache_collector(&format!("{}/server-status", server.uri()));

    let counts = collector.collect().await.unwrap();

    assert_eq!(counts, fixture_counts());
}

#[tokio::test]
async fn test_collect_is_idempotent() {
    let server = status_server(ResponseTemplate::new(200).set_body_string(read_data("apache/server-status.html"))).await;
    let collector = apache_collector(&format!("{}/server-status", server.uri()));

    let first = collector.collect().await.unwrap();
    let second = collector.collect().await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_non_ok_status_is_an_error_with_body() {
    let server = status_server(ResponseTemplate::new(403).set_body_string("Forbidden by mod_status ACL")).await;
    let collector = apache_collector(&format!("{}/server-status", server.uri()));

    let err = collector.collect().await.unwrap_err();

    match err {
        ApacheError::Status { status, body } => {
            assert_eq!(status.as_u16(), 403);
            assert_eq!(body, "Forbidden by mod_status ACL");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreachable_status_url_is_a_request_error() {
    let collector = apache_collector("http://127.0.0.1:1/server-status");
    let err = collector.collect().await.unwrap_err();
    assert!(matches!(err, ApacheError::Request { .. }));
}

#[tokio::test]
async fn test_status_url_derived_from_portal_config() {
    let server = status_server(ResponseTemplate::new(200).set_body_string(read_data("apache/server-status.html"))).await;
    let host = server.uri().trim_start_matches("http://").to_string();

    let mut portal = NamedTempFile::new().unwrap();
    writeln!(portal, "servername: {host}\nport: 80").unwrap();

    let collector = ApacheCollector::new(
        StatusSource {
            explicit_url: None,
            portal_config_path: portal.path().to_path_buf(),
        },
        true,
    )
    .unwrap()
    .with_hostname(FQDN);

    assert_eq!(collector.status_url().await, format!("http://{host}/server-status"));
    assert_eq!(collector.collect().await.unwrap(), fixture_counts());
}
