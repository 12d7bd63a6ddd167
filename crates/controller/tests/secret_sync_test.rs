//! TLS secret convergence and scheduler behavior against a fake cluster API

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use certinel::kube::resources::{Certificate, CertificateEvent, CertificateSpec, EventType, ObjectMeta};
use certinel::kube::KubeClient;
use certinel::{AccountStore, DnsBinding, Reconciler, Scheduler};

fn certificate(domain: &str, namespace: &str) -> Certificate {
    Certificate {
        metadata: ObjectMeta {
            name: domain.replace('.', "-"),
            namespace: Some(namespace.to_string()),
        },
        spec: CertificateSpec {
            domain: domain.to_string(),
            email: "admin@example.com".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn small_key_record(domain: &str) -> certinel::acme::AccountRecord {
    let mut rng = rand::thread_rng();
    certinel::acme::AccountRecord {
        domain: domain.to_string(),
        email: "admin@example.com".to_string(),
        registration: certinel::acme::Registration::default(),
        account_key: rsa::RsaPrivateKey::new(&mut rng, 512).unwrap(),
        certificate_key: rsa::RsaPrivateKey::new(&mut rng, 512).unwrap(),
        certificate: Some(b"chain".to_vec()),
        certificate_url: Some("https://ca.example/cert/1".to_string()),
        issued_at: None,
    }
}

fn reconciler_on(kube: &MockServer, dir: &tempfile::TempDir) -> Reconciler {
    let store = AccountStore::open(&dir.path().join("data.db")).unwrap();
    let kube_client = KubeClient::new(&kube.uri()).unwrap();
    Reconciler::new(
        store,
        kube_client,
        "https://ca.example/directory",
        DnsBinding::Exec,
    )
}

// ============================================================================
// Secret write discipline
// ============================================================================

mod secret_discipline {
    use super::*;

    #[tokio::test]
    async fn test_missing_secret_is_created() {
        let kube = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/web/secrets/example.com"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&kube)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/web/secrets"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&kube)
            .await;

        let client = KubeClient::new(&kube.uri()).unwrap();
        client
            .sync_tls_secret(&certificate("example.com", "web"), b"cert", b"key")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_matching_secret_is_left_alone() {
        let kube = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/web/secrets/example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {"name": "example.com", "namespace": "web"},
                "data": {
                    "tls.crt": BASE64.encode(b"cert"),
                    "tls.key": BASE64.encode(b"key"),
                },
                "type": "kubernetes.io/tls",
            })))
            .expect(1)
            .mount(&kube)
            .await;
        // No PUT or POST mock: any write would 404 and error the call

        let client = KubeClient::new(&kube.uri()).unwrap();
        client
            .sync_tls_secret(&certificate("example.com", "web"), b"cert", b"key")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drifted_secret_is_updated() {
        let kube = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/web/secrets/example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {"name": "example.com", "namespace": "web"},
                "data": {
                    "tls.crt": BASE64.encode(b"stale-cert"),
                    "tls.key": BASE64.encode(b"key"),
                },
                "type": "kubernetes.io/tls",
            })))
            .expect(1)
            .mount(&kube)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/namespaces/web/secrets/example.com"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&kube)
            .await;

        let client = KubeClient::new(&kube.uri()).unwrap();
        client
            .sync_tls_secret(&certificate("example.com", "web"), b"cert", b"key")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_status_is_an_error() {
        let kube = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/web/secrets/example.com"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&kube)
            .await;

        let client = KubeClient::new(&kube.uri()).unwrap();
        let err = client
            .sync_tls_secret(&certificate("example.com", "web"), b"cert", b"key")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_delete_tolerates_absent_secret() {
        let kube = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/web/secrets/example.com"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&kube)
            .await;

        let client = KubeClient::new(&kube.uri()).unwrap();
        client.delete_tls_secret("web", "example.com").await.unwrap();
    }
}

// ============================================================================
// Input secrets for the DNS binding
// ============================================================================

mod binding_secrets {
    use super::*;

    #[tokio::test]
    async fn test_provider_config_is_base64_decoded() {
        let kube = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/secrets/dns-credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {"name": "dns-credentials", "namespace": "default"},
                "data": {"config.json": BASE64.encode(b"{\"token\":\"secret\"}")},
            })))
            .mount(&kube)
            .await;

        let client = KubeClient::new(&kube.uri()).unwrap();
        let config = client
            .dns_provider_config("default", "dns-credentials", "config.json")
            .await
            .unwrap();
        assert_eq!(config, b"{\"token\":\"secret\"}");
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let kube = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/secrets/dns-credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"other-key": "eA=="},
            })))
            .mount(&kube)
            .await;

        let client = KubeClient::new(&kube.uri()).unwrap();
        let err = client
            .dns_provider_config("default", "dns-credentials", "config.json")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }
}

// ============================================================================
// Deletion semantics
// ============================================================================

mod deletion {
    use super::*;

    #[tokio::test]
    async fn test_delete_keeps_account_record() {
        let kube = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/secrets/example.com"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&kube)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_on(&kube, &dir);
        reconciler.store().save(&small_key_record("example.com")).unwrap();

        reconciler
            .delete(&certificate("example.com", "default"))
            .await
            .unwrap();

        // A re-added certificate must not burn CA registration quota
        assert!(reconciler.store().find("example.com").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_removes_account_and_secret() {
        let kube = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/secrets/example.com"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&kube)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_on(&kube, &dir);
        reconciler.store().save(&small_key_record("example.com")).unwrap();

        reconciler
            .purge(&certificate("example.com", "default"))
            .await
            .unwrap();

        assert!(reconciler.store().find("example.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_event_for_unknown_domain_is_noop() {
        let kube = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/secrets/never-seen.example.com"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&kube)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(reconciler_on(&kube, &dir));
        let scheduler = Scheduler::new(reconciler, Duration::from_secs(120));

        let event = CertificateEvent {
            event_type: EventType::Deleted,
            object: certificate("never-seen.example.com", "default"),
        };
        scheduler.handle_event(event).await.unwrap();
    }
}

// ============================================================================
// Scheduler
// ============================================================================

mod scheduler {
    use super::*;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_sweep_over_empty_desired_set() {
        let kube = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/certinel.dev/v1/certificates"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})),
            )
            .expect(1)
            .mount(&kube)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(reconciler_on(&kube, &dir));
        let scheduler = Scheduler::new(reconciler, Duration::from_secs(120));

        scheduler.sweep().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_surfaces_list_failure() {
        let kube = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/certinel.dev/v1/certificates"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&kube)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(reconciler_on(&kube, &dir));
        let scheduler = Scheduler::new(reconciler, Duration::from_secs(120));

        assert!(scheduler.sweep().await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_loop_exits_on_shutdown() {
        let kube = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(reconciler_on(&kube, &dir));
        let scheduler = Arc::new(Scheduler::new(reconciler, Duration::from_secs(3600)));

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = {
            let scheduler = Arc::clone(&scheduler);
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { scheduler.run_sweeps(shutdown).await })
        };

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweep loop should exit after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_event_loop_exits_on_shutdown() {
        let kube = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(reconciler_on(&kube, &dir));
        let scheduler = Arc::new(Scheduler::new(reconciler, Duration::from_secs(3600)));

        let (_event_tx, event_rx) = tokio::sync::mpsc::channel(8);
        let (_error_tx, error_rx) = tokio::sync::mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = {
            let scheduler = Arc::clone(&scheduler);
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { scheduler.run_events(event_rx, error_rx, shutdown).await })
        };

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("event loop should exit after shutdown")
            .unwrap();
    }
}
