use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    classifier::ErrorClass,
    client::SelectedEndpoints,
    codec::sha256_hex,
    config::RelayConfig,
    metadata::{BlobMetadata, ContentId, ExpectedMetadata, IDENTIFIER_KEY},
    network::{NetworkError, StorageConfiguration},
    retrieval::Verification,
    testing::{
        client,
        config,
        not_found,
        payload,
        status,
        tags_for,
        timeout,
        CallKind,
        MemoryNetwork,
        AGGREGATOR,
        PUBLISHER,
        RELAY,
    },
    upload::SignerContext,
    BlobError,
    BlobStorageClient,
};

fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(10),
        "expected ~{expected:?}, got {actual:?}"
    );
}

#[tokio::test]
async fn test_store_then_retrieve_round_trip() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let data = payload(2048);
    let metadata = BlobMetadata::new()
        .with(IDENTIFIER_KEY, "img_42")
        .with("album", "summer");

    let stored = client
        .store_with(
            data.clone(),
            metadata,
            &SignerContext {
                send_object_to: Some("0xabc".to_string()),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(stored.writes, 1);
    assert_eq!(
        stored.configuration,
        StorageConfiguration {
            epochs: 1,
            deletable: true
        }
    );
    let put = &network.calls(CallKind::Put)[0];
    assert_eq!(put.endpoint, PUBLISHER);
    assert_eq!(put.send_object_to.as_deref(), Some("0xabc"));

    let blob = client.retrieve(&stored.content_id, None).await.unwrap();
    assert_eq!(blob.payload, data);
    assert_eq!(blob.verification, Verification::Verified);
    assert_eq!(blob.strategy, "container-listing");
    assert_eq!(blob.metadata.get("album"), Some("summer"));
    assert_eq!(blob.metadata.hash(), Some(sha256_hex(&data).as_str()));
    assert_eq!(blob.metadata.size_bytes(), Some(2048));

    let blob = client
        .retrieve(
            &stored.content_id,
            Some(ExpectedMetadata::identifier("img_42")),
        )
        .await
        .unwrap();
    assert_eq!(blob.payload, data);
    assert!(blob.verification.is_trusted());
    assert_eq!(network.call_count(CallKind::PutViaRelay), 0);
}

#[tokio::test]
async fn test_round_trip_of_empty_payload() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let id = client.store(Bytes::new(), BlobMetadata::new()).await.unwrap();
    let blob = client.retrieve(&id, None).await.unwrap();
    assert!(blob.payload.is_empty());
    assert_eq!(blob.verification, Verification::Verified);
}

#[tokio::test]
async fn test_configured_owner_used_without_signer() {
    let network = MemoryNetwork::new();
    let mut config = config();
    config.send_object_to = Some("0xdefault".to_string());
    let client = client(&network, config);
    client.store(payload(16), BlobMetadata::new()).await.unwrap();
    let put = &network.calls(CallKind::Put)[0];
    assert_eq!(put.send_object_to.as_deref(), Some("0xdefault"));
}

#[tokio::test(start_paused = true)]
async fn test_store_exhausts_attempts_with_backoff() {
    let network = MemoryNetwork::new();
    network.fail_always(CallKind::Put, status(500, "too many failures"));
    let client = client(&network, config());

    let err = client
        .store(payload(64), BlobMetadata::new())
        .await
        .unwrap_err();
    match &err {
        BlobError::StorageUnavailable {
            class, attempts, ..
        } => {
            assert_eq!(*class, ErrorClass::TransientNode);
            assert_eq!(*attempts, 5);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.class(), "storage-unavailable");
    assert!(err.hint().is_some());

    let writes = network.calls(CallKind::Put);
    let epochs: Vec<u32> = writes
        .iter()
        .map(|c| c.configuration.unwrap().epochs)
        .collect();
    assert_eq!(epochs, vec![1, 1, 1, 2, 2, 4, 4, 5, 5]);

    let mut rounds: Vec<Instant> = writes.iter().map(|c| c.at).collect();
    rounds.dedup();
    assert_eq!(rounds.len(), 5);
    let gaps: Vec<Duration> = rounds.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, secs) in gaps.iter().zip([2, 4, 8, 8]) {
        assert_close(*gap, Duration::from_secs(secs));
    }
}

#[tokio::test(start_paused = true)]
async fn test_store_recovers_after_transient_failure() {
    let network = MemoryNetwork::new();
    network.fail_next(CallKind::Put, timeout(PUBLISHER));
    let client = client(&network, config());

    let start = Instant::now();
    let stored = client
        .store_with(
            payload(64),
            BlobMetadata::new(),
            &SignerContext::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(stored.writes, 2);
    assert_close(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_balance_short_circuits_retries() {
    let network = MemoryNetwork::new();
    network.fail_always(
        CallKind::Put,
        status(
            500,
            "could not find WAL coins with sufficient balance: required 120000 FROST",
        ),
    );
    let client = client(&network, config());

    let start = Instant::now();
    let err = client
        .store(payload(64), BlobMetadata::new())
        .await
        .unwrap_err();
    match &err {
        BlobError::BalanceInsufficient { required, hint } => {
            assert_eq!(required.as_deref(), Some("120000 FROST"));
            assert!(!hint.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(network.call_count(CallKind::Put), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn test_fatal_write_is_not_retried() {
    let network = MemoryNetwork::new();
    network.fail_always(CallKind::Put, status(400, "malformed multipart body"));
    let client = client(&network, config());
    let err = client
        .store(payload(64), BlobMetadata::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), "fatal");
    assert_eq!(network.call_count(CallKind::Put), 1);
}

fn relay_config() -> crate::BlobClientConfig {
    let mut config = config();
    config.relay = Some(RelayConfig {
        url: RELAY.to_string(),
        max_tip: Some(1_000),
    });
    config
}

#[tokio::test(start_paused = true)]
async fn test_relay_fault_falls_back_to_direct_write() {
    let network = MemoryNetwork::new();
    network.fail_next(
        CallKind::PutViaRelay,
        status(400, "invalid tip: nonce already used"),
    );
    let client = client(&network, relay_config());

    let stored = client
        .store_with(
            payload(64),
            BlobMetadata::new(),
            &SignerContext::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(stored.writes, 2);
    assert!(client.relay_degraded());

    let relay_call = &network.calls(CallKind::PutViaRelay)[0];
    let direct_call = &network.calls(CallKind::Put)[0];
    assert_eq!(relay_call.tip, Some(1_000));
    assert_eq!(relay_call.configuration, direct_call.configuration);
    assert_eq!(relay_call.at, direct_call.at);

    // Degraded: the next store goes straight to the publisher.
    client.store(payload(32), BlobMetadata::new()).await.unwrap();
    assert_eq!(network.call_count(CallKind::PutViaRelay), 1);
    assert_eq!(network.call_count(CallKind::Put), 2);

    client.reset_relay();
    assert!(!client.relay_degraded());
    client.store(payload(32), BlobMetadata::new()).await.unwrap();
    assert_eq!(network.call_count(CallKind::PutViaRelay), 2);
    assert_eq!(network.call_count(CallKind::Put), 2);
}

#[tokio::test]
async fn test_relay_connection_failure_is_a_relay_fault() {
    let network = MemoryNetwork::new();
    network.fail_next(
        CallKind::PutViaRelay,
        NetworkError::Connect {
            endpoint: RELAY.to_string(),
            message: "dns error: failed to lookup address information".to_string(),
        },
    );
    let client = client(&network, relay_config());
    client.store(payload(64), BlobMetadata::new()).await.unwrap();
    assert!(client.relay_degraded());
    assert_eq!(network.call_count(CallKind::Put), 1);
}

#[tokio::test]
async fn test_relay_success_keeps_relay_healthy() {
    let network = MemoryNetwork::new();
    let client = client(&network, relay_config());
    client.store(payload(64), BlobMetadata::new()).await.unwrap();
    client.store(payload(64), BlobMetadata::new()).await.unwrap();
    assert!(!client.relay_degraded());
    assert_eq!(network.call_count(CallKind::PutViaRelay), 2);
    assert_eq!(network.call_count(CallKind::Put), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_backoff() {
    let network = MemoryNetwork::new();
    network.fail_always(CallKind::Put, status(503, "Service Unavailable"));
    let client = client(&network, config());
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    };
    let signer = SignerContext::default();
    let start = Instant::now();
    let (result, ()) = tokio::join!(
        client.store_with(
            payload(8),
            BlobMetadata::new(),
            &signer,
            &cancel
        ),
        canceller
    );
    assert!(matches!(result, Err(BlobError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(network.call_count(CallKind::Put), 1);
}

#[tokio::test]
async fn test_cancelled_retrieve_makes_no_calls() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = client
        .retrieve_with(&ContentId::new("quilt-1"), None, &cancel)
        .await;
    assert!(matches!(result, Err(BlobError::Cancelled)));
    assert_eq!(network.call_count(CallKind::List), 0);
}

fn three_files() -> (ContentId, std::sync::Arc<MemoryNetwork>, [Bytes; 3]) {
    let network = MemoryNetwork::new();
    let files = [
        Bytes::from("first file ".repeat(40)),
        Bytes::from("second file ".repeat(40)),
        Bytes::from("third file ".repeat(40)),
    ];
    let id = network.insert_container(vec![
        ("img_41", files[0].clone(), tags_for("img_41", &files[0])),
        ("img_42", files[1].clone(), tags_for("img_42", &files[1])),
        ("img_43", files[2].clone(), tags_for("img_43", &files[2])),
    ]);
    (id, network, files)
}

#[tokio::test]
async fn test_container_disambiguated_by_identifier() {
    let (id, network, files) = three_files();
    let client = client(&network, config());
    let blob = client
        .retrieve(&id, Some(ExpectedMetadata::identifier("img_42")))
        .await
        .unwrap();
    assert_eq!(blob.payload, files[1]);
    assert_eq!(blob.metadata.identifier(), Some("img_42"));
    assert_eq!(blob.verification, Verification::Verified);
    assert_eq!(network.call_count(CallKind::ReadEntry), 1);
}

#[tokio::test]
async fn test_container_disambiguated_by_hash() {
    let (id, network, files) = three_files();
    let client = client(&network, config());
    let blob = client
        .retrieve(&id, Some(ExpectedMetadata::hash(sha256_hex(&files[1]))))
        .await
        .unwrap();
    assert_eq!(blob.payload, files[1]);
    assert_eq!(network.call_count(CallKind::ReadEntry), 3);
}

#[tokio::test]
async fn test_ambiguous_container_is_not_guessed() {
    let (id, network, _) = three_files();
    let client = client(&network, config());
    let err = client
        .retrieve(&id, Some(ExpectedMetadata::identifier("img_99")))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobError::NotFound { .. }));
    assert_eq!(network.call_count(CallKind::ReadByIdentifier), 1);
}

#[tokio::test]
async fn test_legacy_raw_blob_without_fingerprint() {
    let network = MemoryNetwork::new();
    let legacy = Bytes::from_static(b"ciphertext stored before fingerprints existed");
    let id = network.insert_raw(legacy.clone());
    let client = client(&network, config());

    let blob = client.retrieve(&id, None).await.unwrap();
    assert_eq!(blob.payload, legacy);
    assert_eq!(blob.verification, Verification::Unrecorded);
    assert_eq!(blob.strategy, "raw-blob");
    assert!(blob.metadata.hash().is_none());
}

#[tokio::test]
async fn test_legacy_container_entry_without_hash() {
    let network = MemoryNetwork::new();
    let legacy = Bytes::from_static(b"old entry");
    let id = network.insert_container(vec![("old", legacy.clone(), BlobMetadata::new())]);
    let client = client(&network, config());

    let blob = client
        .retrieve(&id, Some(ExpectedMetadata::identifier("old")))
        .await
        .unwrap();
    assert_eq!(blob.payload, legacy);
    assert_eq!(blob.verification, Verification::Unrecorded);
    assert_eq!(blob.metadata.identifier(), Some("old"));
}

#[tokio::test]
async fn test_boundary_corruption_is_repaired() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let data = payload(4096);
    let id = client.store(data.clone(), BlobMetadata::new()).await.unwrap();
    network.corrupt(&id, |bytes| {
        bytes[0] ^= 0xff;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
    });

    let blob = client.retrieve(&id, None).await.unwrap();
    assert_eq!(blob.payload, data);
    assert_eq!(blob.verification, Verification::Repaired);
}

#[tokio::test]
async fn test_body_corruption_returns_unverified_fallback() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let data = payload(4096);
    let id = client.store(data.clone(), BlobMetadata::new()).await.unwrap();
    // Head damage as well: repair must not hide the body damage.
    network.corrupt(&id, |bytes| {
        bytes[0] ^= 0xff;
        bytes[2048] ^= 0xff;
    });

    let blob = client.retrieve(&id, None).await.unwrap();
    assert_eq!(blob.payload.len(), data.len());
    assert_ne!(blob.payload, data);
    match &blob.verification {
        Verification::Unverified { expected, actual } => {
            assert_eq!(expected, &sha256_hex(&data));
            assert_eq!(actual, &sha256_hex(&blob.payload));
        }
        other => panic!("unexpected verification: {other:?}"),
    }
    assert!(!blob.verification.is_trusted());
}

#[tokio::test]
async fn test_repair_disabled_leaves_boundary_corruption_unverified() {
    let network = MemoryNetwork::new();
    let mut config = config();
    config.verification.repair_boundaries = false;
    let client = client(&network, config);
    let id = client.store(payload(4096), BlobMetadata::new()).await.unwrap();
    network.corrupt(&id, |bytes| bytes[0] ^= 0xff);

    let blob = client.retrieve(&id, None).await.unwrap();
    assert!(matches!(blob.verification, Verification::Unverified { .. }));
}

#[tokio::test]
async fn test_strict_mode_rejects_mismatch() {
    let network = MemoryNetwork::new();
    let mut config = config();
    config.verification.strict = true;
    let client = client(&network, config);
    let data = payload(4096);
    let id = client.store(data.clone(), BlobMetadata::new()).await.unwrap();
    network.corrupt(&id, |bytes| bytes[2048] ^= 0xff);

    let err = client.retrieve(&id, None).await.unwrap_err();
    match err {
        BlobError::IntegrityMismatch { expected, .. } => {
            assert_eq!(expected, sha256_hex(&data))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_content_is_not_found() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let err = client
        .retrieve(&ContentId::new("missing"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BlobError::NotFound { .. }));
    assert_eq!(err.class(), "not-found");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_aggregator_is_retryable() {
    let network = MemoryNetwork::new();
    network.fail_always(CallKind::List, timeout(AGGREGATOR));
    network.fail_always(CallKind::ReadRaw, timeout(AGGREGATOR));
    let client = client(&network, config());

    let err = client
        .retrieve(&ContentId::new("quilt-7"), None)
        .await
        .unwrap_err();
    match &err {
        BlobError::StorageUnavailable {
            class, attempts, ..
        } => {
            assert_eq!(*class, ErrorClass::TransientNetwork);
            assert_eq!(*attempts, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_failed_listing_falls_through_to_next_strategy() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let data = payload(600);
    let id = client
        .store(data.clone(), BlobMetadata::new().with(IDENTIFIER_KEY, "doc"))
        .await
        .unwrap();
    network.fail_next(CallKind::List, status(503, "Service Unavailable"));

    let expected = ExpectedMetadata {
        identifier: Some("doc".to_string()),
        hash: Some(sha256_hex(&data)),
    };
    let blob = client.retrieve(&id, Some(expected)).await.unwrap();
    assert_eq!(blob.payload, data);
    assert_eq!(blob.strategy, "file-by-identifier");
    assert_eq!(blob.verification, Verification::Verified);
}

#[tokio::test]
async fn test_fallback_read_checked_against_expected_hash() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let data = payload(600);
    let id = client
        .store(data.clone(), BlobMetadata::new().with(IDENTIFIER_KEY, "doc"))
        .await
        .unwrap();
    network.corrupt(&id, |bytes| bytes[300] ^= 0xff);
    network.fail_next(CallKind::List, status(503, "Service Unavailable"));

    let expected = ExpectedMetadata {
        identifier: Some("doc".to_string()),
        hash: Some(sha256_hex(&data)),
    };
    let blob = client.retrieve(&id, Some(expected)).await.unwrap();
    assert_eq!(blob.strategy, "file-by-identifier");
    assert_ne!(blob.payload, data);
    match &blob.verification {
        Verification::Unverified { expected, actual } => {
            assert_eq!(expected, &sha256_hex(&data));
            assert_eq!(actual, &sha256_hex(&blob.payload));
        }
        other => panic!("unexpected verification: {other:?}"),
    }
}

#[tokio::test]
async fn test_strict_fallback_read_rejects_hash_mismatch() {
    let network = MemoryNetwork::new();
    let mut config = config();
    config.verification.strict = true;
    let client = client(&network, config);
    let data = payload(600);
    let id = client
        .store(data.clone(), BlobMetadata::new().with(IDENTIFIER_KEY, "doc"))
        .await
        .unwrap();
    network.corrupt(&id, |bytes| bytes[300] ^= 0xff);
    network.fail_next(CallKind::List, status(503, "Service Unavailable"));

    let expected = ExpectedMetadata {
        identifier: Some("doc".to_string()),
        hash: Some(sha256_hex(&data)),
    };
    let err = client.retrieve(&id, Some(expected)).await.unwrap_err();
    match err {
        BlobError::IntegrityMismatch { expected, .. } => assert_eq!(expected, sha256_hex(&data)),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_lone_entry_with_other_identifier_is_not_returned() {
    let network = MemoryNetwork::new();
    let other = Bytes::from("someone else's photo ".repeat(20));
    let id = network.insert_container(vec![("img_7", other.clone(), tags_for("img_7", &other))]);
    let client = client(&network, config());

    let err = client
        .retrieve(&id, Some(ExpectedMetadata::identifier("img_42")))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobError::NotFound { .. }));
    assert_eq!(network.call_count(CallKind::ReadByIdentifier), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fastest_publisher_selected_and_reprobed() {
    let network = MemoryNetwork::new();
    let slow = "http://pub-a.test";
    let fast = "http://pub-b.test";
    network.set_probe(slow, Some(Duration::from_millis(200)));
    network.set_probe(fast, Some(Duration::from_millis(20)));
    let mut config = config();
    config.publishers = vec![slow.to_string(), fast.to_string()];
    let client = client(&network, config);

    client.store(payload(16), BlobMetadata::new()).await.unwrap();
    assert_eq!(
        client.selected_endpoints().await.publisher.as_deref(),
        Some(fast)
    );

    // The fast publisher goes away; the retry re-homes onto the slow one.
    network.set_probe(fast, None);
    network.fail_next(CallKind::Put, status(500, "too many failures"));
    client.store(payload(16), BlobMetadata::new()).await.unwrap();
    let endpoints: Vec<String> = network
        .calls(CallKind::Put)
        .into_iter()
        .map(|c| c.endpoint)
        .collect();
    assert_eq!(endpoints, vec![fast, fast, slow]);
    assert_eq!(
        client.selected_endpoints().await.publisher.as_deref(),
        Some(slow)
    );
}

#[tokio::test(start_paused = true)]
async fn test_explicit_reprobe_selects_both_roles() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    assert_eq!(client.selected_endpoints().await, SelectedEndpoints::default());
    let selected = client.reprobe().await;
    assert_eq!(selected.publisher.as_deref(), Some(PUBLISHER));
    assert_eq!(selected.aggregator.as_deref(), Some(AGGREGATOR));
}

#[tokio::test]
async fn test_delete_is_unsupported() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let err = client.delete(&ContentId::new("quilt-1")).await.unwrap_err();
    assert!(matches!(err, BlobError::DeletionUnsupported { .. }));
    assert_eq!(err.class(), "deletion-unsupported");
}

#[tokio::test]
async fn test_metrics_do_not_change_behaviour() {
    let network = MemoryNetwork::new();
    let meter = opentelemetry::global::meter("blob_store_test");
    let client = BlobStorageClient::new_with_metrics(config(), network.clone(), &meter).unwrap();
    let id = client.store(payload(64), BlobMetadata::new()).await.unwrap();
    assert_eq!(client.retrieve(&id, None).await.unwrap().payload, payload(64));
}

#[test]
fn test_invalid_config_rejected() {
    let network = MemoryNetwork::new();
    let mut config = config();
    config.aggregators.clear();
    let Err(err) = BlobStorageClient::new(config, network) else {
        panic!("empty aggregator list accepted");
    };
    assert_eq!(err.class(), "fatal");
}

#[test]
fn test_not_found_helper_is_404() {
    assert!(not_found().is_not_found());
}
