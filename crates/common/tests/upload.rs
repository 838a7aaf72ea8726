//! Integration tests for self-signed and delegated uploads

mod common;

use ::common::chunk::CHUNK_SIZE;
use ::common::network::{InMemoryNetwork, Postage};
use ::common::postage::{UtilizationError, UtilizationTracker, RESERVED_SLOTS};
use ::common::upload::{UploadDataOptions, UploadError};

#[tokio::test]
async fn test_ten_thousand_zero_bytes_self_signed() {
    let (auth, key, tracker) = common::self_signed(20);
    let env = common::setup_with_network(InMemoryNetwork::new().with_owner(key.public()));
    let data = vec![0u8; 10_000];

    let (callback, seen) = common::recorder();
    let result = env
        .uploader
        .upload_data(&data, &auth, UploadDataOptions::default(), Some(callback))
        .await
        .unwrap();

    let submissions = env.network.submissions();
    assert_eq!(submissions.len(), 4);
    assert!(submissions
        .iter()
        .all(|s| matches!(s.postage, Postage::Stamp(_))));
    assert!(submissions.iter().all(|s| s.options.deferred && !s.options.pin));

    assert_eq!(result.reference.to_hex().len(), 64);
    assert_eq!(result.progress.total, 4);
    assert_eq!(result.progress.processed, 4);
    let last = *seen.lock().unwrap().last().unwrap();
    assert_eq!((last.total, last.processed), (4, 4));

    // The two full zero leaves share an address but each took a slot
    let tracker = tracker.lock().await;
    let leaf = submissions[0].address;
    assert_eq!(submissions[1].address, leaf);
    assert_eq!(tracker.counter(leaf.bucket()), 2);

    let (downloaded, _) = env.downloader.download(&result.reference, None).await.unwrap();
    assert_eq!(downloaded.len(), 10_000);
    assert!(downloaded.iter().all(|b| *b == 0));
}

#[tokio::test]
async fn test_leaf_sizes_of_ten_thousand_bytes() {
    let env = common::setup_test_env();
    let data = common::pattern(10_000);
    env.uploader
        .upload_data(&data, &common::delegated(), UploadDataOptions::default(), None)
        .await
        .unwrap();

    let submissions = env.network.submissions();
    assert_eq!(submissions.len(), 4);
    let mut spans = Vec::new();
    for submission in &submissions[..3] {
        let chunk = env.downloader.download_chunk(&submission.address).await.unwrap();
        spans.push(chunk.span());
    }
    assert_eq!(spans, vec![4096, 4096, 1808]);
}

#[tokio::test]
async fn test_delegated_upload_passes_batch_id() {
    let env = common::setup_test_env();
    let result = env
        .uploader
        .upload_data(&common::pattern(5000), &common::delegated(), UploadDataOptions::default(), None)
        .await
        .unwrap();

    for submission in env.network.submissions() {
        match submission.postage {
            Postage::Batch(batch_id) => assert_eq!(batch_id, common::batch_id()),
            Postage::Stamp(_) => panic!("delegated upload should not stamp"),
        }
        assert_eq!(submission.options.tag, Some(result.tag_uid));
    }
}

#[tokio::test]
async fn test_supplied_tag_is_used() {
    let env = common::setup_test_env();
    let result = env
        .uploader
        .upload_data(
            b"tagged",
            &common::delegated(),
            UploadDataOptions {
                encrypt: false,
                tag: Some(77),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.tag_uid, 77);
}

#[tokio::test]
async fn test_accounting_chunks_follow_user_chunks() {
    let (auth, key, tracker) = common::self_signed(25);
    let env = common::setup_with_network(InMemoryNetwork::new().with_owner(key.public()));
    let data = common::pattern(CHUNK_SIZE * 2);

    env.uploader
        .upload_data(&data, &auth, UploadDataOptions::default(), None)
        .await
        .unwrap();

    // 2 leaves and a root, then 64 accounting chunks
    let submissions = env.network.submissions();
    assert_eq!(submissions.len(), 3 + 64);
    for submission in &submissions[..3] {
        let Postage::Stamp(stamp) = &submission.postage else {
            panic!("expected a stamp");
        };
        assert!(stamp.slot().slot >= RESERVED_SLOTS);
    }
    for submission in &submissions[3..] {
        let Postage::Stamp(stamp) = &submission.postage else {
            panic!("expected a stamp");
        };
        assert!(stamp.slot().slot < RESERVED_SLOTS);
    }

    // Advanced state was persisted
    let saved = UtilizationTracker::load_or_new(&env.store, common::batch_id(), 25)
        .await
        .unwrap();
    assert_eq!(saved.snapshot(), tracker.lock().await.snapshot());
}

#[tokio::test]
async fn test_full_bucket_aborts_before_submission() {
    // Depth 16 gives one slot per bucket; two identical leaves collide
    let (auth, _, tracker) = common::self_signed(16);
    let env = common::setup_test_env();
    let data = vec![0u8; CHUNK_SIZE * 2];

    let result = env
        .uploader
        .upload_data(&data, &auth, UploadDataOptions::default(), None)
        .await;
    assert!(matches!(
        result,
        Err(UploadError::Utilization(UtilizationError::BucketFull { .. }))
    ));
    assert!(env.network.submissions().is_empty());
    assert!(tracker.lock().await.snapshot().buckets.is_empty());
}

#[tokio::test]
async fn test_network_failure_fails_upload_without_persisting() {
    let (auth, _, tracker) = common::self_signed(20);
    let env = common::setup_test_env();
    env.network.fail_after(2);

    let result = env
        .uploader
        .upload_data(&common::pattern(CHUNK_SIZE * 3), &auth, UploadDataOptions::default(), None)
        .await;
    assert!(matches!(result, Err(UploadError::Network(_))));
    assert_eq!(env.network.submissions().len(), 2);
    assert!(tracker.lock().await.snapshot().buckets.is_empty());
    assert_eq!(env.store.len("utilization"), 0);
}

#[tokio::test]
async fn test_single_chunk_size_validation() {
    let env = common::setup_test_env();
    let auth = common::delegated();

    assert!(matches!(
        env.uploader.upload_chunk(&[], &auth, None).await,
        Err(UploadError::InvalidChunkSize(0))
    ));
    assert!(matches!(
        env.uploader.upload_chunk(&vec![1u8; CHUNK_SIZE + 1], &auth, None).await,
        Err(UploadError::InvalidChunkSize(_))
    ));
    assert!(env.network.submissions().is_empty());

    let reference = env.uploader.upload_chunk(b"one chunk", &auth, None).await.unwrap();
    let chunk = env.downloader.download_chunk(reference.address()).await.unwrap();
    assert_eq!(&chunk.payload()[..], b"one chunk");
}

#[tokio::test]
async fn test_counters_never_decrease() {
    let (auth, _, tracker) = common::self_signed(22);
    let env = common::setup_test_env();
    let mut previous = vec![0u32; 1 << 16];

    for round in 0..5 {
        let data = common::pattern(CHUNK_SIZE * (round + 1) + round);
        env.uploader
            .upload_data(&data, &auth, UploadDataOptions::default(), None)
            .await
            .unwrap();
        let tracker = tracker.lock().await;
        for (bucket, prev) in previous.iter_mut().enumerate() {
            let now = tracker.counter(bucket as u16);
            assert!(now >= *prev);
            assert!(now <= tracker.max_slots());
            *prev = now;
        }
    }
}
