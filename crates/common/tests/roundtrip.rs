//! Integration tests for upload then download through the in-memory network

mod common;

use ::common::chunk::{Chunk, Reference, CHUNK_SIZE};
use ::common::crypto::Secret;
use ::common::download::DownloadError;
use ::common::tree::BRANCHES;
use ::common::upload::UploadDataOptions;

const SIZES: &[usize] = &[
    0,
    1,
    31,
    CHUNK_SIZE - 1,
    CHUNK_SIZE,
    CHUNK_SIZE + 1,
    CHUNK_SIZE * 2,
    10_000,
    CHUNK_SIZE * BRANCHES,
    CHUNK_SIZE * BRANCHES + 1,
    100_000,
];

async fn round_trip(len: usize, encrypt: bool) {
    let env = common::setup_test_env();
    let data = common::pattern(len);
    let result = env
        .uploader
        .upload_data(
            &data,
            &common::delegated(),
            UploadDataOptions {
                encrypt,
                tag: None,
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.reference.is_encrypted(), encrypt);

    let (downloaded, _) = env.downloader.download(&result.reference, None).await.unwrap();
    assert_eq!(downloaded.len(), len, "length mismatch at {}", len);
    assert_eq!(&downloaded[..], &data[..], "content mismatch at {}", len);
}

#[tokio::test]
async fn test_plain_round_trip() {
    for len in SIZES {
        round_trip(*len, false).await;
    }
}

#[tokio::test]
async fn test_encrypted_round_trip() {
    for len in SIZES {
        round_trip(*len, true).await;
    }
}

#[tokio::test]
async fn test_reference_hex_parses_back() {
    let env = common::setup_test_env();
    let data = common::pattern(20_000);
    for encrypt in [false, true] {
        let result = env
            .uploader
            .upload_data(
                &data,
                &common::delegated(),
                UploadDataOptions { encrypt, tag: None },
                None,
            )
            .await
            .unwrap();

        let hex = result.reference.to_hex();
        assert_eq!(hex.len(), if encrypt { 128 } else { 64 });
        let parsed: Reference = hex.parse().unwrap();
        let (downloaded, _) = env.downloader.download(&parsed, None).await.unwrap();
        assert_eq!(&downloaded[..], &data[..]);
    }
}

#[tokio::test]
async fn test_download_progress() {
    let env = common::setup_test_env();
    let data = common::pattern(10_000);
    let result = env
        .uploader
        .upload_data(&data, &common::delegated(), UploadDataOptions::default(), None)
        .await
        .unwrap();

    let (callback, seen) = common::recorder();
    let (_, progress) = env
        .downloader
        .download(&result.reference, Some(callback))
        .await
        .unwrap();
    assert_eq!(progress.processed, 4);
    assert_eq!(progress.total, 4);
    assert_eq!(seen.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_missing_chunk_fails_download() {
    let env = common::setup_test_env();
    let data = common::pattern(CHUNK_SIZE * 3);
    let result = env
        .uploader
        .upload_data(&data, &common::delegated(), UploadDataOptions::default(), None)
        .await
        .unwrap();

    let leaf = env.network.submissions()[1].address;
    env.network.remove_chunk(&leaf);
    assert!(env.downloader.download(&result.reference, None).await.is_err());
}

#[tokio::test]
async fn test_bounded_concurrency_still_orders_leaves() {
    let env = common::setup_test_env();
    let data = common::pattern(CHUNK_SIZE * 70 + 5);
    let result = env
        .uploader
        .upload_data(&data, &common::delegated(), UploadDataOptions::default(), None)
        .await
        .unwrap();

    let downloader = env.downloader.clone().with_concurrency(3);
    let (downloaded, _) = downloader.download(&result.reference, None).await.unwrap();
    assert_eq!(&downloaded[..], &data[..]);
}

#[tokio::test]
async fn test_wrong_key_fails_download() {
    let env = common::setup_test_env();
    for len in [100, 10_000] {
        let result = env
            .uploader
            .upload_data(
                &common::pattern(len),
                &common::delegated(),
                UploadDataOptions::default(),
                None,
            )
            .await
            .unwrap();

        let reference = Reference::Encrypted {
            address: *result.reference.address(),
            key: Secret::generate(),
        };
        assert!(env.downloader.download(&reference, None).await.is_err());
    }
}

#[tokio::test]
async fn test_oversized_root_span_is_refused() {
    let env = common::setup_test_env();
    let root = Chunk::with_span(u64::MAX >> 1, vec![0u8; CHUNK_SIZE]).unwrap();
    env.network.insert_chunk(root.clone());
    let reference = Reference::Plain(*root.address());

    assert!(matches!(
        env.downloader.download(&reference, None).await,
        Err(DownloadError::TooLarge { .. })
    ));

    // Without the size limit the tree walk still fails on absent children
    let unbounded = env.downloader.clone().with_max_size(u64::MAX);
    assert!(unbounded.download(&reference, None).await.is_err());
}

#[tokio::test]
async fn test_leaves_exceeding_root_span_are_rejected() {
    let env = common::setup_test_env();
    let a = Chunk::content_addressed(common::pattern(CHUNK_SIZE)).unwrap();
    let b = Chunk::content_addressed(vec![7u8; CHUNK_SIZE]).unwrap();
    let mut refs = a.address().as_bytes().to_vec();
    refs.extend_from_slice(b.address().as_bytes());
    let root = Chunk::with_span(5_000, refs).unwrap();
    for chunk in [a, b, root.clone()] {
        env.network.insert_chunk(chunk);
    }

    let result = env
        .downloader
        .download(&Reference::Plain(*root.address()), None)
        .await;
    assert!(matches!(result, Err(DownloadError::Chunk(_))));
}
