//! Shared test utilities for chunk pipeline integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex as StdMutex};

use ::common::crypto::SecretKey;
use ::common::network::InMemoryNetwork;
use ::common::postage::{BatchId, Stamper, UtilizationTracker};
use ::common::prelude::{Progress, ProgressCallback};
use ::common::store::MemoryStore;
use ::common::upload::{UploadAuth, UploadOrchestrator};
use ::common::download::DownloadAssembler;
use tokio::sync::Mutex;

pub fn batch_id() -> BatchId {
    BatchId::from([0x42; 32])
}

/// Deterministic, non-repeating test content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub struct TestEnv {
    pub network: InMemoryNetwork,
    pub store: MemoryStore,
    pub uploader: UploadOrchestrator,
    pub downloader: DownloadAssembler,
}

/// Set up an orchestrator and assembler sharing one in-memory network
pub fn setup_test_env() -> TestEnv {
    setup_with_network(InMemoryNetwork::new())
}

pub fn setup_with_network(network: InMemoryNetwork) -> TestEnv {
    let store = MemoryStore::new();
    let uploader = UploadOrchestrator::new(Arc::new(network.clone()), Arc::new(store.clone()));
    let downloader = DownloadAssembler::new(Arc::new(network.clone()));
    TestEnv {
        network,
        store,
        uploader,
        downloader,
    }
}

pub fn delegated() -> UploadAuth {
    UploadAuth::Delegated {
        batch_id: batch_id(),
    }
}

/// Self-signed authorization over a fresh tracker at `depth`
pub fn self_signed(depth: u8) -> (UploadAuth, SecretKey, Arc<Mutex<UtilizationTracker>>) {
    let key = SecretKey::generate();
    let tracker = Arc::new(Mutex::new(
        UtilizationTracker::new(batch_id(), depth).unwrap(),
    ));
    let auth = UploadAuth::SelfSigned {
        stamper: Stamper::new(key.clone(), batch_id(), depth),
        tracker: tracker.clone(),
    };
    (auth, key, tracker)
}

/// Progress callback recording every report
pub fn recorder() -> (ProgressCallback, Arc<StdMutex<Vec<Progress>>>) {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Arc::new(move |p: Progress| sink.lock().unwrap().push(p));
    (callback, seen)
}
