#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use nix_daemon_relay::config::WORKER_MAGIC_1;
use nix_daemon_relay::protocol::run_worker;
use nix_daemon_relay::store::MemoryPathInfoStore;

fuzz_target!(|data: &[u8]| {
    // Skip the magic so inputs reach the dispatch loop.
    let mut input = WORKER_MAGIC_1.to_le_bytes().to_vec();
    input.extend_from_slice(data);

    let Ok(rt) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };
    rt.block_on(async {
        let mut out = Vec::new();
        let _ = run_worker(&input[..], &mut out, Arc::new(MemoryPathInfoStore::new())).await;
    });
});
