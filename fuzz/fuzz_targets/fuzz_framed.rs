#![no_main]

use libfuzzer_sys::fuzz_target;
use nix_daemon_relay::core::framed::FramedReader;
use nix_daemon_relay::protocol::operations::parse_source;

fuzz_target!(|data: &[u8]| {
    let Ok(rt) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };
    rt.block_on(async {
        let mut source = data;
        let mut reader = FramedReader::new(&mut source);
        let _ = parse_source(&mut reader).await;
    });
});
