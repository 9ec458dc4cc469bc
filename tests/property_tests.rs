//! Property-based tests using proptest
//!
//! These tests exercise the wire codec, the framed stream decoder and path
//! metadata records over randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{BufMut, BytesMut};
use nix_daemon_relay::config::MAX_LIST_ITEM_LEN;
use nix_daemon_relay::core::framed::FramedReader;
use nix_daemon_relay::core::narinfo::PathMetadataRecord;
use nix_daemon_relay::core::wire;
use proptest::prelude::*;
use tokio::io::AsyncReadExt;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(future)
}

fn store_path() -> impl Strategy<Value = String> {
    "/nix/store/[a-z0-9]{32}-[a-z0-9.+-]{1,40}"
}

prop_compose! {
    fn record()(
        out_path in store_path(),
        deriver in prop_oneof![Just(String::new()), store_path()],
        nar_hash in "sha256:[a-z0-9]{52}",
        references in prop::collection::vec(store_path(), 0..8),
        registration_time in any::<u64>(),
        nar_size in any::<u64>(),
        ultimate in any::<bool>(),
        sigs in prop::collection::vec("[a-z.]{1,20}-1:[A-Za-z0-9+/=]{8,88}", 0..4),
        ca in prop_oneof![Just(String::new()), "fixed:r:sha256:[a-z0-9]{52}"],
    ) -> PathMetadataRecord {
        PathMetadataRecord {
            out_path, deriver, nar_hash, references, registration_time,
            nar_size, ultimate, sigs, ca,
        }
    }
}

// Property: every string occupies a multiple of 8 bytes on the wire
proptest! {
    #[test]
    fn prop_strings_are_padded(value in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut buf = BytesMut::new();
        wire::put_bytes(&mut buf, &value);

        prop_assert_eq!(buf.len() % 8, 0);
        prop_assert_eq!(buf.len(), 8 + value.len() + wire::padding_len(value.len() as u64));
        prop_assert!(buf[8 + value.len()..].iter().all(|b| *b == 0));
    }
}

// Property: strings within the limit decode to what was encoded
proptest! {
    #[test]
    fn prop_string_roundtrip(value in "\\PC{0,200}") {
        let mut buf = BytesMut::new();
        wire::put_bytes(&mut buf, value.as_bytes());

        let decoded = block_on(async {
            let mut reader = &buf[..];
            wire::read_string(&mut reader, MAX_LIST_ITEM_LEN).await
        }).unwrap();
        prop_assert_eq!(decoded, value);
    }
}

// Property: strings over the limit are refused
proptest! {
    #[test]
    fn prop_over_limit_is_refused(len in 9u64..512, max in 0u64..8) {
        let mut buf = BytesMut::new();
        wire::put_bytes(&mut buf, &vec![b'a'; len as usize]);

        let result = block_on(async {
            let mut reader = &buf[..];
            wire::read_string(&mut reader, max).await
        });
        prop_assert!(result.is_err());
    }
}

// Property: the decoder yields exactly the concatenation of the chunks
proptest! {
    #[test]
    fn prop_framed_concatenates_chunks(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..300), 0..16),
        trailer in any::<u64>(),
    ) {
        let mut encoded = BytesMut::new();
        for chunk in &chunks {
            encoded.put_u64_le(chunk.len() as u64);
            encoded.put_slice(chunk);
        }
        encoded.put_u64_le(0);
        encoded.put_u64_le(trailer);

        let (payload, rest) = block_on(async {
            let mut source = &encoded[..];
            let mut reader = FramedReader::new(&mut source);
            let mut payload = Vec::new();
            reader.read_to_end(&mut payload).await.unwrap();
            // Stays at end-of-stream.
            let mut probe = [0u8; 1];
            assert_eq!(reader.read(&mut probe).await.unwrap(), 0);
            (payload, source.read_u64_le().await.unwrap())
        });

        prop_assert_eq!(payload, chunks.concat());
        prop_assert_eq!(rest, trailer);
    }
}

// Property: records survive an encode/decode cycle field for field
proptest! {
    #[test]
    fn prop_record_roundtrip(record in record()) {
        let mut buf = BytesMut::new();
        record.encode(&mut buf);

        let decoded = block_on(async {
            let mut reader = &buf[..];
            PathMetadataRecord::read_from(&mut reader).await
        }).unwrap();
        prop_assert_eq!(decoded, record);
    }
}

// Property: a truncated record never decodes
proptest! {
    #[test]
    fn prop_truncated_record_fails(record in record(), cut in 1usize..64) {
        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        let keep = buf.len().saturating_sub(cut);

        let result = block_on(async {
            let mut reader = &buf[..keep];
            PathMetadataRecord::read_from(&mut reader).await
        });
        prop_assert!(result.is_err());
    }
}
