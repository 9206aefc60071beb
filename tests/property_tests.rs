use bytes::BytesMut;
use proptest::prelude::*;
use tcpcom::framing::DelimiterCodec;
use tokio_util::codec::{Decoder, Encoder};

/// Messages that never contain the NUL delimiter
fn message() -> impl Strategy<Value = String> {
    "[^\\x00]{0,64}"
}

fn decode_all(codec: &mut DelimiterCodec, buf: &mut BytesMut) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(msg) = codec.decode(buf).expect("decode failed") {
        out.push(msg);
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: framed messages decode back to exactly the messages sent
    #[test]
    fn framing_round_trip(messages in prop::collection::vec(message(), 0..20)) {
        let mut codec = DelimiterCodec::new(0);
        let mut wire = BytesMut::new();
        for msg in &messages {
            codec.encode(msg.as_str(), &mut wire).expect("encode failed");
        }

        let decoded = decode_all(&mut codec, &mut wire);
        prop_assert_eq!(decoded, messages);
        prop_assert!(wire.is_empty());
    }

    /// Property: the way bytes are chunked never changes what is delivered
    #[test]
    fn chunking_does_not_affect_order(
        messages in prop::collection::vec(message(), 1..20),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
    ) {
        let mut encoder = DelimiterCodec::new(0);
        let mut wire = BytesMut::new();
        for msg in &messages {
            encoder.encode(msg.as_str(), &mut wire).expect("encode failed");
        }
        let wire = wire.freeze();

        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
        points.push(0);
        points.push(wire.len());
        points.sort_unstable();
        points.dedup();

        let mut decoder = DelimiterCodec::new(0);
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for window in points.windows(2) {
            buf.extend_from_slice(&wire[window[0]..window[1]]);
            decoded.extend(decode_all(&mut decoder, &mut buf));
        }

        prop_assert_eq!(decoded, messages);
    }

    /// Property: an unterminated tail is never delivered
    #[test]
    fn unterminated_tail_is_withheld(complete in message(), tail in "[^\\x00]{1,32}") {
        let mut codec = DelimiterCodec::new(0);
        let mut buf = BytesMut::new();
        codec.encode(complete.as_str(), &mut buf).expect("encode failed");
        buf.extend_from_slice(tail.as_bytes());

        let decoded = decode_all(&mut codec, &mut buf);
        prop_assert_eq!(decoded, vec![complete]);
        prop_assert_eq!(codec.decode_eof(&mut buf).expect("decode_eof failed"), None);
    }
}
