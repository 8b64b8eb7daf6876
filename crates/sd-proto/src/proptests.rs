use proptest::prelude::*;
use serde_json::json;

use crate::{decode_client, ClientMessage};

proptest! {
    // Opaque payloads survive the relay codec byte-for-byte at the JSON level.
    #[test]
    fn prop_candidate_payload_is_opaque(
        session in "[a-z0-9-]{1,36}",
        text in ".{0,64}",
        index in 0u16..8,
    ) {
        let frame = json!({
            "event": "signal:ice_candidate",
            "data": {
                "sessionId": session,
                "candidate": { "candidate": text, "sdpMLineIndex": index, "vendor": { "x": [index] } }
            }
        });
        let decoded = decode_client(&frame.to_string()).unwrap();
        match &decoded {
            ClientMessage::IceCandidate(signal) => {
                prop_assert_eq!(&signal.candidate, &frame["data"]["candidate"]);
            }
            other => prop_assert!(false, "unexpected frame {:?}", other),
        }
        prop_assert_eq!(serde_json::to_value(&decoded).unwrap(), frame);
    }

    // Arbitrary text never panics the decoder.
    #[test]
    fn prop_decoder_total(text in ".{0,256}") {
        let _ = decode_client(&text);
    }
}
