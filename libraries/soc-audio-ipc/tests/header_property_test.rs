//! Property-based tests for the header codec
//!
//! Every in-range field set survives encode/decode, and writing one field
//! never disturbs the bits of another.

use proptest::prelude::*;
use soc_audio_ipc::header::{get_field, set_field};
use soc_audio_ipc::{HeaderField, IpcError, MessageHeader};

// ===== Helpers =====

fn arbitrary_header() -> impl Strategy<Value = MessageHeader> {
    (
        any::<u8>(),     // message id
        0u8..=0x0F,      // firmware handle
        0u8..=0x0F,      // pipe type
        0u16..=0x3FFF,   // payload size
        any::<bool>(),   // done
        any::<bool>(),   // busy
    )
        .prop_map(
            |(message_id, fw_handle, pipe_type, payload_size, done, busy)| MessageHeader {
                message_id,
                fw_handle,
                pipe_type,
                payload_size,
                done,
                busy,
            },
        )
}

fn arbitrary_field() -> impl Strategy<Value = HeaderField> {
    prop::sample::select(HeaderField::ALL.to_vec())
}

// ===== Property Tests =====

proptest! {
    /// Property: decode(encode(h)) == h for every in-range header
    #[test]
    fn encode_decode_identity(header in arbitrary_header()) {
        let word = header.encode().unwrap();
        prop_assert_eq!(MessageHeader::decode(word), header);
    }

    /// Property: decode then encode reproduces any word bit for bit
    #[test]
    fn any_word_decodes(word in any::<u32>()) {
        let header = MessageHeader::decode(word);
        prop_assert_eq!(header.encode().unwrap(), word);
    }

    /// Property: set_field only touches the bits of its own field
    #[test]
    fn set_field_leaves_other_fields_alone(
        word in any::<u32>(),
        field in arbitrary_field(),
        raw in any::<u32>(),
    ) {
        let value = raw & field.max();
        let updated = set_field(word, field, value).unwrap();

        prop_assert_eq!(get_field(updated, field), value);
        for other in HeaderField::ALL.into_iter().filter(|f| *f != field) {
            prop_assert_eq!(get_field(updated, other), get_field(word, other));
        }
    }

    /// Property: values wider than the field are refused, word unchanged
    #[test]
    fn overflow_is_rejected(field in arbitrary_field(), excess in 1u32..1024) {
        prop_assume!(field.max() < u32::MAX - excess);
        let value = field.max() + excess;
        prop_assert_eq!(
            set_field(0, field, value),
            Err(IpcError::FieldOverflow { field, value })
        );
    }
}
