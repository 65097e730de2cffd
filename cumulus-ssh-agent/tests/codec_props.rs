//! Property tests for the wire codec and request decoding.

use cumulus_ssh_agent::codec::{self, DEFAULT_MAX_FRAME_LEN, MessageReader, MessageWriter};
use cumulus_ssh_agent::error::FrameError;
use cumulus_ssh_agent::proto::{Request, SignRequest};
use proptest::prelude::*;

proptest! {
    /// Fields written in sequence read back in sequence.
    #[test]
    fn prop_fields_read_back(
        byte in any::<u8>(),
        word in any::<u32>(),
        string in proptest::collection::vec(any::<u8>(), 0..512),
        magnitude in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut w = MessageWriter::new();
        w.put_byte(byte).put_u32(word).put_string(&string).put_mpint(&magnitude);
        let bytes = w.finish();

        let mut r = MessageReader::new(&bytes);
        prop_assert_eq!(r.read_byte().unwrap(), byte);
        prop_assert_eq!(r.read_u32().unwrap(), word);
        prop_assert_eq!(r.read_string().unwrap(), string.as_slice());

        let start = magnitude.iter().position(|&b| b != 0).unwrap_or(magnitude.len());
        prop_assert_eq!(r.read_mpint().unwrap(), &magnitude[start..]);
        prop_assert!(r.is_empty());
    }

    /// Arbitrary input either decodes or fails cleanly, never panics, and a
    /// decoded frame never exceeds the limit.
    #[test]
    fn prop_read_message_total(input in proptest::collection::vec(any::<u8>(), 0..64)) {
        match codec::read_message(&mut input.as_slice(), 32) {
            Ok(frame) => {
                prop_assert!(frame.payload().len() <= 32);
                prop_assert_eq!(frame.payload(), &input[4..4 + frame.payload().len()]);
            }
            Err(FrameError::ConnectionClosed) => prop_assert!(input.is_empty()),
            Err(FrameError::Truncated) => {}
            Err(FrameError::FrameTooLarge { len, max }) => {
                prop_assert_eq!(max, 32);
                prop_assert!(len > 32);
            }
            Err(FrameError::Io(e)) => prop_assert!(false, "unexpected io error: {e}"),
        }
    }

    /// Any payload decodes to some request without panicking.
    #[test]
    fn prop_request_decode_total(payload in proptest::collection::vec(any::<u8>(), 0..128)) {
        let frame = codec::Frame::new(payload);
        let _ = Request::decode(&frame);
    }

    /// Sign requests survive an encode/decode through the framing layer.
    #[test]
    fn prop_sign_request_framed(
        key_blob in proptest::collection::vec(any::<u8>(), 0..300),
        data in proptest::collection::vec(any::<u8>(), 0..300),
        flags in any::<u32>(),
    ) {
        let request = Request::SignRequest(SignRequest {
            key_blob: &key_blob,
            data: &data,
            flags,
        });
        let wire = request.encode();
        let frame = codec::read_message(&mut wire.as_slice(), DEFAULT_MAX_FRAME_LEN).unwrap();
        prop_assert_eq!(Request::decode(&frame).unwrap(), request);
    }
}
