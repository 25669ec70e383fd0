//! Stream framing for Diameter messages
//!
//! Splits a byte stream on the 24-bit length in the message header. Only
//! framing lives here; connection handling belongs to the transport.

use apolo_core::AppError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::message::{DiameterHeader, DiameterMessage, HEADER_LEN};

#[derive(Debug, Clone)]
pub struct DiameterCodec {
    max_message_size: usize,
}

impl DiameterCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for DiameterCodec {
    fn default() -> Self {
        Self::new(65535)
    }
}

impl Decoder for DiameterCodec {
    type Item = DiameterMessage;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let header = DiameterHeader::peek(src)?;
        let len = header.length as usize;
        if len > self.max_message_size {
            warn!(
                length = len,
                max = self.max_message_size,
                "Rejecting oversized Diameter message"
            );
            return Err(AppError::MalformedMessage(format!(
                "message of {} bytes exceeds limit of {}",
                len, self.max_message_size
            )));
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(len).freeze();
        DiameterMessage::decode(frame).map(Some)
    }
}

impl Encoder<DiameterMessage> for DiameterCodec {
    type Error = AppError;

    fn encode(&mut self, item: DiameterMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.encoded_len();
        if len > self.max_message_size {
            return Err(AppError::MalformedMessage(format!(
                "message of {} bytes exceeds limit of {}",
                len, self.max_message_size
            )));
        }
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avp::{Avp, AvpData};
    use crate::dictionary::{avp_code, cmd, CREDIT_CONTROL_APPLICATION_ID};
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn message(session_id: &str) -> DiameterMessage {
        let mut msg = DiameterMessage::new_request(cmd::CREDIT_CONTROL, CREDIT_CONTROL_APPLICATION_ID);
        msg.add_avp(Avp::mandatory(
            avp_code::SESSION_ID,
            AvpData::Utf8String(session_id.to_string()),
        ));
        msg
    }

    #[test]
    fn test_partial_frames() {
        let wire = message("abc").to_bytes();
        let mut codec = DiameterCodec::default();

        let mut buf = BytesMut::from(&wire[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[10..wire.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[wire.len() - 1..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.avps, message("abc").avps);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_rejected() {
        let mut codec = DiameterCodec::new(32);
        let mut buf = BytesMut::from(&message("a-rather-long-session-identifier").to_bytes()[..]);
        assert!(codec.decode(&mut buf).is_err());

        let mut out = BytesMut::new();
        assert!(codec
            .encode(message("a-rather-long-session-identifier"), &mut out)
            .is_err());
    }

    #[tokio::test]
    async fn test_stream_of_messages() {
        let mut wire = BytesMut::new();
        let mut codec = DiameterCodec::default();
        codec.encode(message("one"), &mut wire).unwrap();
        codec.encode(message("two"), &mut wire).unwrap();

        let reader = std::io::Cursor::new(wire.to_vec());
        let mut frames = FramedRead::new(reader, DiameterCodec::default());

        let first = frames.next().await.unwrap().unwrap();
        let second = frames.next().await.unwrap().unwrap();
        assert_eq!(first.find_avp(avp_code::SESSION_ID).unwrap().as_str().unwrap(), "one");
        assert_eq!(second.find_avp(avp_code::SESSION_ID).unwrap().as_str().unwrap(), "two");
        assert!(frames.next().await.is_none());
    }
}
