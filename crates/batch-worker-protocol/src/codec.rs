use crate::{Message, MessageType, ProtocolError, Result, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed framing for channel messages
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [payload]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 5 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }
        if length == 0 {
            return Err(ProtocolError::InvalidMessageType(0));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        let msg_type_byte = src.get_u8();
        let payload = src.split_to(length - 1);
        let msg_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::InvalidMessageType(msg_type_byte))?;

        let message = match msg_type {
            MessageType::PollWorkUnit => Message::PollWorkUnit(bincode::deserialize(&payload)?),
            MessageType::RespondWorkUnit => {
                Message::RespondWorkUnit(bincode::deserialize(&payload)?)
            }
            MessageType::Ack => Message::Ack(bincode::deserialize(&payload)?),
            MessageType::Nack => Message::Nack(bincode::deserialize(&payload)?),
            MessageType::Heartbeat => Message::Heartbeat(bincode::deserialize(&payload)?),
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Message::PollWorkUnit(req) => bincode::serialize(req)?,
            Message::RespondWorkUnit(req) => bincode::serialize(req)?,
            Message::Ack(resp) => bincode::serialize(resp)?,
            Message::Nack(resp) => bincode::serialize(resp)?,
            Message::Heartbeat(req) => bincode::serialize(req)?,
        };

        let total_length = 1 + payload.len();
        if total_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}
