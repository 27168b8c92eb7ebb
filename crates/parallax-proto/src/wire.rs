// SPDX-License-Identifier: Apache-2.0
//! Blocking encode/decode of framed messages over `Read`/`Write` streams.

use std::io::{Read, Write};

use crate::{
    Message, ProtocolError, Result, Token, FRAME_NUMBER_SIZE, FRAME_NUMBER_WRAP, HEADER_SIZE,
};

/// Write one framed message.
///
/// The header and payload are written as a single buffered chunk so a message
/// is never interleaved with another writer on the same stream, provided the
/// caller serializes access to `writer`.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let payload_len = message.payload_len();
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len as usize);
    buf.push(message.token() as u8);
    buf.extend_from_slice(&payload_len.to_le_bytes());

    match message {
        Message::Sync { frame, payload } => {
            buf.extend_from_slice(&(frame % FRAME_NUMBER_WRAP).to_le_bytes());
            buf.extend_from_slice(payload);
        }
        Message::Connected | Message::Disconnect => {}
        Message::Fill { payload } => buf.extend_from_slice(payload),
        Message::Size { required } => buf.extend_from_slice(&required.to_le_bytes()),
        Message::Ack { package } => buf.extend_from_slice(&package.to_le_bytes()),
    }

    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message, enforcing `max_payload` on the length field.
///
/// On a transient error ([`ProtocolError::is_transient`]) the offending
/// payload has been consumed and the stream remains aligned on the next
/// header, so the caller may continue reading. A short read anywhere inside a
/// frame surfaces as `Io(UnexpectedEof)` and is connection-fatal.
pub fn read_message<R: Read>(reader: &mut R, max_payload: u32) -> Result<Message> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let length = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    if length > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            length,
            max: max_payload,
        });
    }

    let Some(token) = Token::from_u8(header[0]) else {
        skip_payload(reader, length)?;
        return Err(ProtocolError::UnknownToken {
            token: header[0],
            skipped: length,
        });
    };

    match token {
        Token::Sync => {
            if (length as usize) < FRAME_NUMBER_SIZE {
                skip_payload(reader, length)?;
                return Err(ProtocolError::Malformed {
                    token,
                    reason: "payload shorter than the frame-number prefix",
                });
            }
            let mut frame_bytes = [0u8; FRAME_NUMBER_SIZE];
            reader.read_exact(&mut frame_bytes)?;
            let payload = read_payload(reader, length - FRAME_NUMBER_SIZE as u32)?;
            Ok(Message::Sync {
                frame: u64::from_le_bytes(frame_bytes) % FRAME_NUMBER_WRAP,
                payload,
            })
        }
        Token::Connected => {
            skip_payload(reader, length)?;
            Ok(Message::Connected)
        }
        Token::Disconnect => {
            skip_payload(reader, length)?;
            Ok(Message::Disconnect)
        }
        Token::Fill => {
            let payload = read_payload(reader, length)?;
            Ok(Message::Fill { payload })
        }
        Token::Size => {
            if length != 4 {
                skip_payload(reader, length)?;
                return Err(ProtocolError::Malformed {
                    token,
                    reason: "expected a 4-byte size payload",
                });
            }
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(Message::Size {
                required: u32::from_le_bytes(bytes),
            })
        }
        Token::Ack => {
            if length != 4 {
                skip_payload(reader, length)?;
                return Err(ProtocolError::Malformed {
                    token,
                    reason: "expected a 4-byte package id payload",
                });
            }
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(Message::Ack {
                package: i32::from_le_bytes(bytes),
            })
        }
    }
}

fn read_payload<R: Read>(reader: &mut R, len: u32) -> Result<Vec<u8>> {
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Read and discard exactly `len` bytes to keep the stream aligned.
fn skip_payload<R: Read>(reader: &mut R, len: u32) -> Result<()> {
    let copied = std::io::copy(&mut reader.take(u64::from(len)), &mut std::io::sink())?;
    if copied != u64::from(len) {
        return Err(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "truncated payload while skipping",
        )));
    }
    Ok(())
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_PAYLOAD_SIZE;
    use std::io::Cursor;

    fn roundtrip(message: &Message) -> Message {
        let mut buf = Vec::new();
        write_message(&mut buf, message).expect("encode");
        read_message(&mut Cursor::new(buf), MAX_PAYLOAD_SIZE).expect("decode")
    }

    #[test]
    fn sync_frame_layout_is_byte_exact() {
        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &Message::Sync {
                frame: 7,
                payload: vec![0xAA, 0xBB],
            },
        )
        .expect("encode");

        // token, length = 10 LE, frame = 7 LE, blob
        assert_eq!(buf[0], 17);
        assert_eq!(&buf[1..5], &10u32.to_le_bytes());
        assert_eq!(&buf[5..13], &7u64.to_le_bytes());
        assert_eq!(&buf[13..], &[0xAA, 0xBB]);
    }

    #[test]
    fn empty_sync_is_a_valid_ack() {
        let msg = roundtrip(&Message::Sync {
            frame: 41,
            payload: Vec::new(),
        });
        assert_eq!(
            msg,
            Message::Sync {
                frame: 41,
                payload: Vec::new()
            }
        );
    }

    #[test]
    fn frame_number_wraps_on_encode() {
        let msg = roundtrip(&Message::Sync {
            frame: FRAME_NUMBER_WRAP + 3,
            payload: Vec::new(),
        });
        assert!(matches!(msg, Message::Sync { frame: 3, .. }));
    }

    #[test]
    fn unknown_token_skips_payload_and_keeps_alignment() {
        let mut buf = Vec::new();
        buf.push(0x7F);
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        write_message(&mut buf, &Message::Connected).expect("encode");

        let mut cursor = Cursor::new(buf);
        let err = read_message(&mut cursor, MAX_PAYLOAD_SIZE).expect_err("unknown token");
        assert!(err.is_transient());
        assert!(matches!(
            err,
            ProtocolError::UnknownToken {
                token: 0x7F,
                skipped: 3
            }
        ));

        // the next frame decodes cleanly
        let msg = read_message(&mut cursor, MAX_PAYLOAD_SIZE).expect("aligned");
        assert_eq!(msg, Message::Connected);
    }

    #[test]
    fn oversized_length_is_fatal() {
        let mut buf = Vec::new();
        buf.push(Token::Sync as u8);
        buf.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_le_bytes());

        let err =
            read_message(&mut Cursor::new(buf), MAX_PAYLOAD_SIZE).expect_err("too large");
        assert!(!err.is_transient());
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
    }

    #[test]
    fn truncated_frame_is_fatal() {
        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &Message::Sync {
                frame: 1,
                payload: vec![0u8; 16],
            },
        )
        .expect("encode");
        buf.truncate(buf.len() - 4);

        let err = read_message(&mut Cursor::new(buf), MAX_PAYLOAD_SIZE).expect_err("truncated");
        assert!(!err.is_transient());
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn short_sync_payload_is_transient() {
        let mut buf = Vec::new();
        buf.push(Token::Sync as u8);
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&[9, 9, 9, 9]);
        write_message(&mut buf, &Message::Size { required: 2048 }).expect("encode");

        let mut cursor = Cursor::new(buf);
        let err = read_message(&mut cursor, MAX_PAYLOAD_SIZE).expect_err("short sync");
        assert!(err.is_transient());

        let msg = read_message(&mut cursor, MAX_PAYLOAD_SIZE).expect("aligned");
        assert_eq!(msg, Message::Size { required: 2048 });
    }

    #[test]
    fn size_and_ack_roundtrip() {
        assert_eq!(
            roundtrip(&Message::Size { required: 4096 }),
            Message::Size { required: 4096 }
        );
        assert_eq!(
            roundtrip(&Message::Ack { package: -7 }),
            Message::Ack { package: -7 }
        );
        assert_eq!(roundtrip(&Message::Disconnect), Message::Disconnect);
    }

    proptest::proptest! {
        /// A stream of mixed messages decodes back to the same sequence, in
        /// order, regardless of payload contents.
        #[test]
        fn message_stream_stays_aligned(
            frames in proptest::collection::vec((0u64..FRAME_NUMBER_WRAP, proptest::collection::vec(proptest::num::u8::ANY, 0..256)), 1..8)
        ) {
            let mut buf = Vec::new();
            let mut expected = Vec::new();
            for (frame, payload) in frames {
                let msg = Message::Sync { frame, payload };
                write_message(&mut buf, &msg).expect("encode");
                expected.push(msg);
            }

            let mut cursor = Cursor::new(buf);
            for msg in &expected {
                let decoded = read_message(&mut cursor, MAX_PAYLOAD_SIZE).expect("decode");
                proptest::prop_assert_eq!(&decoded, msg);
            }
        }
    }
}
