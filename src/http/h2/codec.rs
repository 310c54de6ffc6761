//! HTTP/2 frame encoding and decoding
//!
//! The 9-byte frame header wire format from RFC 7540 Section 4.1, encoders
//! for every frame the server or test client sends, and payload helpers for
//! padding and priority fields on receipt.

use super::error::{Error, Result};
use super::frames::*;
use crate::http::{HttpSession, SessionOps};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest frame payload the codec will accept (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Frame codec: header encode/decode and per-frame wire encoders
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header: 24-bit length, type, flags, 31-bit stream ID
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        header[..3].copy_from_slice(&(length as u32).to_be_bytes()[1..]);
        header[3] = frame_type.as_u8();
        header[4] = flags.bits();
        header[5..].copy_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());

        header
    }

    /// Decode a frame header into (type, flags, stream ID, payload length).
    ///
    /// An unknown frame type is `None`; RFC 7540 requires it to be ignored.
    pub fn decode_header(
        bytes: &[u8; FRAME_HEADER_SIZE],
    ) -> (Option<FrameType>, FrameFlags, u32, usize) {
        let length = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize;
        let frame_type = FrameType::from_u8(bytes[3]);
        let flags = FrameFlags::from_bits(bytes[4]);
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFF_FFFF;

        (frame_type, flags, stream_id, length)
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut flags = FrameFlags::NONE;
        if frame.end_stream {
            flags |= FrameFlags::END_STREAM;
        }

        let pad_len = frame.padding.unwrap_or(0) as usize;
        let mut payload_len = frame.data.len();
        if frame.padding.is_some() {
            flags |= FrameFlags::PADDED;
            payload_len += 1 + pad_len;
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Data,
            flags,
            frame.stream_id,
            payload_len,
        ));
        if frame.padding.is_some() {
            buf.put_u8(pad_len as u8);
        }
        buf.put_slice(&frame.data);
        buf.put_bytes(0, pad_len);

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut flags = FrameFlags::NONE;
        if frame.end_stream {
            flags |= FrameFlags::END_STREAM;
        }
        if frame.end_headers {
            flags |= FrameFlags::END_HEADERS;
        }

        let mut payload_len = frame.header_block.len();
        if frame.priority.is_some() {
            flags |= FrameFlags::PRIORITY;
            payload_len += 5;
        }
        let pad_len = frame.padding.unwrap_or(0) as usize;
        if frame.padding.is_some() {
            flags |= FrameFlags::PADDED;
            payload_len += 1 + pad_len;
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Headers,
            flags,
            frame.stream_id,
            payload_len,
        ));
        if frame.padding.is_some() {
            buf.put_u8(pad_len as u8);
        }
        if let Some(priority) = &frame.priority {
            let mut dep = priority.stream_dependency;
            if priority.exclusive {
                dep |= 0x8000_0000;
            }
            buf.put_u32(dep);
            buf.put_u8(priority.weight);
        }
        buf.put_slice(&frame.header_block);
        buf.put_bytes(0, pad_len);

        buf.freeze()
    }

    /// Encode a SETTINGS frame; an ACK has no payload
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let (flags, payload) = if frame.ack {
            (FrameFlags::ACK, Vec::new())
        } else {
            (FrameFlags::NONE, frame.settings.encode_payload())
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Settings,
            flags,
            0,
            payload.len(),
        ));
        buf.put_slice(&payload);

        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::ACK
        } else {
            FrameFlags::NONE
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        buf.put_slice(&Self::encode_header(FrameType::Ping, flags, 0, 8));
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = 8 + frame.debug_data.len();

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Goaway,
            FrameFlags::NONE,
            0,
            payload_len,
        ));
        buf.put_u32(frame.last_stream_id & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);

        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::WindowUpdate,
            FrameFlags::NONE,
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.size_increment & 0x7FFF_FFFF);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::RstStream,
            FrameFlags::NONE,
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.error_code.as_u32());

        buf.freeze()
    }

    /// Read one frame from a session
    ///
    /// Returns `(type, flags, stream_id, payload)`; an unknown frame type is
    /// `None` and the caller skips it.
    pub fn read_frame<S: SessionOps>(
        session: &mut HttpSession<S>,
    ) -> Result<(Option<FrameType>, FrameFlags, u32, Bytes)> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        Self::read_exact(session, &mut header)?;

        let (frame_type, flags, stream_id, payload_len) = Self::decode_header(&header);

        if payload_len > MAX_FRAME_SIZE {
            return Err(Error::FrameSize(format!(
                "Frame payload too large: {}",
                payload_len
            )));
        }

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            Self::read_exact(session, &mut payload)?;
        }

        Ok((frame_type, flags, stream_id, Bytes::from(payload)))
    }

    fn read_exact<S: SessionOps>(session: &mut HttpSession<S>, buf: &mut [u8]) -> Result<()> {
        let mut read = 0;
        while read < buf.len() {
            let n = session.read(&mut buf[read..])?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Connection closed mid-frame",
                )));
            }
            read += n;
        }
        Ok(())
    }

    /// Strip the pad-length prefix and trailing padding from a padded
    /// DATA/HEADERS payload
    pub fn strip_padding(flags: FrameFlags, payload: Bytes) -> Result<Bytes> {
        if !flags.is_padded() {
            return Ok(payload);
        }
        if payload.is_empty() {
            return Err(Error::FrameSize("Padded frame without pad length".into()));
        }
        let pad_len = payload[0] as usize;
        if 1 + pad_len > payload.len() {
            return Err(Error::Protocol("Padding exceeds frame payload".into()));
        }
        Ok(payload.slice(1..payload.len() - pad_len))
    }

    /// Split an (unpadded) HEADERS payload into its optional priority
    /// fields and the header block fragment
    pub fn split_headers_payload(
        flags: FrameFlags,
        payload: Bytes,
    ) -> Result<(Option<PrioritySpec>, Bytes)> {
        if !flags.is_priority() {
            return Ok((None, payload));
        }
        if payload.len() < 5 {
            return Err(Error::FrameSize("HEADERS priority fields truncated".into()));
        }
        let dep = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let spec = PrioritySpec {
            stream_dependency: dep & 0x7FFF_FFFF,
            exclusive: dep & 0x8000_0000 != 0,
            weight: payload[4],
        };
        Ok((Some(spec), payload.slice(5..)))
    }
}

/// HPACK-encode a list of header fields into one block
pub fn encode_field_block(
    encoder: &mut hpack::Encoder<'_>,
    fields: &[(Vec<u8>, Vec<u8>)],
) -> Bytes {
    let refs = fields.iter().map(|(n, v)| (n.as_slice(), v.as_slice()));
    Bytes::from(encoder.encode(refs))
}

/// HPACK-decode a header block into name/value strings (lossily, header
/// field bytes are expected to be ASCII)
pub fn decode_field_block(
    decoder: &mut hpack::Decoder<'_>,
    block: &[u8],
) -> Result<Vec<(String, String)>> {
    let decoded = decoder
        .decode(block)
        .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;

    Ok(decoded
        .into_iter()
        .map(|(n, v)| {
            (
                String::from_utf8_lossy(&n).into_owned(),
                String::from_utf8_lossy(&v).into_owned(),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::error::ErrorCode;
    use crate::http::h2::settings::SettingsBuilder;

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::END_STREAM | FrameFlags::END_HEADERS;
        let header = FrameCodec::encode_header(FrameType::Headers, flags, 42, 1234);
        let (decoded_type, decoded_flags, decoded_id, decoded_len) =
            FrameCodec::decode_header(&header);

        assert_eq!(decoded_type, Some(FrameType::Headers));
        assert_eq!(decoded_flags, flags);
        assert_eq!(decoded_id, 42);
        assert_eq!(decoded_len, 1234);
    }

    #[test]
    fn test_decode_header_masks_reserved_bit() {
        let mut header = FrameCodec::encode_header(FrameType::Data, FrameFlags::NONE, 7, 0);
        header[5] |= 0x80;
        let (_, _, stream_id, _) = FrameCodec::decode_header(&header);
        assert_eq!(stream_id, 7);
    }

    #[test]
    fn test_decode_unknown_frame_type() {
        let mut header = FrameCodec::encode_header(FrameType::Data, FrameFlags::NONE, 1, 0);
        header[3] = 0x42;
        let (frame_type, _, _, _) = FrameCodec::decode_header(&header);
        assert_eq!(frame_type, None);
    }

    #[test]
    fn test_encode_data_frame() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true);
        let encoded = FrameCodec::encode_data_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 5]);
        assert_eq!(encoded[3], FrameType::Data.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM.bits());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]);
        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_encode_data_frame_with_padding() {
        let frame = DataFrame::new(1, Bytes::from("Hi"), false).with_padding(10);
        let encoded = FrameCodec::encode_data_frame(&frame);

        // 1 (pad length) + 2 (data) + 10 (padding) = 13
        assert_eq!(encoded[0..3], [0, 0, 13]);
        assert!(FrameFlags::from_bits(encoded[4]).is_padded());
        assert_eq!(encoded[9], 10);
        assert_eq!(&encoded[10..12], b"Hi");
        assert_eq!(&encoded[12..22], &[0u8; 10]);
    }

    #[test]
    fn test_strip_padding_round_trip() {
        let frame = DataFrame::new(1, Bytes::from("Hi"), false).with_padding(10);
        let encoded = FrameCodec::encode_data_frame(&frame);

        let flags = FrameFlags::from_bits(encoded[4]);
        let payload = Bytes::copy_from_slice(&encoded[9..]);
        let stripped = FrameCodec::strip_padding(flags, payload).unwrap();
        assert_eq!(&stripped[..], b"Hi");
    }

    #[test]
    fn test_strip_padding_rejects_overrun() {
        let payload = Bytes::from_static(&[200, 1, 2]);
        assert!(FrameCodec::strip_padding(FrameFlags::PADDED, payload).is_err());
    }

    #[test]
    fn test_encode_settings_frame() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();

        let encoded = FrameCodec::encode_settings_frame(&SettingsFrame::new(settings));

        assert_eq!(encoded[3], FrameType::Settings.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);
        // 3 settings * 6 bytes
        assert_eq!(encoded[0..3], [0, 0, 18]);
    }

    #[test]
    fn test_encode_settings_ack() {
        let encoded = FrameCodec::encode_settings_frame(&SettingsFrame::ack());
        assert_eq!(encoded[0..3], [0, 0, 0]);
        assert_eq!(encoded[4], FrameFlags::ACK.bits());
    }

    #[test]
    fn test_encode_ping_frame() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let encoded = FrameCodec::encode_ping_frame(&PingFrame::new(data));

        assert_eq!(encoded[0..3], [0, 0, 8]);
        assert_eq!(encoded[3], FrameType::Ping.as_u8());
        assert_eq!(&encoded[9..17], &data);
    }

    #[test]
    fn test_encode_goaway_frame() {
        let frame = GoawayFrame::new(5, ErrorCode::ProtocolError, Bytes::from_static(b"bye"));
        let encoded = FrameCodec::encode_goaway_frame(&frame);

        assert_eq!(encoded[3], FrameType::Goaway.as_u8());
        assert_eq!(&encoded[9..13], &[0, 0, 0, 5]);
        assert_eq!(&encoded[13..17], &[0, 0, 0, 1]);
        assert_eq!(&encoded[17..], b"bye");
    }

    #[test]
    fn test_encode_window_update() {
        let encoded = FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(42, 1000));

        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(encoded[3], FrameType::WindowUpdate.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 42]);

        let increment = u32::from_be_bytes([encoded[9], encoded[10], encoded[11], encoded[12]]);
        assert_eq!(increment, 1000);
    }

    #[test]
    fn test_encode_rst_stream() {
        let encoded =
            FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(9, ErrorCode::Cancel));

        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(encoded[3], FrameType::RstStream.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 9]);
        assert_eq!(&encoded[9..13], &ErrorCode::Cancel.as_u32().to_be_bytes());
    }

    #[test]
    fn test_split_headers_payload_with_priority() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x8000_0003u32.to_be_bytes());
        payload.push(15);
        payload.extend_from_slice(b"block");

        let (priority, block) =
            FrameCodec::split_headers_payload(FrameFlags::PRIORITY, Bytes::from(payload))
                .unwrap();

        let priority = priority.unwrap();
        assert_eq!(priority.stream_dependency, 3);
        assert!(priority.exclusive);
        assert_eq!(priority.weight, 15);
        assert_eq!(&block[..], b"block");
    }
}
