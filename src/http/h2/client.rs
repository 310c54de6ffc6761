//! HTTP/2 client
//!
//! A synchronous HTTP/2 client used by the integration tests to exercise
//! the server: preface/SETTINGS handshake, plain requests, and the
//! client half of the h2c upgrade (read the stream-1 response after a 101).

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::ConnectionFlowControl;
use super::frames::{
    DataFrame, FrameType, GoawayFrame, HeadersFrame, PingFrame, SettingsFrame, WindowUpdateFrame,
};
use super::settings::{Settings, SettingsBuilder};
use super::stream::{StreamId, StreamManager};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID};
use crate::http::{HttpSession, SessionOps};
use bytes::Bytes;
use std::collections::HashMap;

/// HTTP/2 client over any session transport
pub struct H2Client<S: SessionOps> {
    session: HttpSession<S>,
    streams: StreamManager,
    flow: ConnectionFlowControl,
    hpack_encoder: hpack::Encoder<'static>,
    hpack_decoder: hpack::Decoder<'static>,
    local_settings: Settings,
    remote_settings: Settings,
    connected: bool,
}

impl<S: SessionOps> H2Client<S> {
    /// Create a client with default settings
    pub fn new(session: S) -> Result<Self> {
        H2ClientBuilder::new().build(session)
    }

    /// Perform the connection preface and settings exchange
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        self.session.write_all(CONNECTION_PREFACE)?;
        let frame = SettingsFrame::new(self.local_settings.clone());
        self.session
            .write_all(&FrameCodec::encode_settings_frame(&frame))?;

        // Wait for the server's SETTINGS
        self.recv_settings()?;

        self.connected = true;
        Ok(())
    }

    /// Receive and apply a SETTINGS frame, acking it
    pub fn recv_settings(&mut self) -> Result<()> {
        let (frame_type, flags, stream_id, payload) = self.recv_frame()?;

        if frame_type != Some(FrameType::Settings) {
            return Err(Error::Protocol(format!(
                "Expected SETTINGS frame, got {:?}",
                frame_type
            )));
        }
        if stream_id != CONNECTION_STREAM_ID {
            return Err(Error::Protocol(
                "SETTINGS frame must have stream ID 0".to_string(),
            ));
        }
        if flags.is_ack() {
            return Ok(());
        }

        self.apply_remote_settings(&payload)
    }

    /// Track the server's announced settings and ack them
    fn apply_remote_settings(&mut self, payload: &[u8]) -> Result<()> {
        let settings = Settings::parse_payload(payload)?;
        if let Some(size) = settings.initial_window_size {
            self.streams.update_initial_send_window(size)?;
        }
        self.streams
            .set_max_concurrent_streams(settings.max_concurrent_streams);
        self.remote_settings.merge(&settings);

        self.session
            .write_all(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()))?;
        Ok(())
    }

    /// Send a GET request and wait for its response
    pub fn get(&mut self, path: &str) -> Result<H2Response> {
        self.request("GET", path, &[], Bytes::new())
    }

    /// Send a POST request and wait for its response
    pub fn post(&mut self, path: &str, headers: &[(&str, &str)], body: Bytes) -> Result<H2Response> {
        self.request("POST", path, headers, body)
    }

    /// Send a request and wait for its response
    pub fn request(
        &mut self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> Result<H2Response> {
        if !self.connected {
            self.connect()?;
        }

        let stream_id = self.streams.create_stream()?;

        let mut fields: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (b":method".to_vec(), method.as_bytes().to_vec()),
            (b":path".to_vec(), path.as_bytes().to_vec()),
            (b":scheme".to_vec(), b"http".to_vec()),
            (b":authority".to_vec(), b"localhost".to_vec()),
        ];
        for (name, value) in headers {
            fields.push((name.as_bytes().to_vec(), value.as_bytes().to_vec()));
        }

        let block = super::codec::encode_field_block(&mut self.hpack_encoder, &fields);

        let has_body = !body.is_empty();
        let headers_frame = HeadersFrame::new(stream_id, block, !has_body, true);
        self.session
            .write_all(&FrameCodec::encode_headers_frame(&headers_frame))?;
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.mark_headers_sent(!has_body);
        }

        if has_body {
            self.send_data(stream_id, body)?;
        }

        self.recv_response(stream_id)
    }

    /// After an h2c upgrade: run the preface exchange and read the response
    /// the server owes on stream 1
    pub fn upgraded_response(&mut self) -> Result<H2Response> {
        let stream_id = self.streams.reserve_upgraded_local();
        self.connect()?;
        self.recv_response(stream_id)
    }

    /// Send one DATA frame carrying the whole body
    fn send_data(&mut self, stream_id: StreamId, body: Bytes) -> Result<()> {
        let granted = self.flow.send_window_mut().consume(body.len());
        if granted < body.len() {
            return Err(Error::FlowControl("Connection window exhausted".to_string()));
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            let granted = stream.flow_control_mut().send_window_mut().consume(body.len());
            if granted < body.len() {
                return Err(Error::FlowControl("Stream window exhausted".to_string()));
            }
            stream.mark_local_end();
        }

        let frame = DataFrame::new(stream_id, body, true);
        self.session
            .write_all(&FrameCodec::encode_data_frame(&frame))?;
        Ok(())
    }

    /// Send a PING
    pub fn send_ping(&mut self, data: [u8; 8]) -> Result<()> {
        self.session
            .write_all(&FrameCodec::encode_ping_frame(&PingFrame::new(data)))?;
        Ok(())
    }

    /// Send a GOAWAY
    pub fn send_goaway(&mut self, error_code: ErrorCode, debug: &str) -> Result<()> {
        let frame = GoawayFrame::new(0, error_code, Bytes::from(debug.to_string()));
        self.session
            .write_all(&FrameCodec::encode_goaway_frame(&frame))?;
        Ok(())
    }

    /// Read one raw frame
    pub fn recv_frame(
        &mut self,
    ) -> Result<(Option<FrameType>, super::frames::FrameFlags, StreamId, Bytes)> {
        FrameCodec::read_frame(&mut self.session)
    }

    /// Collect the response for one stream, servicing connection-level
    /// frames that interleave with it
    pub fn recv_response(&mut self, stream_id: StreamId) -> Result<H2Response> {
        let mut response = H2Response {
            stream_id,
            status: 0,
            headers: HashMap::new(),
            body: Vec::new(),
        };

        loop {
            let (frame_type, flags, recv_id, payload) = self.recv_frame()?;

            let Some(frame_type) = frame_type else {
                continue;
            };

            match frame_type {
                FrameType::Settings => {
                    if !flags.is_ack() {
                        self.apply_remote_settings(&payload)?;
                    }
                }
                FrameType::Ping => {
                    if !flags.is_ack() && payload.len() == 8 {
                        let mut data = [0u8; 8];
                        data.copy_from_slice(&payload);
                        self.session
                            .write_all(&FrameCodec::encode_ping_frame(&PingFrame::ack(data)))?;
                    }
                }
                FrameType::WindowUpdate => {
                    if payload.len() != 4 {
                        return Err(Error::FrameSize(
                            "WINDOW_UPDATE payload must be 4 bytes".to_string(),
                        ));
                    }
                    let increment =
                        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    if recv_id == CONNECTION_STREAM_ID {
                        self.flow.send_window_mut().increase(increment)?;
                    } else if let Some(stream) = self.streams.get_mut(recv_id) {
                        stream.flow_control_mut().send_window_mut().increase(increment)?;
                    }
                }
                FrameType::Headers if recv_id == stream_id => {
                    let payload = FrameCodec::strip_padding(flags, payload)?;
                    let (_, block) = FrameCodec::split_headers_payload(flags, payload)?;

                    let fields =
                        super::codec::decode_field_block(&mut self.hpack_decoder, &block)?;
                    for (name, value) in fields {
                        if name == ":status" {
                            response.status = value.parse().unwrap_or(0);
                        } else {
                            response.headers.insert(name, value);
                        }
                    }

                    if flags.is_end_stream() {
                        self.streams.remove(stream_id);
                        return Ok(response);
                    }
                }
                FrameType::Data if recv_id == stream_id => {
                    let data = FrameCodec::strip_padding(flags, payload)?;
                    self.flow.recv_window_mut().decrease(data.len());
                    response.body.extend_from_slice(&data);

                    // Keep the server's windows open for large bodies
                    let conn_grant = self.flow.recv_window_mut().replenish();
                    if conn_grant > 0 {
                        self.session.write_all(&FrameCodec::encode_window_update_frame(
                            &WindowUpdateFrame::new(CONNECTION_STREAM_ID, conn_grant),
                        ))?;
                    }

                    if flags.is_end_stream() {
                        self.streams.remove(stream_id);
                        return Ok(response);
                    }
                }
                FrameType::RstStream if recv_id == stream_id => {
                    self.streams.remove(stream_id);
                    return Err(Error::Cancel(stream_id));
                }
                FrameType::Goaway => {
                    return Err(Error::ConnectionClosed);
                }
                // Frames for other streams are dropped; the tests drive one
                // stream at a time
                _ => {}
            }
        }
    }

    /// Settings announced by the server
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }
}

/// A fully received HTTP/2 response
#[derive(Debug, Clone)]
pub struct H2Response {
    /// Stream the response arrived on
    pub stream_id: StreamId,
    /// Status code from `:status`
    pub status: u16,
    /// Response headers (lowercase names)
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
}

impl H2Response {
    /// Status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Header value by (lowercase) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// Response body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// HTTP/2 client builder
pub struct H2ClientBuilder {
    settings: SettingsBuilder,
}

impl H2ClientBuilder {
    /// Create a builder with the default client settings
    pub fn new() -> Self {
        H2ClientBuilder {
            settings: SettingsBuilder::new()
                .header_table_size(super::DEFAULT_HEADER_TABLE_SIZE)
                .enable_push(false)
                .initial_window_size(super::DEFAULT_INITIAL_WINDOW_SIZE)
                .max_frame_size(super::DEFAULT_MAX_FRAME_SIZE),
        }
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Build the client
    pub fn build<S: SessionOps>(self, session: S) -> Result<H2Client<S>> {
        let local_settings = self.settings.build()?;

        Ok(H2Client {
            session: HttpSession::new(session),
            streams: StreamManager::new_client(),
            flow: ConnectionFlowControl::new(),
            hpack_encoder: hpack::Encoder::new(),
            hpack_decoder: hpack::Decoder::new(),
            local_settings,
            remote_settings: Settings::new(),
            connected: false,
        })
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
