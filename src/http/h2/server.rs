//! HTTP/2 server-side connection state machine
//!
//! `H2Connection` owns one accepted transport for the rest of its life and
//! serves requests on it. The connection is entered one of two ways:
//!
//! - [`H2Connection::accept`] for transports whose TLS handshake negotiated
//!   `h2` (or a raw cleartext h2 client with prior knowledge),
//! - [`H2Connection::upgrade`] for cleartext connections switched over from
//!   HTTP/1.1, where the upgrading request is served as stream 1.
//!
//! The service callback maps one complete request to one response; request
//! scheduling, error responses, and logging belong to the caller.

use super::codec::FrameCodec;
use super::error::{Error, Result};
use super::flow_control::ConnectionFlowControl;
use super::frames::{
    DataFrame, FrameFlags, FrameType, GoawayFrame, HeadersFrame, PingFrame, SettingsFrame,
    WindowUpdateFrame,
};
use super::settings::Settings;
use super::stream::{StreamId, StreamManager};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID};
use crate::http::{HttpRequest, HttpResponse, HttpSession, Method, SessionOps, Version};
use bytes::Bytes;
use std::collections::VecDeque;

/// Headers that are connection-specific in HTTP/1.1 and forbidden on an
/// HTTP/2 response (RFC 7540 Section 8.1.2.2)
const CONNECTION_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Outcome of waiting for send-window capacity
enum WindowWait {
    /// Capacity available again
    Ready,
    /// The peer reset the stream being written
    StreamReset,
    /// The peer is going away; stop writing
    PeerGone,
}

/// Server side of one HTTP/2 connection
pub struct H2Connection<S: SessionOps, F>
where
    F: FnMut(HttpRequest) -> HttpResponse,
{
    session: HttpSession<S>,
    streams: StreamManager,
    flow: ConnectionFlowControl,
    hpack_encoder: hpack::Encoder<'static>,
    hpack_decoder: hpack::Decoder<'static>,
    local_settings: Settings,
    remote_settings: Settings,
    service: F,
    /// Streams with a fully received request, waiting to be served
    ready: VecDeque<StreamId>,
    peer_goaway: bool,
}

impl<S: SessionOps, F> H2Connection<S, F>
where
    F: FnMut(HttpRequest) -> HttpResponse,
{
    /// Create a connection over a session; no I/O happens until `accept`
    /// or `upgrade`
    pub fn new(session: HttpSession<S>, service: F) -> Self {
        let local_settings = Settings {
            header_table_size: Some(super::DEFAULT_HEADER_TABLE_SIZE),
            enable_push: Some(false),
            max_concurrent_streams: Some(128),
            initial_window_size: Some(super::DEFAULT_INITIAL_WINDOW_SIZE),
            max_frame_size: Some(super::DEFAULT_MAX_FRAME_SIZE),
            max_header_list_size: None,
        };

        H2Connection {
            session,
            streams: StreamManager::new_server(),
            flow: ConnectionFlowControl::new(),
            hpack_encoder: hpack::Encoder::new(),
            hpack_decoder: hpack::Decoder::new(),
            local_settings,
            remote_settings: Settings::new(),
            service,
            ready: VecDeque::new(),
            peer_goaway: false,
        }
    }

    /// Establish a direct HTTP/2 connection: read the client preface and
    /// announce our settings
    pub fn accept(&mut self) -> Result<()> {
        self.read_preface()?;
        self.send_settings()?;
        Ok(())
    }

    /// Take over after an h2c upgrade.
    ///
    /// The 101 response has already been written. Per RFC 7540 Section 3.2
    /// the server preface is sent first, the client preface follows the
    /// upgraded request, and the request itself - method, target, headers,
    /// and the fully buffered body - is served as stream 1, half-closed
    /// (remote).
    pub fn upgrade(&mut self, seed: HttpRequest) -> Result<()> {
        self.send_settings()?;
        self.read_preface()?;

        let stream_id = self.streams.reserve_upgraded_remote();
        self.serve_request(stream_id, seed)?;
        Ok(())
    }

    /// Serve frames until the peer goes away or the connection dies.
    ///
    /// Fatal protocol errors emit a GOAWAY with the matching wire code
    /// before propagating.
    pub fn run(&mut self) -> Result<()> {
        match self.run_inner() {
            Ok(()) => Ok(()),
            Err(e) => {
                let goaway = GoawayFrame::new(
                    self.streams.last_remote_id(),
                    e.wire_code(),
                    Bytes::from(e.to_string()),
                );
                let _ = self
                    .session
                    .write_all(&FrameCodec::encode_goaway_frame(&goaway));
                Err(e)
            }
        }
    }

    fn run_inner(&mut self) -> Result<()> {
        loop {
            let frame = match FrameCodec::read_frame(&mut self.session) {
                Ok(frame) => frame,
                // Peer hangup or idle timeout between requests ends the
                // connection without ceremony
                Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(())
                }
                Err(Error::Http(crate::http::Error::Io(ref e)))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::UnexpectedEof
                            | std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::BrokenPipe
                    ) =>
                {
                    return Ok(())
                }
                Err(Error::Http(crate::http::Error::ConnectionClosed)) => return Ok(()),
                Err(Error::Http(crate::http::Error::Timeout)) => return Ok(()),
                Err(e) => return Err(e),
            };

            let (frame_type, flags, stream_id, payload) = frame;
            let done = self.process_frame(frame_type, flags, stream_id, payload)?;

            while let Some(ready_id) = self.ready.pop_front() {
                self.dispatch_stream(ready_id)?;
            }

            if done || self.peer_goaway {
                return Ok(());
            }
        }
    }

    /// Handle one frame. Completed requests are queued on `self.ready`
    /// rather than dispatched inline so this stays re-entrant from the
    /// window-wait path.
    fn process_frame(
        &mut self,
        frame_type: Option<FrameType>,
        flags: FrameFlags,
        stream_id: StreamId,
        payload: Bytes,
    ) -> Result<bool> {
        let Some(frame_type) = frame_type else {
            // Unknown frame types are ignored per RFC 7540 Section 4.1
            return Ok(false);
        };

        match frame_type {
            FrameType::Settings => self.on_settings(flags, stream_id, &payload)?,
            FrameType::Ping => self.on_ping(flags, stream_id, &payload)?,
            FrameType::Headers => {
                let payload = FrameCodec::strip_padding(flags, payload)?;
                let (_priority, block) = FrameCodec::split_headers_payload(flags, payload)?;

                let stream = self.streams.open_remote(stream_id)?;
                stream.recv_headers(&block, flags.is_end_headers(), flags.is_end_stream())?;
                if stream.is_complete() {
                    self.ready.push_back(stream_id);
                }
            }
            FrameType::Continuation => {
                let stream = self
                    .streams
                    .get_mut(stream_id)
                    .ok_or(Error::StreamClosed(stream_id))?;
                stream.recv_continuation(&payload, flags.is_end_headers())?;
                if stream.is_complete() {
                    self.ready.push_back(stream_id);
                }
            }
            FrameType::Data => {
                let data = FrameCodec::strip_padding(flags, payload)?;
                self.on_data(flags, stream_id, &data)?;
            }
            FrameType::WindowUpdate => self.on_window_update(stream_id, &payload)?,
            FrameType::RstStream => {
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.close();
                    self.streams.remove(stream_id);
                }
            }
            // Priorities are parsed for wire compatibility and ignored
            FrameType::Priority => {}
            FrameType::PushPromise => {
                return Err(Error::Protocol("PUSH_PROMISE from a client".to_string()));
            }
            FrameType::Goaway => {
                self.peer_goaway = true;
            }
        }

        Ok(self.peer_goaway)
    }

    fn on_settings(&mut self, flags: FrameFlags, stream_id: StreamId, payload: &[u8]) -> Result<()> {
        if stream_id != CONNECTION_STREAM_ID {
            return Err(Error::Protocol(
                "SETTINGS frame must have stream ID 0".to_string(),
            ));
        }
        if flags.is_ack() {
            if !payload.is_empty() {
                return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
            }
            return Ok(());
        }

        let settings = Settings::parse_payload(payload)?;

        if let Some(size) = settings.initial_window_size {
            self.streams.update_initial_send_window(size)?;
        }
        self.streams
            .set_max_concurrent_streams(settings.max_concurrent_streams);
        self.remote_settings.merge(&settings);

        self.write_frame(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()))
    }

    fn on_ping(&mut self, flags: FrameFlags, stream_id: StreamId, payload: &[u8]) -> Result<()> {
        if stream_id != CONNECTION_STREAM_ID {
            return Err(Error::Protocol(
                "PING frame must have stream ID 0".to_string(),
            ));
        }
        if payload.len() != 8 {
            return Err(Error::FrameSize("PING payload must be 8 bytes".to_string()));
        }
        if flags.is_ack() {
            return Ok(());
        }

        let mut data = [0u8; 8];
        data.copy_from_slice(payload);
        self.write_frame(&FrameCodec::encode_ping_frame(&PingFrame::ack(data)))
    }

    fn on_data(&mut self, flags: FrameFlags, stream_id: StreamId, data: &[u8]) -> Result<()> {
        if stream_id == CONNECTION_STREAM_ID {
            return Err(Error::Protocol("DATA frame on stream 0".to_string()));
        }

        self.flow.recv_window_mut().decrease(data.len());

        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamClosed(stream_id))?;
        stream.recv_data(data, flags.is_end_stream())?;
        if stream.is_complete() {
            self.ready.push_back(stream_id);
        }

        self.replenish_windows(stream_id)
    }

    /// Grant the peer fresh window once half of either window is consumed
    fn replenish_windows(&mut self, stream_id: StreamId) -> Result<()> {
        let conn_increment = {
            let window = self.flow.recv_window_mut();
            if window.consumed() * 2 >= window.initial_size() as i64 {
                Some(window.replenish())
            } else {
                None
            }
        };
        if let Some(increment) = conn_increment {
            self.write_frame(&FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment),
            ))?;
        }

        let stream_increment = match self.streams.get_mut(stream_id) {
            Some(stream) if !stream.state().is_closed() => {
                let window = stream.flow_control_mut().recv_window_mut();
                if window.consumed() * 2 >= window.initial_size() as i64 {
                    Some(window.replenish())
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(increment) = stream_increment {
            self.write_frame(&FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(stream_id, increment),
            ))?;
        }
        Ok(())
    }

    fn on_window_update(&mut self, stream_id: StreamId, payload: &[u8]) -> Result<()> {
        if payload.len() != 4 {
            return Err(Error::FrameSize(
                "WINDOW_UPDATE payload must be 4 bytes".to_string(),
            ));
        }
        let increment =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;

        if stream_id == CONNECTION_STREAM_ID {
            self.flow.send_window_mut().increase(increment)?;
        } else if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.flow_control_mut().send_window_mut().increase(increment)?;
        }
        // Updates for unknown streams are ignored; the stream may have
        // been reset after the peer sent the update
        Ok(())
    }

    /// Decode and serve a fully received request
    fn dispatch_stream(&mut self, stream_id: StreamId) -> Result<()> {
        let Some(stream) = self.streams.get_mut(stream_id) else {
            // Reset between completion and dispatch
            return Ok(());
        };
        let block = stream.take_header_block();
        let body = stream.take_body();

        let request = self.decode_request(&block, body)?;
        self.serve_request(stream_id, request)
    }

    fn serve_request(&mut self, stream_id: StreamId, request: HttpRequest) -> Result<()> {
        let response = (self.service)(request);
        self.respond(stream_id, &response)?;

        if let Some(stream) = self.streams.get_mut(stream_id) {
            if stream.state().is_closed() {
                self.streams.remove(stream_id);
            }
        }
        Ok(())
    }

    /// Rebuild an `HttpRequest` from an HPACK header block and body
    fn decode_request(&mut self, block: &[u8], body: Vec<u8>) -> Result<HttpRequest> {
        let fields = super::codec::decode_field_block(&mut self.hpack_decoder, block)?;

        let mut method = None;
        let mut path = None;
        let mut builder = HttpRequest::builder().version(Version::Http2);

        for (name, value) in fields {
            match name.as_str() {
                ":method" => method = Some(value.parse::<Method>()?),
                ":path" => path = Some(value),
                ":authority" => builder = builder.header("Host", value),
                // :scheme carries no information the context doesn't
                n if n.starts_with(':') => {}
                _ => builder = builder.header(name, value),
            }
        }

        let method = method.ok_or_else(|| Error::InvalidHeader("missing :method".to_string()))?;
        let path = path.ok_or_else(|| Error::InvalidHeader("missing :path".to_string()))?;

        Ok(builder.method(method).uri(path).body(body).build())
    }

    /// Send a response on a stream: HPACK-encoded HEADERS, then DATA
    /// chunked to the peer's frame size and flow-control windows
    fn respond(&mut self, stream_id: StreamId, response: &HttpResponse) -> Result<()> {
        let status = response.status().code().to_string();
        let mut fields: Vec<(Vec<u8>, Vec<u8>)> =
            vec![(b":status".to_vec(), status.into_bytes())];

        for (name, value) in response.headers().iter() {
            if CONNECTION_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            fields.push((name.to_ascii_lowercase().into_bytes(), value.as_bytes().to_vec()));
        }
        if !response.body().is_empty() && !response.headers().contains("Content-Length") {
            fields.push((
                b"content-length".to_vec(),
                response.body().len().to_string().into_bytes(),
            ));
        }

        let block = super::codec::encode_field_block(&mut self.hpack_encoder, &fields);

        let end_stream = response.body().is_empty();
        let headers_frame = HeadersFrame::new(stream_id, block, end_stream, true);
        self.write_frame(&FrameCodec::encode_headers_frame(&headers_frame))?;

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.mark_headers_sent(end_stream);
        }
        if end_stream {
            return Ok(());
        }

        self.send_body(stream_id, response.body())
    }

    fn send_body(&mut self, stream_id: StreamId, body: &[u8]) -> Result<()> {
        let max_frame = self.remote_settings.max_frame_size() as usize;
        let mut offset = 0;

        while offset < body.len() {
            let stream_capacity = match self.streams.get_mut(stream_id) {
                Some(stream) if !stream.state().is_closed() => {
                    stream.flow_control_mut().send_capacity()
                }
                // Peer lost interest; nothing left to send
                _ => return Ok(()),
            };
            let capacity = stream_capacity
                .min(self.flow.send_capacity())
                .min(max_frame as i64);

            if capacity <= 0 {
                match self.wait_for_window(stream_id)? {
                    WindowWait::Ready => continue,
                    WindowWait::StreamReset | WindowWait::PeerGone => return Ok(()),
                }
            }

            let take = (capacity as usize).min(body.len() - offset);
            self.flow.send_window_mut().consume(take);
            if let Some(stream) = self.streams.get_mut(stream_id) {
                stream.flow_control_mut().send_window_mut().consume(take);
            }

            let end_stream = offset + take == body.len();
            let frame = DataFrame::new(
                stream_id,
                Bytes::copy_from_slice(&body[offset..offset + take]),
                end_stream,
            );
            self.write_frame(&FrameCodec::encode_data_frame(&frame))?;
            offset += take;

            if end_stream {
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.mark_local_end();
                }
            }
        }

        Ok(())
    }

    /// Block on the peer until a WINDOW_UPDATE restores send capacity.
    ///
    /// Other frames arriving meanwhile are processed normally; completed
    /// requests queue up and are served once the current response is done.
    fn wait_for_window(&mut self, stream_id: StreamId) -> Result<WindowWait> {
        loop {
            let (frame_type, flags, sid, payload) = FrameCodec::read_frame(&mut self.session)?;
            self.process_frame(frame_type, flags, sid, payload)?;

            if self.peer_goaway {
                return Ok(WindowWait::PeerGone);
            }
            match self.streams.get_mut(stream_id) {
                Some(stream) if !stream.state().is_closed() => {
                    if stream.flow_control_mut().send_capacity() > 0 && self.flow.send_capacity() > 0
                    {
                        return Ok(WindowWait::Ready);
                    }
                }
                _ => return Ok(WindowWait::StreamReset),
            }
        }
    }

    fn read_preface(&mut self) -> Result<()> {
        let mut buf = [0u8; 24];
        let mut read = 0;
        while read < buf.len() {
            let n = self.session.read(&mut buf[read..]).map_err(|_| Error::MissingPreface)?;
            if n == 0 {
                return Err(Error::MissingPreface);
            }
            read += n;
        }

        if &buf[..] != CONNECTION_PREFACE {
            return Err(Error::MissingPreface);
        }
        Ok(())
    }

    fn send_settings(&mut self) -> Result<()> {
        let frame = SettingsFrame::new(self.local_settings.clone());
        self.write_frame(&FrameCodec::encode_settings_frame(&frame))
    }

    fn write_frame(&mut self, encoded: &[u8]) -> Result<()> {
        self.session.write_all(encoded)?;
        self.session.flush()?;
        Ok(())
    }
}
