//! HTTP/2 stream accounting
//!
//! Stream states from RFC 7540 Section 5.1 and the per-connection stream
//! table. The server side only ever sees remote-initiated (odd) streams;
//! the client side allocates them. An h2c upgrade seeds stream 1 directly
//! into the half-closed state on both ends.

use super::error::{Error, Result};
use super::flow_control::StreamFlowControl;
use std::collections::HashMap;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No frames have been sent or received
    Idle,
    /// Both sides can send frames
    Open,
    /// We can't send, the peer can
    HalfClosedLocal,
    /// The peer can't send, we can
    HalfClosedRemote,
    /// Stream is done
    Closed,
}

impl StreamState {
    /// Whether this end may still send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Whether the peer may still send data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Whether the stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// One HTTP/2 stream: state, flow control, and the inbound message being
/// assembled from HEADERS/CONTINUATION/DATA frames
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    flow_control: StreamFlowControl,
    header_block: Vec<u8>,
    body: Vec<u8>,
    headers_complete: bool,
    stream_complete: bool,
}

impl H2Stream {
    /// Create a new idle stream
    pub fn new(id: StreamId) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow_control: StreamFlowControl::new(id),
            header_block: Vec::new(),
            body: Vec::new(),
            headers_complete: false,
            stream_complete: false,
        }
    }

    /// Create a stream with explicit window sizes
    pub fn with_window_sizes(id: StreamId, send_size: u32, recv_size: u32) -> Self {
        H2Stream {
            flow_control: StreamFlowControl::with_initial_sizes(id, send_size, recv_size),
            ..Self::new(id)
        }
    }

    /// Stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Flow control windows
    pub fn flow_control_mut(&mut self) -> &mut StreamFlowControl {
        &mut self.flow_control
    }

    /// Whether END_HEADERS has been received
    pub fn headers_complete(&self) -> bool {
        self.headers_complete
    }

    /// Whether the inbound message is fully received
    pub fn is_complete(&self) -> bool {
        self.headers_complete && self.stream_complete
    }

    /// Take the accumulated header block
    pub fn take_header_block(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.header_block)
    }

    /// Take the accumulated body
    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Process an inbound HEADERS payload
    pub fn recv_headers(
        &mut self,
        block: &[u8],
        end_headers: bool,
        end_stream: bool,
    ) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            // Trailers on an already-open stream
            StreamState::Open | StreamState::HalfClosedLocal => {
                if end_stream {
                    self.state = match self.state {
                        StreamState::HalfClosedLocal => StreamState::Closed,
                        _ => StreamState::HalfClosedRemote,
                    };
                }
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "HEADERS on stream {} in state {:?}",
                    self.id, self.state
                )));
            }
        }

        self.header_block.extend_from_slice(block);
        if end_headers {
            self.headers_complete = true;
        }
        if end_stream {
            self.stream_complete = true;
        }
        Ok(())
    }

    /// Process an inbound CONTINUATION payload
    pub fn recv_continuation(&mut self, block: &[u8], end_headers: bool) -> Result<()> {
        if self.headers_complete {
            return Err(Error::Protocol(format!(
                "CONTINUATION after END_HEADERS on stream {}",
                self.id
            )));
        }
        self.header_block.extend_from_slice(block);
        if end_headers {
            self.headers_complete = true;
        }
        Ok(())
    }

    /// Process an inbound DATA payload
    pub fn recv_data(&mut self, data: &[u8], end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }

        self.flow_control.recv_window_mut().decrease(data.len());
        self.body.extend_from_slice(data);

        if end_stream {
            self.stream_complete = true;
            self.state = match self.state {
                StreamState::HalfClosedLocal => StreamState::Closed,
                _ => StreamState::HalfClosedRemote,
            };
        }
        Ok(())
    }

    /// Record that this end sent HEADERS (opens an idle stream)
    pub fn mark_headers_sent(&mut self, end_stream: bool) {
        if self.state == StreamState::Idle {
            self.state = StreamState::Open;
        }
        if end_stream {
            self.mark_local_end();
        }
    }

    /// Record that this end sent END_STREAM
    pub fn mark_local_end(&mut self) {
        self.state = match self.state {
            StreamState::HalfClosedRemote => StreamState::Closed,
            StreamState::Closed => StreamState::Closed,
            _ => StreamState::HalfClosedLocal,
        };
    }

    /// Force-close the stream (RST_STREAM either direction)
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
    }
}

/// Per-connection stream table
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    /// Next stream ID this end may initiate (clients: odd, starting at 1)
    next_local_id: StreamId,
    /// Highest remote-initiated stream seen
    last_remote_id: StreamId,
    max_concurrent: Option<u32>,
    initial_send_window: u32,
    initial_recv_window: u32,
}

impl StreamManager {
    /// Stream table for the client end of a connection
    pub fn new_client() -> Self {
        StreamManager {
            streams: HashMap::new(),
            next_local_id: 1,
            last_remote_id: 0,
            max_concurrent: None,
            initial_send_window: super::DEFAULT_INITIAL_WINDOW_SIZE,
            initial_recv_window: super::DEFAULT_INITIAL_WINDOW_SIZE,
        }
    }

    /// Stream table for the server end of a connection
    pub fn new_server() -> Self {
        StreamManager {
            next_local_id: 2,
            ..Self::new_client()
        }
    }

    /// Allocate and open a locally-initiated stream (client side)
    pub fn create_stream(&mut self) -> Result<StreamId> {
        self.check_concurrency()?;

        let id = self.next_local_id;
        self.next_local_id += 2;
        self.streams.insert(
            id,
            H2Stream::with_window_sizes(id, self.initial_send_window, self.initial_recv_window),
        );
        Ok(id)
    }

    /// Register stream 1 after an h2c upgrade, client side: the request
    /// went out as HTTP/1.1, so the stream is half-closed (local).
    pub fn reserve_upgraded_local(&mut self) -> StreamId {
        let mut stream =
            H2Stream::with_window_sizes(1, self.initial_send_window, self.initial_recv_window);
        stream.mark_headers_sent(true);
        self.streams.insert(1, stream);
        self.next_local_id = 3;
        1
    }

    /// Register stream 1 after an h2c upgrade, server side: the request
    /// arrived complete over HTTP/1.1, so the stream is half-closed (remote).
    pub fn reserve_upgraded_remote(&mut self) -> StreamId {
        let mut stream =
            H2Stream::with_window_sizes(1, self.initial_send_window, self.initial_recv_window);
        stream.state = StreamState::HalfClosedRemote;
        stream.headers_complete = true;
        stream.stream_complete = true;
        self.last_remote_id = 1;
        self.streams.insert(1, stream);
        1
    }

    /// Look up or open a remote-initiated stream (server side).
    ///
    /// Remote streams must be odd and increasing.
    pub fn open_remote(&mut self, id: StreamId) -> Result<&mut H2Stream> {
        if self.streams.contains_key(&id) {
            return Ok(self.streams.get_mut(&id).unwrap());
        }

        if id % 2 == 0 {
            return Err(Error::Protocol(format!(
                "Client-initiated stream {} must be odd",
                id
            )));
        }
        if id <= self.last_remote_id {
            return Err(Error::StreamClosed(id));
        }
        self.check_concurrency()?;

        self.last_remote_id = id;
        self.streams.insert(
            id,
            H2Stream::with_window_sizes(id, self.initial_send_window, self.initial_recv_window),
        );
        Ok(self.streams.get_mut(&id).unwrap())
    }

    /// Get a stream by ID
    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&id)
    }

    /// Drop a finished stream from the table
    pub fn remove(&mut self, id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&id)
    }

    /// Number of streams not yet closed
    pub fn active_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Highest remote stream ID seen (for GOAWAY)
    pub fn last_remote_id(&self) -> StreamId {
        self.last_remote_id
    }

    /// Update the concurrency cap from peer SETTINGS
    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent = max;
    }

    /// Apply a changed SETTINGS_INITIAL_WINDOW_SIZE to every open stream's
    /// send window
    pub fn update_initial_send_window(&mut self, size: u32) -> Result<()> {
        self.initial_send_window = size;
        for stream in self.streams.values_mut() {
            stream
                .flow_control_mut()
                .send_window_mut()
                .update_initial_size(size)?;
        }
        Ok(())
    }

    fn check_concurrency(&self) -> Result<()> {
        if let Some(max) = self.max_concurrent {
            if self.active_count() >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }
        Ok(())
    }
}
