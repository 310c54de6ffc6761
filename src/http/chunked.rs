//! Chunked transfer encoding
//!
//! Encoder and incremental decoder for HTTP/1.1 chunked bodies. The h1
//! response path uses the encoder when a handler opts into
//! `Transfer-Encoding: chunked`; the client decodes on receipt.

use super::{Error, Result, CRLF};
use std::io::Write;

/// Chunked encoder over any writer
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write one chunk; empty input writes nothing (a zero-length chunk
    /// would terminate the body)
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;

        Ok(())
    }

    /// Write the terminating zero-length chunk and flush
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume the encoder and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

/// Incremental chunked decoder
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
        }
    }

    /// Decode as much of `input` as possible, appending decoded bytes to
    /// `output`.
    ///
    /// Returns `(bytes_consumed, complete)`; feed the rest of the input
    /// again once more data has arrived.
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool)> {
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    let line = String::from_utf8_lossy(&input[pos..pos + crlf]);
                    // Chunk extensions after ';' are ignored
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    self.chunk_size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;

                    pos += crlf + 2;
                    self.chunk_read = 0;
                    self.state = if self.chunk_size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let remaining = self.chunk_size - self.chunk_read;
                    let available = input.len() - pos;
                    let take = remaining.min(available);

                    output.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.chunk_read += take;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    } else {
                        break;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    let Some(crlf) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    pos += crlf + 2;
                    if crlf == 0 {
                        self.state = DecoderState::Complete;
                    }
                    // Non-empty trailer lines are consumed and dropped
                }

                DecoderState::Complete => break,
            }
        }

        Ok((pos, self.state == DecoderState::Complete))
    }

    /// Whether the terminating chunk has been seen
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Encode a complete body as one chunked sequence
pub fn encode_chunks(chunks: &[&[u8]]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = ChunkedEncoder::new(&mut buf);
    for chunk in chunks {
        encoder.write_chunk(chunk)?;
    }
    encoder.finish()?;
    Ok(buf)
}
