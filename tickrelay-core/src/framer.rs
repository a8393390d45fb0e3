//! Inactivity-delimited stream framing
//!
//! The agent sends newline-delimited JSON without any frame length or batch
//! terminator. A batch ends when no new line arrives for a full `timeout`
//! after at least one line was read. Pure silence never produces a batch.
//!
//! A line that is not UTF-8 or exceeds the maximum length is rejected on its
//! own; only an I/O failure ends the stream.

use crate::{Batch, RelayError, Result};
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::debug;

/// Why a line was dropped by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooLong,
    InvalidUtf8,
}

/// One newline-terminated unit read from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    Rejected(Rejection),
}

/// Newline decoder that turns bad lines into [`Frame::Rejected`] instead of
/// failing the stream
#[derive(Debug)]
pub struct MetricLineCodec {
    max_length: usize,
    /// Bytes of `buf` already searched for a newline
    next_index: usize,
    /// Skipping the remainder of an over-long line
    discarding: bool,
}

impl MetricLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for MetricLineCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        loop {
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(Frame::Rejected(Rejection::TooLong)));
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(to_frame(&line[..end])));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;

        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(Some(Frame::Rejected(Rejection::TooLong)));
        }
        if buf.is_empty() || buf[..] == b"\r"[..] {
            buf.clear();
            return Ok(None);
        }

        let line = buf.split_to(buf.len());
        Ok(Some(to_frame(&line)))
    }
}

fn to_frame(line: &[u8]) -> Frame {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match std::str::from_utf8(line) {
        Ok(text) => Frame::Line(text.to_string()),
        Err(_) => Frame::Rejected(Rejection::InvalidUtf8),
    }
}

/// Splits one client byte stream into batches
pub struct Framer<R> {
    lines: FramedRead<R, MetricLineCodec>,
    timeout: Duration,
    /// Peer closed the stream or reading failed
    closed: bool,
    /// Read failure held back until the buffered batch was handed out
    pending_error: Option<RelayError>,
}

impl<R: AsyncRead + Unpin> Framer<R> {
    /// Create a framer over a reader
    pub fn new(reader: R, timeout: Duration, max_line_length: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, MetricLineCodec::new(max_line_length)),
            timeout,
            closed: false,
            pending_error: None,
        }
    }

    /// Read the next batch.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream and nothing is
    /// left to hand out. Lines buffered when the stream ends or fails are
    /// returned first as a final batch.
    pub async fn read_batch(&mut self) -> Result<Option<Batch>> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        if self.closed {
            return Ok(None);
        }

        let mut batch = Batch::default();

        loop {
            match tokio::time::timeout(self.timeout, self.lines.next()).await {
                Ok(Some(Ok(Frame::Line(line)))) => batch.push_line(&line),
                Ok(Some(Ok(Frame::Rejected(reason)))) => {
                    debug!(?reason, "discarding undecodable line");
                    batch.rejected += 1;
                }
                Ok(Some(Err(err))) => {
                    self.closed = true;
                    if batch.is_empty() {
                        return Err(err.into());
                    }
                    self.pending_error = Some(err.into());
                    return Ok(Some(batch));
                }
                Ok(None) => {
                    self.closed = true;
                    return Ok(if batch.is_empty() { None } else { Some(batch) });
                }
                Err(_elapsed) => {
                    if !batch.is_empty() {
                        return Ok(Some(batch));
                    }
                }
            }
        }
    }

    /// Check if the peer has closed the stream
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
