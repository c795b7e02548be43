use std::io::{ErrorKind, Read, Write};

use byteorder::{BE, ByteOrder};
use bytes::{Buf, Bytes, BytesMut};
use peer_binary_protocol::{HANDSHAKE_LEN, MAX_MSG_LEN, MessageDeserializeError, PSTR_BT1};
use tracing::trace;

use crate::{Error, Result};

const READ_CHUNK: usize = 16 * 1024;
const LEN_PREFIX: usize = 4;

/// Non-blocking framing over a byte stream.
///
/// Reads accumulate until a whole frame is available. Writes that the
/// stream does not fully accept are kept and flushed by
/// [`send_pending_data`](Self::send_pending_data).
pub struct PeerConnection<T> {
    stream: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<T: Read + Write> PeerConnection<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.stream
    }

    /// `Ok(None)` if the stream would block, `Ok(Some(0))` on EOF.
    fn read_some(&mut self) -> Result<Option<usize>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    return Ok(Some(n));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Read(e)),
            }
        }
    }

    /// Returns the raw 68-byte handshake once all of it arrived.
    pub fn receive_handshake(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(&pstr_len) = self.read_buf.first() {
                if pstr_len as usize != PSTR_BT1.len() {
                    return Err(Error::DeserializeHandshake(MessageDeserializeError::BadPstr));
                }
            }
            if self.read_buf.len() >= HANDSHAKE_LEN {
                return Ok(Some(self.read_buf.split_to(HANDSHAKE_LEN).freeze()));
            }
            match self.read_some()? {
                None => return Ok(None),
                Some(0) => return Err(Error::PeerDisconnectedReadingHandshake),
                Some(_) => {}
            }
        }
    }

    fn take_message(&mut self) -> Result<Option<Bytes>> {
        if self.read_buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = BE::read_u32(&self.read_buf[..LEN_PREFIX]);
        if len > MAX_MSG_LEN {
            return Err(MessageDeserializeError::MessageTooLong(len).into());
        }
        if self.read_buf.len() < LEN_PREFIX + len as usize {
            return Ok(None);
        }
        self.read_buf.advance(LEN_PREFIX);
        Ok(Some(self.read_buf.split_to(len as usize).freeze()))
    }

    /// Returns the body of the next complete message, without the length
    /// prefix. An empty body is a keep-alive. `Ok(None)` if no complete
    /// message is available yet.
    pub fn receive_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(body) = self.take_message()? {
                return Ok(Some(body));
            }
            match self.read_some()? {
                None => return Ok(None),
                Some(0) => return Err(Error::PeerDisconnected),
                Some(_) => {}
            }
        }
    }

    /// Writes `data`, keeping what the stream did not accept.
    pub fn send_message(&mut self, data: &[u8]) -> Result<()> {
        self.write_buf.extend_from_slice(data);
        self.send_pending_data()
    }

    pub fn send_pending_data(&mut self) -> Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(Error::Write(ErrorKind::WriteZero.into())),
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    trace!(pending = self.write_buf.len(), "write would block");
                    break;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Write(e)),
            }
        }
        Ok(())
    }

    pub fn send_buffer_is_empty(&self) -> bool {
        self.write_buf.is_empty()
    }
}
