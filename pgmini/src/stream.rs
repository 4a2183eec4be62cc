//! Buffered postgres message stream.
use bytes::{Bytes, BytesMut};
use std::io::{Read, Write};

use log::trace;

use crate::{
    Result,
    connection::Config,
    net::Socket,
    postgres::{
        BackendMessage, BackendProtocol, FrontendProtocol, ProtocolError,
        frontend::{self, Startup},
    },
};

/// A stream which can send and receive postgres messages.
///
/// Sends are buffered; [`flush`][PgStream::flush] writes them out. Frame
/// reads block until the whole frame arrived or the peer went away.
pub struct PgStream {
    socket: Socket,
    write_buf: BytesMut,
}

impl PgStream {
    pub fn connect(config: &Config) -> Result<Self> {
        let socket = Socket::connect(
            &config.host,
            config.port,
            config.timeout,
            config.use_ssl,
        )?;
        Ok(Self {
            socket,
            write_buf: BytesMut::with_capacity(1024),
        })
    }

    /// Buffer a frontend message.
    ///
    /// Just calling this function, the message is only written to a buffer;
    /// use [`flush`][PgStream::flush] to actually send it.
    pub fn send<F: FrontendProtocol>(&mut self, message: F) {
        trace!("send {:?}", char::from(F::MSGTYPE));
        frontend::write(message, &mut self.write_buf);
    }

    /// Buffer the [`Startup`] message.
    ///
    /// For historical reasons, the very first message sent by the client
    /// (the startup message) has no initial message-type byte, thus
    /// [`Startup`] does not implement [`FrontendProtocol`].
    pub fn send_startup(&mut self, message: Startup) {
        trace!("send Startup");
        message.write(&mut self.write_buf);
    }

    /// Write buffered messages to the underlying socket.
    pub fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        self.socket.write_all(&self.write_buf)?;
        self.write_buf.clear();
        Ok(())
    }

    /// Receive a single backend message.
    pub fn recv_message(&mut self) -> Result<BackendMessage> {
        let (msgtype, body) = self.recv_frame()?;
        let message = BackendMessage::decode(msgtype, body)?;
        trace!("recv {message:?}");
        Ok(message)
    }

    /// Read one frame: a type byte, then a big-endian length that includes
    /// itself, then the body.
    fn recv_frame(&mut self) -> Result<(u8, Bytes)> {
        let mut head = [0u8; 5];
        self.socket.read_exact(&mut head)?;

        let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
        let len = len.checked_sub(4).ok_or_else(|| ProtocolError::malformed("frame"))?;

        let mut body = vec![0u8; len];
        self.socket.read_exact(&mut body)?;
        Ok((head[0], Bytes::from(body)))
    }
}
