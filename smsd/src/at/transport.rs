//! Byte-level access to the modem and line framing on top of it.
//!
//! [`Transport`] only moves bytes. [`AtChannel`] turns them into lines and
//! decides when a response is over: as soon as the most recent line matches one
//! of the caller's markers, or when the deadline passes.

use super::response::{matches_marker, RawResponse};
use async_trait::async_trait;
use std::{io, time::Duration};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    time::{self, Instant},
};
use tokio_serial::{SerialPortBuilderExt as _, SerialStream};
use tracing::{debug, info, warn};

#[async_trait]
pub trait Transport: Send {
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Reads whatever is available, waiting as long as needed. Callers bound
    /// this with their own timeout. `Ok(0)` means the device went away.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Drops and reopens the underlying connection.
    async fn reconnect(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A serial port that is opened lazily and reopened after any I/O failure.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            port: None,
        }
    }

    pub fn open(&mut self) -> io::Result<()> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(io::Error::from)?;
        info!(path = %self.path, baud_rate = self.baud_rate, "opened serial port");
        self.port = Some(port);

        Ok(())
    }

    fn port(&mut self) -> io::Result<&mut SerialStream> {
        if self.port.is_none() {
            self.open()?;
        }

        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = async {
            let port = self.port()?;
            port.write_all(data).await?;
            port.flush().await
        }
        .await;

        if result.is_err() {
            self.port = None;
        }

        result
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.port()?.read(buf).await;
        if matches!(result, Err(_) | Ok(0)) {
            self.port = None;
        }

        result
    }

    async fn reconnect(&mut self) -> io::Result<()> {
        self.port = None;
        self.open()
    }
}

/// Line framing over a [`Transport`]. Never pipelines: every read ends (marker
/// or deadline) before the next write is issued by the owner.
pub struct AtChannel<T> {
    transport: T,
    pending: Vec<u8>,
}

impl<T: Transport> AtChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: Vec::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Writes raw bytes, first discarding anything left over from earlier
    /// exchanges (late replies, unsolicited result codes).
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.pending.is_empty() {
            debug!(
                stale = %String::from_utf8_lossy(&self.pending).escape_debug(),
                "discarding stale input"
            );
            self.pending.clear();
        }

        self.transport.write(data).await
    }

    /// Collects lines until the latest one matches `markers` or `timeout` passes.
    ///
    /// Bytes that arrive after the terminal line stay buffered and are dropped
    /// by the next [`Self::write`].
    pub async fn read_until(
        &mut self,
        markers: &[&str],
        timeout: Duration,
    ) -> io::Result<RawResponse> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=end).collect();
                let line = decode(&raw);
                if line.is_empty() {
                    continue;
                }

                let terminal = matches_marker(&line, markers);
                lines.push(line);
                if terminal {
                    return Ok(RawResponse {
                        lines,
                        complete: true,
                    });
                }
            }

            // prompts like "> " are never followed by a line break
            if !self.pending.is_empty() {
                let tail = decode(&self.pending);
                let prompts: Vec<&str> = markers
                    .iter()
                    .copied()
                    .filter(|m| m.starts_with('>'))
                    .collect();
                if !tail.is_empty() && matches_marker(tail.trim_end(), &prompts) {
                    self.pending.clear();
                    lines.push(tail);
                    return Ok(RawResponse {
                        lines,
                        complete: true,
                    });
                }
            }

            let read = time::timeout_at(deadline, self.transport.read(&mut buf)).await;
            match read {
                Err(_elapsed) => {
                    self.pending.clear();
                    return Ok(RawResponse {
                        lines,
                        complete: false,
                    });
                }
                Ok(Ok(0)) => {
                    warn!("modem closed the connection mid-response");
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Ok(Ok(n)) => self.pending.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    pub async fn reconnect(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.transport.reconnect().await
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .trim_start_matches(['\r', '\n'])
        .to_owned()
}
