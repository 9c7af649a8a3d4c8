//! AT command protocol on top of a half-duplex byte transport.

pub mod command;
pub mod response;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{Command, Value, Verb};
pub use response::RawResponse;
pub use transport::{AtChannel, SerialTransport, Transport};

use crate::error::AtError;
use response::is_error;
use std::time::Duration;
use tracing::debug;

/// Issues one [`Command`] at a time and classifies the reply.
pub struct AtPort<T> {
    channel: AtChannel<T>,
    base_timeout: Duration,
}

impl<T: Transport> AtPort<T> {
    pub fn new(transport: T, base_timeout: Duration) -> Self {
        Self {
            channel: AtChannel::new(transport),
            base_timeout,
        }
    }

    pub fn base_timeout(&self) -> Duration {
        self.base_timeout
    }

    pub fn channel(&mut self) -> &mut AtChannel<T> {
        &mut self.channel
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.channel.transport_mut()
    }

    pub async fn test(&mut self, param: &'static str) -> Result<RawResponse, AtError> {
        self.run(&Command::test(param)).await
    }

    pub async fn read(&mut self, param: &'static str) -> Result<RawResponse, AtError> {
        self.run(&Command::read(param)).await
    }

    pub async fn write<V: Into<Value>>(
        &mut self,
        param: &'static str,
        value: V,
    ) -> Result<RawResponse, AtError> {
        self.run(&Command::write(param, [value])).await
    }

    pub async fn execute(
        &mut self,
        param: &'static str,
    ) -> Result<RawResponse, AtError> {
        self.run(&Command::execute(param)).await
    }

    /// Sends `cmd` and waits for one of its markers.
    ///
    /// `Ok` only when a non-error marker ended the response. Timeouts and error
    /// result codes come back as [`AtError`], carrying every line received.
    pub async fn run(&mut self, cmd: &Command) -> Result<RawResponse, AtError> {
        let request = cmd.render();
        let timeout = cmd.timeout.unwrap_or(self.base_timeout);

        self.send_line(&request).await?;
        let resp = self.channel.read_until(cmd.markers, timeout).await?;
        classify(request, timeout, resp)
    }

    /// Like [`Self::run`], but `label` stands in for the request in logs and
    /// errors. Used for commands carrying secrets.
    pub async fn run_redacted(
        &mut self,
        cmd: &Command,
        label: &str,
    ) -> Result<RawResponse, AtError> {
        let request = cmd.render();
        let timeout = cmd.timeout.unwrap_or(self.base_timeout);

        debug!(tx = label, "at request");
        self.channel.write(format!("{request}\r").as_bytes()).await?;
        let mut resp = self.channel.read_until(cmd.markers, timeout).await?;
        // the modem echoes the request verbatim while echo is on
        for line in &mut resp.lines {
            if line.contains(&request) {
                *line = label.to_owned();
            }
        }

        classify(label.to_owned(), timeout, resp)
    }

    /// Drops buffered input and reopens the transport.
    pub async fn reconnect(&mut self) -> Result<(), AtError> {
        self.channel.reconnect().await?;

        Ok(())
    }

    /// Writes `line` followed by a carriage return, without reading.
    pub async fn send_line(&mut self, line: &str) -> Result<(), AtError> {
        debug!(tx = line, "at request");
        self.channel.write(format!("{line}\r").as_bytes()).await?;

        Ok(())
    }

    /// Writes raw bytes (an SMS body) without reading.
    pub async fn send_bytes(&mut self, data: &[u8]) -> Result<(), AtError> {
        debug!(tx = %String::from_utf8_lossy(data).escape_debug(), "at payload");
        self.channel.write(data).await?;

        Ok(())
    }

    /// Reads a reply to something written with [`Self::send_line`] or
    /// [`Self::send_bytes`]. `label` names the exchange in errors and logs.
    pub async fn receive(
        &mut self,
        label: &str,
        markers: &[&str],
        timeout: Duration,
    ) -> Result<RawResponse, AtError> {
        let resp = self.channel.read_until(markers, timeout).await?;
        classify(label.to_owned(), timeout, resp)
    }
}

fn classify(
    command: String,
    timeout: Duration,
    resp: RawResponse,
) -> Result<RawResponse, AtError> {
    debug!(tx = %command, rx = ?resp.lines, complete = resp.complete, "at response");

    match resp.terminal().map(str::to_owned) {
        None => Err(AtError::Timeout {
            command,
            timeout,
            lines: resp.lines,
        }),
        Some(reason) if is_error(&reason) => Err(AtError::Device {
            command,
            reason,
            lines: resp.lines,
        }),
        Some(_) => Ok(resp),
    }
}
