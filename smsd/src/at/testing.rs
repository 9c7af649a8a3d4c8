//! Byte-exact transport double for protocol tests.

use super::transport::Transport;
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex},
};

type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

/// Answers every write through a closure. The closure sees the written bytes as
/// text with the trailing `\r` (or Ctrl-Z) removed and returns the bytes the
/// modem would send back, or `None` to stay silent.
pub struct ScriptedTransport {
    respond: Responder,
    rx: VecDeque<u8>,
    written: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new(
        respond: impl FnMut(&str) -> Option<Vec<u8>> + Send + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            rx: VecDeque::new(),
            written: Arc::default(),
        }
    }

    /// Answers each line with the given text lines framed as the modem would.
    pub fn lines(
        mut respond: impl FnMut(&str) -> Option<Vec<&'static str>> + Send + 'static,
    ) -> Self {
        Self::new(move |line| {
            respond(line).map(|lines| {
                lines
                    .iter()
                    .flat_map(|l| format!("\r\n{l}\r\n").into_bytes())
                    .collect()
            })
        })
    }

    /// Shared log of everything written, one entry per write.
    pub fn written(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.written)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(data);
        let text = text.trim_end_matches(['\r', '\x1a']);
        self.written.lock().unwrap().push(text.to_owned());

        if let Some(reply) = (self.respond)(text) {
            self.rx.extend(reply);
        }

        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            std::future::pending::<()>().await;
        }

        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }

        Ok(n)
    }
}
