//! Append-only output buffer shared by an interactive session and its callers.

use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

/// Capacity of the per-session event channel before slow subscribers lag.
const EVENT_CAPACITY: usize = 1024;

/// Incremental output from an interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Text appended to the session buffer.
    Output(String),
    /// The engine process ended on its own, with its exit code if it had one.
    Exited(Option<i32>),
}

/// Ordered, append-only text buffer that also broadcasts every append.
pub(crate) struct OutputBuffer {
    text: Mutex<String>,
    events: broadcast::Sender<SessionEvent>,
}

impl OutputBuffer {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            text: Mutex::new(String::new()),
            events,
        }
    }

    pub(crate) fn append(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        // Broadcast under the lock so subscribers see appends in buffer order.
        let mut text = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        text.push_str(chunk);
        let _ = self.events.send(SessionEvent::Output(chunk.to_string()));
    }

    pub(crate) fn exited(&self, code: Option<i32>) {
        let notice = match code {
            Some(code) => format!("\n[process exited with code {}]\n", code),
            None => "\n[process terminated by signal]\n".to_string(),
        };
        let mut text = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        text.push_str(&notice);
        let _ = self.events.send(SessionEvent::Output(notice));
        let _ = self.events.send(SessionEvent::Exited(code));
    }

    pub(crate) fn snapshot(&self) -> String {
        self.text.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn clear(&self) {
        self.text.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Decodes a byte stream chunk by chunk without splitting multi-byte characters.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `bytes`, holding back an incomplete trailing sequence.
    /// Invalid sequences become U+FFFD.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left at end of stream.
    pub(crate) fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_joins_split_character() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "é!".as_bytes();

        assert_eq!(decoder.push(&bytes[..1]), "");
        assert_eq!(decoder.push(&bytes[1..]), "é!");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
        assert_eq!(decoder.push(&[0xe2, 0x82]), "");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[test]
    fn test_buffer_appends_in_order() {
        let buffer = OutputBuffer::new();
        let mut events = buffer.subscribe();

        buffer.append("one ");
        buffer.append("");
        buffer.append("two");
        assert_eq!(buffer.snapshot(), "one two");

        assert_eq!(events.try_recv().unwrap(), SessionEvent::Output("one ".into()));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Output("two".into()));
        assert!(events.try_recv().is_err());

        buffer.clear();
        assert_eq!(buffer.snapshot(), "");
    }

    #[test]
    fn test_buffer_exit_notice() {
        let buffer = OutputBuffer::new();
        let mut events = buffer.subscribe();

        buffer.exited(Some(3));
        assert!(buffer.snapshot().contains("[process exited with code 3]"));
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Output(_)));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Exited(Some(3)));
    }
}
