use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of handing a line to the shared queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// Cancelled, or the consumer went away
    Stop,
}

/// Per-task handle onto the shared output queue
pub(crate) struct LineSink {
    tx: mpsc::Sender<String>,
    prefix: Option<String>,
    cancel: CancellationToken,
}

impl LineSink {
    pub(crate) fn new(
        tx: mpsc::Sender<String>,
        origin: Option<&str>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx,
            prefix: origin.map(|o| format!("[{}] ", o)),
            cancel,
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Send one raw line (terminator included or not) to the queue
    pub(crate) async fn emit(&self, raw: &[u8]) -> Delivery {
        let line = decode_line(raw);
        let line = match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, line),
            None => line,
        };

        // Waiting on a full queue must not block close()
        tokio::select! {
            _ = self.cancel.cancelled() => Delivery::Stop,
            sent = self.tx.send(line) => match sent {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Stop,
            },
        }
    }
}

/// Strip `\n` / `\r\n` and decode, replacing invalid UTF-8
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\n"), "");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[tokio::test]
    async fn test_emit_adds_origin_prefix() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = LineSink::new(tx, Some("app.log"), CancellationToken::new());
        assert_eq!(sink.emit(b"started\n").await, Delivery::Sent);
        assert_eq!(rx.recv().await.as_deref(), Some("[app.log] started"));
    }

    #[tokio::test]
    async fn test_emit_stops_when_cancelled_on_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = LineSink::new(tx, None, cancel.clone());
        assert_eq!(sink.emit(b"one\n").await, Delivery::Sent);
        cancel.cancel();
        assert_eq!(sink.emit(b"two\n").await, Delivery::Stop);
    }
}
