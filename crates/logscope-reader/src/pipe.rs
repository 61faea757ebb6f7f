use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::{ReaderError, Result};
use crate::sink::{Delivery, LineSink};

/// Boxed byte source for pipe mode (stdin by default)
pub type PipeSource = Box<dyn AsyncRead + Send + Unpin>;

/// Forward every line of `source` until EOF, cancellation, or a read error
pub(crate) async fn stream_pipe(source: PipeSource, origin: &str, sink: LineSink) -> Result<()> {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = sink.cancel_token().cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            // EOF; a trailing unterminated line was already delivered below
            Ok(0) => return Ok(()),
            Ok(_) => {
                if sink.emit(&buf).await == Delivery::Stop {
                    return Ok(());
                }
            }
            Err(e) => return Err(ReaderError::read(origin, e)),
        }
    }
}
