use std::fs::Metadata;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, warn};

use crate::error::{ReaderError, Result};
use crate::sink::{Delivery, LineSink};

/// A file opened for following, positioned at its starting offset
pub(crate) struct OpenedFile {
    path: PathBuf,
    file: File,
    metadata: Metadata,
    position: u64,
}

/// Open `path` and seek to `offset`. Errors name the file.
pub(crate) async fn open(path: &Path, offset: u64) -> Result<OpenedFile> {
    let mut file = File::open(path)
        .await
        .map_err(|e| ReaderError::open(path, e))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|e| ReaderError::open(path, e))?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| ReaderError::open(path, e))?;
    }

    Ok(OpenedFile {
        path: path.to_path_buf(),
        file,
        metadata,
        position: offset,
    })
}

/// What the follower found when it checked the path at EOF
enum PathState {
    Unchanged,
    Truncated,
    Replaced,
    Missing,
}

/// Poll-based follower for one file
pub(crate) struct FileTail {
    opened: OpenedFile,
    poll: Duration,
}

impl FileTail {
    pub(crate) fn new(opened: OpenedFile, poll: Duration) -> Self {
        Self { opened, poll }
    }

    /// Follow the file until cancelled or a read error occurs
    pub(crate) async fn run(self, sink: LineSink) -> Result<()> {
        let FileTail { opened, poll } = self;
        let OpenedFile {
            path,
            file,
            mut metadata,
            mut position,
        } = opened;

        let origin = path.display().to_string();
        let mut reader = BufReader::new(file);
        // Bytes of a line whose newline has not been written yet
        let mut pending: Vec<u8> = Vec::with_capacity(1024);

        loop {
            let read = tokio::select! {
                _ = sink.cancel_token().cancelled() => return Ok(()),
                read = reader.read_until(b'\n', &mut pending) => read,
            };

            match read {
                Ok(0) => {}
                Ok(n) => {
                    position += n as u64;
                    if pending.last() == Some(&b'\n') {
                        if sink.emit(&pending).await == Delivery::Stop {
                            return Ok(());
                        }
                        pending.clear();
                    }
                    continue;
                }
                Err(e) => return Err(ReaderError::read(&origin, e)),
            }

            // At EOF: see whether the file was truncated or rotated away
            match check_path(&path, &metadata, position).await {
                PathState::Unchanged | PathState::Missing => {}
                state @ (PathState::Truncated | PathState::Replaced) => {
                    match reopen(&path).await {
                        Ok((file, new_metadata)) => {
                            if matches!(state, PathState::Truncated) {
                                debug!(file = %origin, "file truncated, reading from start");
                            } else {
                                debug!(file = %origin, "file replaced, reading new file");
                            }
                            reader = BufReader::new(file);
                            metadata = new_metadata;
                            position = 0;
                            pending.clear();
                            continue;
                        }
                        Err(e) => {
                            warn!(file = %origin, error = %e, "failed to reopen file, will retry");
                        }
                    }
                }
            }

            tokio::select! {
                _ = sink.cancel_token().cancelled() => return Ok(()),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

async fn reopen(path: &Path) -> std::io::Result<(File, Metadata)> {
    let file = File::open(path).await?;
    let metadata = file.metadata().await?;
    Ok((file, metadata))
}

async fn check_path(path: &Path, opened: &Metadata, position: u64) -> PathState {
    match tokio::fs::metadata(path).await {
        Ok(current) => {
            if !same_file(opened, &current) {
                PathState::Replaced
            } else if current.len() < position {
                PathState::Truncated
            } else {
                PathState::Unchanged
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => PathState::Missing,
        Err(e) => {
            debug!(file = %path.display(), error = %e, "stat failed");
            PathState::Unchanged
        }
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

// Without inode identity only truncation is detectable.
#[cfg(not(unix))]
fn same_file(_a: &Metadata, _b: &Metadata) -> bool {
    true
}
