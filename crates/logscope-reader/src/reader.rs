use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ReaderError, Result};
use crate::options::ReaderOptions;
use crate::pipe::{self, PipeSource};
use crate::sink::LineSink;
use crate::tail::{self, FileTail};

/// Callback invoked once when a running source dies
pub type ErrorNotifier = Arc<dyn Fn(&ReaderError) + Send + Sync>;

/// Which kind of source a reader streams from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderKind {
    File,
    Pipe,
    MultiFile,
}

enum Source {
    File(PathBuf),
    Pipe(Option<PipeSource>),
    MultiFile(Vec<PathBuf>),
}

/// Streams lines from a file, a pipe, or several files into one queue.
///
/// Lines are delivered through the receiver returned by [`Reader::take_lines`].
/// The queue closes once every source task has finished: at EOF for pipes,
/// or after [`Reader::close`] for followed files.
pub struct Reader {
    source: Source,
    options: ReaderOptions,

    /// Held until start; afterwards only the source tasks own senders
    tx: Option<mpsc::Sender<String>>,
    rx: Option<mpsc::Receiver<String>>,

    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    on_error: Option<ErrorNotifier>,

    started: bool,
    closed: bool,
}

impl Reader {
    fn with_source(source: Source, options: ReaderOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity());
        Self {
            source,
            options,
            tx: Some(tx),
            rx: Some(rx),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            on_error: None,
            started: false,
            closed: false,
        }
    }

    /// Follow a single file, starting at `options.offset`
    pub fn file(path: impl Into<PathBuf>, options: ReaderOptions) -> Self {
        Self::with_source(Source::File(path.into()), options)
    }

    /// Read lines from standard input until EOF
    pub fn stdin(options: ReaderOptions) -> Self {
        Self::pipe(Box::new(tokio::io::stdin()), options)
    }

    /// Read lines from any byte source until EOF
    pub fn pipe(source: PipeSource, options: ReaderOptions) -> Self {
        Self::with_source(Source::Pipe(Some(source)), options)
    }

    /// Follow several files concurrently into one queue
    pub fn multi_file<P: AsRef<Path>>(paths: &[P], options: ReaderOptions) -> Self {
        let paths = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        Self::with_source(Source::MultiFile(paths), options)
    }

    /// Pick a variant from the path list: none reads stdin, one follows
    /// that file, more follow all of them
    pub fn from_paths<P: AsRef<Path>>(paths: &[P], options: ReaderOptions) -> Self {
        match paths {
            [] => Self::stdin(options),
            [single] => {
                let path: &Path = single.as_ref();
                Self::file(path, options)
            }
            many => Self::multi_file(many, options),
        }
    }

    pub fn kind(&self) -> ReaderKind {
        match self.source {
            Source::File(_) => ReaderKind::File,
            Source::Pipe(_) => ReaderKind::Pipe,
            Source::MultiFile(_) => ReaderKind::MultiFile,
        }
    }

    /// Register a callback for fatal errors of running sources
    pub fn on_error<F>(&mut self, notifier: F)
    where
        F: Fn(&ReaderError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(notifier));
    }

    /// Take the outbound line receiver (only once)
    pub fn take_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        self.rx.take()
    }

    /// Open every source and start streaming.
    ///
    /// If any file fails to open, sources already started are stopped and
    /// joined before the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(ReaderError::Closed);
        }
        if self.started {
            return Err(ReaderError::AlreadyStarted);
        }
        self.started = true;

        let Some(tx) = self.tx.take() else {
            return Err(ReaderError::Closed);
        };

        match &mut self.source {
            Source::File(path) => {
                let path = path.clone();
                let opened = tail::open(&path, self.options.offset).await?;
                let sink = LineSink::new(tx.clone(), None, self.cancel.clone());
                let poll = self.options.poll_interval();
                self.spawn(path.display().to_string(), tx, FileTail::new(opened, poll).run(sink));
            }
            Source::Pipe(source) => {
                let Some(source) = source.take() else {
                    return Err(ReaderError::AlreadyStarted);
                };
                let sink = LineSink::new(tx.clone(), None, self.cancel.clone());
                self.spawn("stdin".to_string(), tx, async move {
                    pipe::stream_pipe(source, "stdin", sink).await
                });
            }
            Source::MultiFile(paths) => {
                let paths = paths.clone();
                for path in &paths {
                    let opened = match tail::open(path, 0).await {
                        Ok(opened) => opened,
                        Err(e) => {
                            warn!(error = %e, "aborting multi-file start");
                            self.shutdown().await;
                            return Err(e);
                        }
                    };
                    let origin = origin_name(path);
                    let prefix = self.options.with_origin.then_some(origin.as_str());
                    let sink = LineSink::new(tx.clone(), prefix, self.cancel.clone());
                    let poll = self.options.poll_interval();
                    self.spawn(origin.clone(), tx.clone(), FileTail::new(opened, poll).run(sink));
                }
            }
        }

        debug!(kind = ?self.kind(), sources = self.tasks.len(), "reader started");
        Ok(())
    }

    /// Run one source task. `keep_open` holds the queue open until the
    /// error callback has returned, so a consumer sees the failure before
    /// the end of input. A failed source stops its siblings.
    fn spawn<F>(&mut self, origin: String, keep_open: mpsc::Sender<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let on_error = self.on_error.clone();
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!(source = %origin, "source finished"),
                Err(e) => {
                    warn!(source = %origin, error = %e, "source failed");
                    if let Some(notify) = on_error {
                        notify(&e);
                    }
                    cancel.cancel();
                }
            }
            drop(keep_open);
        }));
    }

    /// Stop every source, wait for all of them, then let the queue close.
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown().await;
        self.tx = None;
        debug!("reader closed");
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        for joined in join_all(self.tasks.drain(..)).await {
            if let Err(e) = joined {
                warn!(error = %e, "source task panicked");
            }
        }
    }

    /// Whether any source task is still running
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Number of source tasks still running
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn origin_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
