// Local crates
use crate::metrics::metrics::ROTATIONS_TOTAL;
use crate::tailer::{
    framing::LineFramer,
    models::{FileIdentity, TailError, TailEvent, TailState},
};

// External crates
use futures::Stream;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, instrument, warn};

/// Upper bound on bytes pulled from one file per poll.
const MAX_READ_PER_POLL: u64 = 4 * 1024 * 1024;

/// Follows a single file, polling its size and identity on a fixed interval.
///
/// Tailing starts at the end of the file as it exists when the tailer is
/// opened. A device/inode change or a size below the current offset is treated
/// as rotation: the file is reopened and read from the beginning.
#[derive(Debug)]
pub struct Tailer {
    state: TailState,
    poll_interval: Duration,
    framer: LineFramer,
    failing: bool,
}

impl Tailer {
    /// Open `path` and position the reader at its current end.
    #[instrument(name = "pipeline::tailer::open", skip_all, fields(file = %path.display()), level = "debug")]
    pub async fn open(path: PathBuf, poll_interval: Duration) -> Result<Self, TailError> {
        let handle = File::open(&path).await.map_err(|source| TailError::Open {
            path: path.clone(),
            source,
        })?;
        let metadata = handle.metadata().await.map_err(|source| TailError::Stat {
            path: path.clone(),
            source,
        })?;

        let mut state = TailState::new(path);
        state.offset = metadata.len();
        state.identity = Some(FileIdentity::of(&metadata));
        state.handle = Some(handle);

        debug!(offset = state.offset, "Tailer positioned at end of file");

        Ok(Self {
            state,
            poll_interval,
            framer: LineFramer::new(),
            failing: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    pub fn offset(&self) -> u64 {
        self.state.offset
    }

    /// Turn the tailer into an endless stream of line and error events.
    ///
    /// The stream ends only when the file becomes permanently unreadable. Errors
    /// are reported once per failure streak, not on every poll.
    pub fn into_stream(self) -> impl Stream<Item = TailEvent> + Send + 'static {
        async_stream::stream! {
            let mut tailer = self;
            let mut ticker = interval(tailer.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match tailer.poll().await {
                    Ok(lines) => {
                        tailer.failing = false;
                        for line in lines {
                            yield TailEvent::Line(line);
                        }
                    }
                    Err(error) => {
                        let fatal = error.is_fatal();
                        let first = !tailer.failing;
                        tailer.failing = true;

                        if first || fatal {
                            yield TailEvent::Error(error);
                        }
                        if fatal {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One poll: detect rotation, read the appended range, return completed lines.
    pub async fn poll(&mut self) -> Result<Vec<String>, TailError> {
        let metadata = match tokio::fs::metadata(&self.state.path).await {
            Ok(metadata) => metadata,
            Err(source) => {
                // the path may come back as a new file; never keep reading a stale handle
                self.state.handle = None;
                return Err(TailError::Stat {
                    path: self.state.path.clone(),
                    source,
                });
            }
        };

        let identity = FileIdentity::of(&metadata);
        let len = metadata.len();

        let replaced = self.state.identity != Some(identity);
        let truncated = len < self.state.offset;

        let rotated = replaced || truncated;

        if rotated || self.state.handle.is_none() {
            if rotated {
                ROTATIONS_TOTAL.inc();
                let dropped = self.framer.reset();
                info!(
                    file = %self.state.path.display(),
                    replaced,
                    truncated,
                    previous_offset = self.state.offset,
                    dropped_partial_bytes = dropped,
                    "Log file rotated, reading from the start"
                );
            }
            self.reopen(identity, rotated).await?;
        }

        if len <= self.state.offset {
            return Ok(Vec::new());
        }

        let want = (len - self.state.offset).min(MAX_READ_PER_POLL);
        let chunk = self.read_range(want).await?;
        self.state.offset += chunk.len() as u64;

        Ok(self.framer.push(&chunk))
    }

    /// Same identity after a stat or read failure keeps the offset and any held partial line.
    async fn reopen(&mut self, identity: FileIdentity, rotated: bool) -> Result<(), TailError> {
        self.state.handle = None;

        let handle = File::open(&self.state.path)
            .await
            .map_err(|source| TailError::Open {
                path: self.state.path.clone(),
                source,
            })?;

        self.state.handle = Some(handle);
        self.state.identity = Some(identity);
        if rotated {
            self.state.offset = 0;
        }
        Ok(())
    }

    async fn read_range(&mut self, want: u64) -> Result<Vec<u8>, TailError> {
        let path = &self.state.path;
        let Some(handle) = self.state.handle.as_mut() else {
            return Ok(Vec::new());
        };

        let read_err = |source| TailError::Read {
            path: path.clone(),
            source,
        };

        handle
            .seek(SeekFrom::Start(self.state.offset))
            .await
            .map_err(read_err)?;

        let mut chunk = Vec::with_capacity(want as usize);
        let read = handle.take(want).read_to_end(&mut chunk).await;
        if let Err(source) = read {
            warn!(error = %source, file = %path.display(), "Read from tailed file failed");
            self.state.handle = None;
            return Err(TailError::Read {
                path: path.clone(),
                source,
            });
        }

        Ok(chunk)
    }
}
