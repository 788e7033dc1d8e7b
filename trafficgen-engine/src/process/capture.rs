//! Subprocess output capture.
//!
//! In capture mode each stream is copied line by line into a file under the
//! run's output directory. Lines that are not noise are echoed at debug level.

use std::path::{Path, PathBuf};

use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::task::JoinHandle;
use tracing::debug;

pub const STDOUT_LOG: &str = "stdout.log";
pub const STDERR_LOG: &str = "stderr.log";

/// Lines never echoed to the console
const NOISE_PATTERNS: [&str; 2] = [r"(?i)https?://github\.com", r"^\s*$"];

/// Decides which captured lines are worth echoing
#[derive(Debug, Clone)]
pub struct OutputFilter {
    noise: Vec<Regex>,
}

impl OutputFilter {
    pub fn new() -> Result<Self, regex::Error> {
        let noise = NOISE_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { noise })
    }

    pub fn is_noise(&self, line: &str) -> bool {
        self.noise.iter().any(|pattern| pattern.is_match(line))
    }
}

/// Log files of a captured run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl CapturePaths {
    pub fn in_dir(out_dir: &Path) -> Self {
        Self {
            stdout: out_dir.join(STDOUT_LOG),
            stderr: out_dir.join(STDERR_LOG),
        }
    }
}

/// Copy `reader` into a new file at `path` until end of stream.
///
/// Returns the number of lines copied.
pub fn spawn_capture<R>(
    reader: R,
    path: PathBuf,
    stream: &'static str,
    filter: OutputFilter,
) -> JoinHandle<std::io::Result<u64>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut file = BufWriter::new(File::create(&path).await?);
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut lines = 0u64;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            file.write_all(&buf).await?;
            // Keep the file current for anyone tailing it
            file.flush().await?;
            lines += 1;

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end();
            if !filter.is_noise(line) {
                debug!(stream, "{}", line);
            }
        }

        file.flush().await?;
        Ok(lines)
    })
}
