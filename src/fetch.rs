//! Downloads source videos to local disk and inspects their length.

use std::error::Error as _;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use log::{debug, warn};

use crate::error::FetchError;

/// Size of each read from the response body before it is written out.
pub const FETCH_CHUNK_BYTES: usize = 64 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Anything able to copy a remote video into a local file.
pub trait VideoFetcher {
    /// Writes the body of `url` into `dest`, returning the number of bytes
    /// written. On error the content of `dest` is undefined.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// Streaming HTTP downloader backed by a `ureq` agent.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl VideoFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(status, _) => FetchError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => {
                if is_timeout(&transport) {
                    FetchError::Timeout {
                        url: url.to_string(),
                    }
                } else {
                    FetchError::Transport {
                        url: url.to_string(),
                        message: transport.to_string(),
                    }
                }
            }
        })?;

        let io_err = |source: io::Error| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        };

        let file = File::create(dest).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        let mut reader = response.into_reader();
        let mut buffer = vec![0u8; FETCH_CHUNK_BYTES];
        let mut written = 0u64;

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Err(FetchError::Timeout {
                        url: url.to_string(),
                    });
                }
                Err(err) => {
                    return Err(FetchError::Transport {
                        url: url.to_string(),
                        message: format!("reading response body: {err}"),
                    });
                }
            };
            writer.write_all(&buffer[..read]).map_err(io_err)?;
            written += read as u64;
        }

        writer.flush().map_err(io_err)?;
        debug!("fetched {written} bytes from {url} into {}", dest.display());
        Ok(written)
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = transport.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>()
            && matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            )
        {
            return true;
        }
        source = err.source();
    }
    false
}

/// Clip length as reported by the probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipDuration {
    Seconds(f64),
    Unknown,
}

impl ClipDuration {
    /// True when the length is known and at most `threshold_secs`.
    pub fn is_at_most(self, threshold_secs: f64) -> bool {
        matches!(self, ClipDuration::Seconds(secs) if secs <= threshold_secs)
    }
}

/// Best-effort inspection of a downloaded clip. Never fails.
pub trait DurationProbe {
    fn probe(&self, path: &Path) -> ClipDuration;
}

/// Asks `ffprobe` for the container duration.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: String,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl DurationProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> ClipDuration {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output();

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!(
                    "could not determine duration of {}: {} exited with {}",
                    path.display(),
                    self.program,
                    output.status
                );
                return ClipDuration::Unknown;
            }
            Err(err) => {
                warn!(
                    "could not determine duration of {}: {err}",
                    path.display()
                );
                return ClipDuration::Unknown;
            }
        };

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_probe_output(stdout: &str) -> ClipDuration {
    match stdout.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => ClipDuration::Seconds(secs),
        _ => ClipDuration::Unknown,
    }
}
