use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

/// Which engine stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStream {
    Stdout,
    Stderr,
}

impl EngineStream {
    fn as_str(&self) -> &'static str {
        match self {
            EngineStream::Stdout => "stdout",
            EngineStream::Stderr => "stderr",
        }
    }
}

/// Longest line kept; the engine occasionally dumps binary garbage
const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Forward an engine output stream into the log, line by line, until EOF.
///
/// Returns the number of lines forwarded.
pub async fn forward_lines<R: AsyncRead + Unpin>(io: R, pid: u32, stream: EngineStream) -> usize {
    let mut frames = FramedRead::new(io, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut forwarded = 0;

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                debug!(
                    target: "lobridge::engine",
                    pid,
                    stream = stream.as_str(),
                    "{line}"
                );
                forwarded += 1;
            }
            Err(e) => {
                warn!(
                    target: "lobridge::engine",
                    pid,
                    stream = stream.as_str(),
                    error = %e,
                    "Stopped forwarding engine output"
                );
                break;
            }
        }
    }

    forwarded
}
