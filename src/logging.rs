use tokio::sync::broadcast;
use tracing_subscriber::{EnvFilter, FmtSubscriber, fmt::MakeWriter};

/// Capacity of the log fan-out; slow `/api/logs` followers see a lag marker instead.
pub(crate) const LOG_CHANNEL_CAPACITY: usize = 500;

/// Writes every formatted line to stdout and to the broadcast channel behind `/api/logs`.
#[derive(Clone)]
pub(crate) struct SseMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct SseWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).trim_end().to_string();
        if !line.is_empty() {
            let _ = self.sender.send(line); // nobody following is fine
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Installs the global subscriber (`RUST_LOG` wins over `info`) and returns the log channel.
pub(crate) fn init_logging(suppress_stdout: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
    let make_writer = SseMakeWriter {
        sender: log_tx.clone(),
        suppress_stdout,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // already set in tests
    log_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn lines_reach_subscribers_without_trailing_newline() {
        let (tx, mut rx) = broadcast::channel(4);
        let make_writer = SseMakeWriter {
            sender: tx,
            suppress_stdout: true,
        };
        let mut writer = make_writer.make_writer();
        writer.write_all(b"INFO job accepted\n").unwrap();
        writer.write_all(b"\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "INFO job accepted");
        assert!(rx.try_recv().is_err());
    }
}
