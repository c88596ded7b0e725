//! C8 — the output sink (spec §4.4 `output(line)`).
//!
//! `%%>output:` is a protocol-level concept distinct from this crate's own
//! `tracing` diagnostics (see SPEC_FULL.md §10.1): it is how the
//! *application* asks the engine to log something to the engine's own log
//! file, not an instrumentation facility of this crate.

use crate::engine::{Engine, Result};

/// A line-buffered sink that forwards text to the engine's log, one
/// `%%>output:<line>` command per `\n`-separated line (spec §4.4).
///
/// Useful for wiring up a [`std::fmt::Write`]-style consumer (a `tracing`
/// layer, a redirected stdout) that may hand over partial lines; complete
/// lines are forwarded as soon as they're seen, and a trailing partial
/// line is held until the next call or [`Self::flush`].
pub struct OutputSink {
    engine: Engine,
    buffer: tokio::sync::Mutex<String>,
}

impl OutputSink {
    /// Builds a sink that forwards through `engine`.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            buffer: tokio::sync::Mutex::new(String::new()),
        }
    }

    /// Forwards `line` verbatim, splitting on any embedded `\n` (spec
    /// §4.4). Equivalent to [`Engine::output`].
    pub async fn write_line(&self, line: impl AsRef<str>) -> Result<()> {
        self.engine.output(line.as_ref()).await
    }

    /// Buffers `text`, forwarding every complete line as soon as a `\n` is
    /// seen. A trailing partial line is held until the next call or
    /// [`Self::flush`].
    pub async fn write_str(&self, text: &str) -> Result<()> {
        let lines = {
            let mut buffer = self.buffer.lock().await;
            buffer.push_str(text);

            let mut lines = Vec::new();
            while let Some(pos) = buffer.find('\n') {
                lines.push(buffer[..pos].to_string());
                buffer.drain(..=pos);
            }

            lines
        };

        for line in lines {
            self.engine.output(line).await?;
        }

        Ok(())
    }

    /// Forwards whatever partial line is currently buffered, if any.
    pub async fn flush(&self) -> Result<()> {
        let remaining = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };

        if !remaining.is_empty() {
            self.engine.output(remaining).await?;
        }

        Ok(())
    }
}
