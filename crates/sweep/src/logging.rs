//! `tracing` subscriber setup for the `geosweep` binary.
//!
//! Log lines go to stderr. When a progress bar is active, each line is written
//! with the bar suspended so the two do not interleave.

use std::io::{self, Write};

use indicatif::ProgressBar;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
struct BarAwareStderr {
    bar: Option<ProgressBar>,
}

impl Write for BarAwareStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.bar {
            Some(bar) => bar.suspend(|| io::stderr().write(buf)),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for BarAwareStderr {
    type Writer = BarAwareStderr;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Default directives: `RUST_LOG` wins, otherwise `info` (or `debug`).
fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug))
}

fn default_filter(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::new(format!("{level},hyper=warn,reqwest=warn,rustls=warn"))
}

/// Install the global subscriber.
pub fn init_logging(debug: bool, bar: Option<ProgressBar>) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(BarAwareStderr { bar })
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("install log subscriber: {err}"))
}
