//! Tracing initialisation.
//!
//! Matches the teacher's plain/ANSI formatter split, but realised through
//! `tracing-subscriber` rather than a bespoke event-render pipeline: one
//! initialiser for human-readable local runs, one for plain (no-color)
//! output suitable for log aggregation.

use tracing_subscriber::{EnvFilter, fmt};

/// Controls whether ANSI color codes are emitted by the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    /// Auto-detect based on whether stderr is a TTY.
    #[default]
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    fn ansi(self) -> bool {
        match self {
            FormatterMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

/// Initialise the global `tracing` subscriber once per process. Safe to
/// call multiple times (subsequent calls are no-ops); intended to be
/// invoked from `main`-like entry points and test harness setup.
pub fn init(mode: FormatterMode) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_ansi(mode.ansi())
        .with_target(true)
        .try_init();
}

/// Convenience wrapper used by binaries/tests wanting the default,
/// auto-detected formatter.
pub fn init_default() {
    init(FormatterMode::Auto);
}
