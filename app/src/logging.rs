use log::{Level, Log, Metadata, Record};
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// A small `log::Log` implementation that writes level-colored lines to
/// stderr. The corpus JSON itself always goes to stdout (or the
/// `--output` file), so log output never interleaves with it even when
/// both are terminals.
pub struct AppLogger {
    level: Level,
    stream: std::sync::Mutex<StandardStream>,
}

impl AppLogger {
    pub fn init(level: Level) -> Result<(), log::SetLoggerError> {
        let choice = if atty::is(atty::Stream::Stderr) {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        let logger = AppLogger {
            level,
            stream: std::sync::Mutex::new(StandardStream::stderr(choice)),
        };
        log::set_max_level(level.to_level_filter());
        log::set_boxed_logger(Box::new(logger))
    }

    fn color_for(level: Level) -> Color {
        match level {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Cyan,
            Level::Trace => Color::Blue,
        }
    }
}

impl Log for AppLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut stream = match self.stream.lock() {
            Ok(s) => s,
            Err(_) => return,
        };

        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Self::color_for(record.level()))).set_bold(true);
        let _ = stream.set_color(&spec);
        let _ = write!(stream, "{:<5} ", record.level());
        let _ = stream.reset();
        let _ = writeln!(stream, "{}", record.args());
    }

    fn flush(&self) {
        if let Ok(mut stream) = self.stream.lock() {
            let _ = stream.flush();
        }
    }
}
