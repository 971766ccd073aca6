use crate::env;
use log::{Level, LevelFilter, Metadata, Record};
use miette::IntoDiagnostic;
use once_cell::sync::Lazy;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug)]
struct Logger {
    level: LevelFilter,
    term_level: LevelFilter,
    file_level: LevelFilter,
    log_file: Option<Mutex<File>>,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if record.level() <= self.file_level
            && let Some(log_file) = &self.log_file
        {
            let mut log_file = log_file.lock().unwrap_or_else(|e| e.into_inner());
            let out = format!(
                "{now} {level} {args}",
                now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                level = self.styled_level(record.level()),
                args = record.args()
            );
            let _ = writeln!(log_file, "{}", console::strip_ansi_codes(&out));
        }
        if record.level() <= self.term_level {
            let out = self.render(record, self.term_level);
            if !out.is_empty() {
                eprintln!("{out}");
            }
        }
    }

    fn flush(&self) {
        if let Some(log_file) = &self.log_file {
            let _ = log_file.lock().unwrap_or_else(|e| e.into_inner()).flush();
        }
    }
}

static LOGGER: Lazy<Logger> = Lazy::new(Logger::init);

impl Logger {
    fn init() -> Self {
        let term_level = *env::COMPOSERD_LOG;
        let file_level = *env::COMPOSERD_LOG_FILE_LEVEL;

        let mut logger = Logger {
            level: std::cmp::max(term_level, file_level),
            file_level,
            term_level,
            log_file: None,
        };

        if let Some(path) = env::COMPOSERD_LOG_FILE.as_deref() {
            match init_log_file(path) {
                Ok(f) => logger.log_file = Some(Mutex::new(f)),
                Err(e) => eprintln!("composerd: could not open log file {}: {e}", path.display()),
            }
        }

        logger
    }

    fn render(&self, record: &Record, level: LevelFilter) -> String {
        match level {
            LevelFilter::Off => "".to_string(),
            LevelFilter::Trace => {
                let file = record.file().unwrap_or("<unknown>");
                let meta = format!(
                    "{level} {thread} {file}:{line}",
                    level = self.styled_level(record.level()),
                    thread = thread_id(),
                    line = record.line().unwrap_or(0),
                );
                format!("{meta} {args}", args = record.args())
            }
            _ => {
                let level = self.styled_level(record.level());
                format!("{level} {args}", args = record.args())
            }
        }
    }

    fn styled_level(&self, level: Level) -> String {
        let level = match level {
            Level::Error => console::style("ERROR").red().for_stderr(),
            Level::Warn => console::style("WARN").yellow().for_stderr(),
            Level::Info => console::style("INFO").bold().for_stderr(),
            Level::Debug => console::style("DEBUG").magenta().for_stderr(),
            Level::Trace => console::style("TRACE").cyan().for_stderr(),
        };
        console::style(format!("{level:<5}")).dim().to_string()
    }
}

fn thread_id() -> String {
    let id = format!("{:?}", std::thread::current().id());
    let id = id.replace("ThreadId(", "");
    id.replace(')', "")
}

pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if let Err(err) = log::set_logger(&*LOGGER).map(|()| log::set_max_level(LOGGER.level)) {
            eprintln!("composerd: could not initialize logger: {err}");
        }
    });
}

fn init_log_file(log_file: &Path) -> crate::Result<File> {
    if let Some(log_dir) = log_file.parent() {
        xx::file::mkdirp(log_dir)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .into_diagnostic()
}
