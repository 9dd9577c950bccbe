//! Log session lifecycle: sink resolution, record emission and startup retention

use crate::abbrev::TagCache;
use crate::caller::{self, CallSite};
use crate::codec::{CodecWriter, StreamMode};
use crate::config::{Compression, SessionConfig};
use crate::console::{print_with_color, Tone};
use crate::level::Level;
use crate::retention::{JobOutcome, RetentionAction, RetentionEngine};
use crate::table::{format_table, TableData};
use crate::Result;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::io::IsTerminal;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const FILE_TIMESTAMP: &str = "%Y-%m-%d_%H-%M-%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const RECORD_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Where a session's records end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Writing under the configured log directory
    FileLogging,
    /// File I/O disabled; only terminal echo remains
    NoFileLogging,
    /// Writing under the fallback directory, uncompressed
    Fallback,
    /// No file could be opened; records go to stderr
    StderrOnly,
}

/// Sinks tried in order until one opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkTarget {
    Primary,
    TempFallback,
    Stderr,
}

impl SinkTarget {
    fn on_failure(self) -> Option<SinkTarget> {
        match self {
            SinkTarget::Primary => Some(SinkTarget::TempFallback),
            SinkTarget::TempFallback => Some(SinkTarget::Stderr),
            SinkTarget::Stderr => None,
        }
    }

    fn state(self) -> SessionState {
        match self {
            SinkTarget::Primary => SessionState::FileLogging,
            SinkTarget::TempFallback => SessionState::Fallback,
            SinkTarget::Stderr => SessionState::StderrOnly,
        }
    }
}

/// Directory and file names of one session under a root
#[derive(Debug, Clone)]
struct SessionPaths {
    logs_dir: PathBuf,
    log_dir: PathBuf,
    log_file: PathBuf,
    latest_link: PathBuf,
}

impl SessionPaths {
    fn new(
        root: &Path,
        name: &str,
        started: DateTime<Local>,
        single_log_per_day: bool,
        compression: Compression,
    ) -> Self {
        let date = started.format(DATE_FORMAT).to_string();
        let logs_dir = root.join(format!("{}_log", name));
        let log_dir = logs_dir.join(&date);
        let stamp = if single_log_per_day {
            date
        } else {
            started.format(FILE_TIMESTAMP).to_string()
        };
        let log_file = log_dir.join(format!("{}_{}.log{}", name, stamp, compression.suffix()));
        let latest_link = logs_dir.join(format!("{}_latest.log{}", name, compression.suffix()));

        Self {
            logs_dir,
            log_dir,
            log_file,
            latest_link,
        }
    }
}

fn is_null_sink(dir: &Path) -> bool {
    match dir.to_str() {
        Some(dir) => {
            matches!(dir, "/dev/null" | "/dev/stdout" | "/dev/stderr")
                || dir.eq_ignore_ascii_case("NUL")
        }
        None => false,
    }
}

fn absolute(root: &Path) -> std::io::Result<PathBuf> {
    if root.is_absolute() {
        Ok(root.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(root))
    }
}

/// Point `<name>_latest.log[.ext]` at the freshly opened file through a relative link
#[cfg(unix)]
fn replace_latest_link(paths: &SessionPaths) -> std::io::Result<()> {
    if std::fs::symlink_metadata(&paths.latest_link).is_ok() {
        std::fs::remove_file(&paths.latest_link)?;
    }
    let target = paths
        .log_file
        .strip_prefix(&paths.logs_dir)
        .unwrap_or(&paths.log_file);
    std::os::unix::fs::symlink(target, &paths.latest_link)
}

#[cfg(not(unix))]
fn replace_latest_link(_paths: &SessionPaths) -> std::io::Result<()> {
    Ok(())
}

/// One `timestamp [LEVEL   ] [tag] message` line
pub fn format_record(at: DateTime<Local>, level: Level, tag: &str, message: &str) -> String {
    format!("{} [{:<8}] [{}] {}", at.format(RECORD_TIMESTAMP), level.as_str(), tag, message)
}

#[derive(Debug, Default)]
struct WriteErrors {
    count: u64,
    last: Option<String>,
}

/// A program's logging identity: its directory, open writer and terminal echo.
///
/// Every emission method resolves the caller, formats one record, appends it
/// and flushes before returning. Failures inside logging are recorded on the
/// session and never reach the caller.
pub struct LogSession {
    name: String,
    state: SessionState,
    started: DateTime<Local>,
    paths: Option<SessionPaths>,
    writer: Option<Mutex<CodecWriter>>,
    cache: Arc<TagCache>,
    caller_depth: i32,
    location_width: usize,
    suppress_printout: bool,
    disable_colors: bool,
    write_errors: Mutex<WriteErrors>,
    retention: Mutex<Option<RetentionEngine>>,
}

impl LogSession {
    /// Start a session using the process-wide location tag cache.
    ///
    /// Only an invalid configuration is an error. Unwritable directories
    /// degrade the session through the fallback chain instead.
    #[track_caller]
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_cache(config, TagCache::global())
    }

    /// Start a session with its own location tag cache
    #[track_caller]
    pub fn with_cache(config: SessionConfig, cache: Arc<TagCache>) -> Result<Self> {
        config.validate()?;

        let name = config.resolved_name();
        let suppress_printout = config
            .suppress_printout
            .unwrap_or_else(|| !std::io::stdout().is_terminal());

        let mut session = Self {
            name,
            state: SessionState::NoFileLogging,
            started: Local::now(),
            paths: None,
            writer: None,
            cache,
            caller_depth: config.caller_depth,
            location_width: config.location_width,
            suppress_printout,
            disable_colors: config.disable_colors,
            write_errors: Mutex::new(WriteErrors::default()),
            retention: Mutex::new(None),
        };

        if config.no_log || is_null_sink(&config.log_dir) {
            debug!(
                teelog.event = "file_logging_disabled",
                name = %session.name,
                log_dir = %config.log_dir.display(),
                "File logging disabled"
            );
            return Ok(session);
        }

        session.establish_sink(&config);

        if let Some(paths) = &session.paths {
            if !session.suppress_printout {
                print_with_color(
                    &format!("Log file: {}", paths.log_file.display()),
                    Tone::Info,
                    session.disable_colors,
                );
            }
            let mut engine = RetentionEngine::new(&config.retention);
            session.run_sweep(&mut engine);
            *session.retention.lock() = Some(engine);
        }

        let starting = format!(
            "Starting {} at {}",
            session.name,
            session.started.format(FILE_TIMESTAMP)
        );
        session.at_depth(0).info(starting);
        Ok(session)
    }

    fn open_at(
        &self,
        root: &Path,
        compression: Compression,
        level: Option<u32>,
        config: &SessionConfig,
    ) -> Result<(SessionPaths, CodecWriter)> {
        let root = absolute(root)?;
        let paths = SessionPaths::new(
            &root,
            &self.name,
            self.started,
            config.single_log_per_day,
            compression,
        );
        std::fs::create_dir_all(&paths.log_dir)?;
        let writer = CodecWriter::open(
            &paths.log_file,
            compression,
            level,
            StreamMode::from_binary(config.binary_mode),
        )?;
        replace_latest_link(&paths)?;
        Ok((paths, writer))
    }

    /// Walk the sink chain until one target works
    fn establish_sink(&mut self, config: &SessionConfig) {
        let mut target = SinkTarget::Primary;
        loop {
            let attempt = match target {
                SinkTarget::Primary => self.open_at(
                    &config.log_dir,
                    config.compression,
                    config.compression_level,
                    config,
                ),
                SinkTarget::TempFallback => {
                    self.open_at(&config.fallback_dir, Compression::None, None, config)
                }
                SinkTarget::Stderr => {
                    if config.exit_on_fallback_exhausted {
                        print_with_color(
                            "No log sink available, exiting",
                            Tone::Critical,
                            self.disable_colors,
                        );
                        std::process::exit(1);
                    }
                    self.writer = Some(Mutex::new(CodecWriter::stderr()));
                    self.state = SessionState::StderrOnly;
                    return;
                }
            };

            match attempt {
                Ok((paths, writer)) => {
                    self.paths = Some(paths);
                    self.writer = Some(Mutex::new(writer));
                    self.state = target.state();
                    return;
                }
                Err(e) => {
                    let next = target.on_failure().unwrap_or(SinkTarget::Stderr);
                    print_with_color(&e.to_string(), Tone::Error, self.disable_colors);
                    let notice = match next {
                        SinkTarget::TempFallback => format!(
                            "Failed to create log file! Trying to write to {}",
                            config.fallback_dir.display()
                        ),
                        _ => format!(
                            "Failed to create log file in {}",
                            config.fallback_dir.display()
                        ),
                    };
                    print_with_color(&notice, Tone::Error, self.disable_colors);
                    warn!(
                        teelog.event = "log_sink_fallback",
                        from = ?target,
                        to = ?next,
                        error = %e,
                        "Log sink unavailable, falling back"
                    );
                    target = next;
                }
            }
        }
    }

    #[track_caller]
    fn run_sweep(&self, engine: &mut RetentionEngine) {
        let Some(paths) = &self.paths else {
            return;
        };
        let plan = match engine.plan(&paths.logs_dir, Some(&paths.log_dir)) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(
                    teelog.event = "retention_scan_failed",
                    logs_dir = %paths.logs_dir.display(),
                    error = %e,
                    "Failed to scan log directory"
                );
                return;
            }
        };

        let here = self.at_depth(0);
        for path in &plan.unwritable {
            here.info(format!("Skipping {} as it is not writable", path.display()));
        }
        for path in &plan.undated {
            let name = path.file_name().unwrap_or(path.as_os_str()).to_string_lossy();
            print_with_color(
                &format!("Failed to get the creation time for {}, skipping", name),
                Tone::Error,
                self.disable_colors,
            );
        }

        let policy = *engine.policy();
        for (candidate, action) in &plan.decisions {
            match action {
                RetentionAction::Delete => here.tee_info(format!(
                    "Deleting log dir {} as it is older than {} years",
                    candidate.name, policy.delete_after_years
                )),
                RetentionAction::Compress => here.tee_info(format!(
                    "Compressing log dir {} as it is older than {} months",
                    candidate.name, policy.compress_after_months
                )),
                RetentionAction::Keep | RetentionAction::Ignore => continue,
            }
            if let Err(job) = engine.submit(candidate, *action) {
                warn!(
                    teelog.event = "retention_job_dropped",
                    path = %job.path().display(),
                    "Retention job dropped"
                );
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started
    }

    /// The open log file, if records go to a file
    pub fn log_file_path(&self) -> Option<&Path> {
        self.paths.as_ref().map(|p| p.log_file.as_path())
    }

    /// `<root>/<name>_log`, if records go to a file
    pub fn logs_dir(&self) -> Option<&Path> {
        self.paths.as_ref().map(|p| p.logs_dir.as_path())
    }

    pub fn latest_link_path(&self) -> Option<&Path> {
        self.paths.as_ref().map(|p| p.latest_link.as_path())
    }

    pub fn echo_suppressed(&self) -> bool {
        self.suppress_printout
    }

    /// Number of records that could not be written
    pub fn write_error_count(&self) -> u64 {
        self.write_errors.lock().count
    }

    pub fn last_write_error(&self) -> Option<String> {
        self.write_errors.lock().last.clone()
    }

    /// Wait for the startup retention jobs and return their outcomes
    pub fn finish_maintenance(&self) -> Vec<JobOutcome> {
        match self.retention.lock().as_mut() {
            Some(engine) => engine.finish(),
            None => Vec::new(),
        }
    }

    /// Emitter attributing records `depth` frames away from the calling code
    pub fn at_depth(&self, depth: i32) -> Emitter<'_> {
        Emitter {
            session: self,
            depth,
        }
    }

    fn emitter(&self) -> Emitter<'_> {
        self.at_depth(self.caller_depth)
    }

    pub(crate) fn echo(&self, message: &str, tone: Tone) {
        if !self.suppress_printout {
            print_with_color(message, tone, self.disable_colors);
        }
    }

    /// Write one record for an already resolved call site
    pub(crate) fn emit_resolved(&self, level: Level, message: &str, site: &CallSite) {
        let Some(writer) = &self.writer else {
            return;
        };
        let tag = self.cache.tag(&site.file, site.line as u64, self.location_width);
        let record = format_record(Local::now(), level, &tag, message);

        let result = writer.lock().append(&record);
        if let Err(e) = result {
            let mut errors = self.write_errors.lock();
            errors.count += 1;
            errors.last = Some(e.to_string());
            if errors.count == 1 {
                warn!(
                    teelog.event = "log_write_failed",
                    name = %self.name,
                    error = %e,
                    "Failed to write log record"
                );
            }
        }
    }

    fn emit(&self, level: Level, message: &str, depth: i32, anchor: &'static Location<'static>) {
        if self.writer.is_none() {
            return;
        }
        let site = caller::resolve(depth, anchor);
        self.emit_resolved(level, message, &site);
    }

    #[track_caller]
    pub fn debug(&self, message: impl AsRef<str>) {
        self.emitter().debug(message)
    }

    #[track_caller]
    pub fn info(&self, message: impl AsRef<str>) {
        self.emitter().info(message)
    }

    #[track_caller]
    pub fn warning(&self, message: impl AsRef<str>) {
        self.emitter().warning(message)
    }

    #[track_caller]
    pub fn error(&self, message: impl AsRef<str>) {
        self.emitter().error(message)
    }

    #[track_caller]
    pub fn critical(&self, message: impl AsRef<str>) {
        self.emitter().critical(message)
    }

    #[track_caller]
    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        self.emitter().log(level, message)
    }

    #[track_caller]
    pub fn tee(&self, level: Level, message: impl AsRef<str>) {
        self.emitter().tee(level, message)
    }

    #[track_caller]
    pub fn tee_debug(&self, message: impl AsRef<str>) {
        self.emitter().tee_debug(message)
    }

    #[track_caller]
    pub fn tee_info(&self, message: impl AsRef<str>) {
        self.emitter().tee_info(message)
    }

    #[track_caller]
    pub fn tee_warning(&self, message: impl AsRef<str>) {
        self.emitter().tee_warning(message)
    }

    #[track_caller]
    pub fn tee_error(&self, message: impl AsRef<str>) {
        self.emitter().tee_error(message)
    }

    #[track_caller]
    pub fn tee_critical(&self, message: impl AsRef<str>) {
        self.emitter().tee_critical(message)
    }

    #[track_caller]
    pub fn ok(&self, message: impl AsRef<str>) {
        self.emitter().ok(message)
    }

    #[track_caller]
    pub fn tee_ok(&self, message: impl AsRef<str>) {
        self.emitter().tee_ok(message)
    }

    #[track_caller]
    pub fn print_table(&self, data: impl Into<TableData>, header: Option<&[String]>) {
        self.emitter().print_table(data, header)
    }
}

/// Session emission methods with an explicit caller depth.
///
/// Wrappers around a session use this to attribute records to their own
/// callers: `log.at_depth(1).info(..)` tags the caller of the wrapper.
#[derive(Clone, Copy)]
pub struct Emitter<'a> {
    session: &'a LogSession,
    depth: i32,
}

impl Emitter<'_> {
    #[track_caller]
    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        self.session
            .emit(level, message.as_ref(), self.depth, Location::caller());
    }

    /// Echo to the terminal and write to the file
    #[track_caller]
    pub fn tee(&self, level: Level, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.session.echo(message, level.tone());
        self.session
            .emit(level, message, self.depth, Location::caller());
    }

    #[track_caller]
    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message)
    }

    #[track_caller]
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message)
    }

    #[track_caller]
    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(Level::Warning, message)
    }

    #[track_caller]
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message)
    }

    #[track_caller]
    pub fn critical(&self, message: impl AsRef<str>) {
        self.log(Level::Critical, message)
    }

    #[track_caller]
    pub fn tee_debug(&self, message: impl AsRef<str>) {
        self.tee(Level::Debug, message)
    }

    #[track_caller]
    pub fn tee_info(&self, message: impl AsRef<str>) {
        self.tee(Level::Info, message)
    }

    #[track_caller]
    pub fn tee_warning(&self, message: impl AsRef<str>) {
        self.tee(Level::Warning, message)
    }

    #[track_caller]
    pub fn tee_error(&self, message: impl AsRef<str>) {
        self.tee(Level::Error, message)
    }

    #[track_caller]
    pub fn tee_critical(&self, message: impl AsRef<str>) {
        self.tee(Level::Critical, message)
    }

    /// Success record; written at info level
    #[track_caller]
    pub fn ok(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message)
    }

    #[track_caller]
    pub fn tee_ok(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.session.echo(message, Tone::OkGreen);
        self.session
            .emit(Level::Info, message, self.depth, Location::caller());
    }

    /// Format `data` as a table, echo it and log it as one info record
    #[track_caller]
    pub fn print_table(&self, data: impl Into<TableData>, header: Option<&[String]>) {
        let table = format_table(data, "\t", header);
        self.session.echo(table.trim_end_matches('\n'), Tone::Info);
        self.session.emit(
            Level::Info,
            &format!("\n{}", table),
            self.depth,
            Location::caller(),
        );
    }
}
