//! Log retention: age-based compression and deletion of date directories

use crate::{config::RetentionConfig, Error, Result};
use chrono::{DateTime, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use xz2::write::XzEncoder;

/// Suffix of a compressed date directory
pub const ARCHIVE_SUFFIX: &str = ".tar.xz";

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const SECS_PER_MONTH: u64 = 30 * SECS_PER_DAY;
const SECS_PER_YEAR: u64 = 365 * SECS_PER_DAY;
const ARCHIVE_XZ_PRESET: u32 = 6;

static DATE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date pattern"));

/// Age thresholds. Zero disables the corresponding action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub delete_after_years: u32,
    pub compress_after_months: u32,
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            delete_after_years: config.delete_after_years,
            compress_after_months: config.compress_after_months,
        }
    }
}

/// What the sweep does with one log-root entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionAction {
    /// Not a date entry, not writable, or the active directory
    Ignore,
    Delete,
    Compress,
    Keep,
}

impl RetentionPolicy {
    /// Classify an entry of the given age. Deletion wins over compression.
    pub fn classify(&self, age: Duration, archived: bool) -> RetentionAction {
        let age = age.as_secs();
        if self.delete_after_years != 0 && age > self.delete_after_years as u64 * SECS_PER_YEAR {
            RetentionAction::Delete
        } else if self.compress_after_months != 0
            && !archived
            && age > self.compress_after_months as u64 * SECS_PER_MONTH
        {
            RetentionAction::Compress
        } else {
            RetentionAction::Keep
        }
    }
}

/// One date-named directory or archive under a log root
#[derive(Debug, Clone)]
pub struct RetentionCandidate {
    pub path: PathBuf,
    pub name: String,
    pub age: Duration,
    pub archived: bool,
}

/// Result of scanning a log root
#[derive(Debug, Default)]
pub struct SweepPlan {
    /// Classified candidates, in directory-name order
    pub decisions: Vec<(RetentionCandidate, RetentionAction)>,
    /// Date entries skipped because they cannot be written
    pub unwritable: Vec<PathBuf>,
    /// Date entries whose age could not be determined
    pub undated: Vec<PathBuf>,
    /// Jobs that could not be queued
    pub dropped: Vec<MaintenanceJob>,
}

impl SweepPlan {
    pub fn count(&self, action: RetentionAction) -> usize {
        self.decisions.iter().filter(|(_, a)| *a == action).count()
    }
}

/// Name of a date entry without its archive suffix, if it is date-named
fn date_stem(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(name);
    DATE_NAME.is_match(stem).then_some(stem)
}

/// Whether this process may write `path`, as decided by the kernel
#[cfg(unix)]
fn is_writable(path: &Path, _metadata: &fs::Metadata) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `path` is a valid NUL-terminated string that outlives the call.
    unsafe { libc::access(path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn is_writable(_path: &Path, metadata: &fs::Metadata) -> bool {
    !metadata.permissions().readonly()
}

/// Later of modify time and change/create time
fn fallback_timestamp(metadata: &fs::Metadata) -> Option<SystemTime> {
    let modified = metadata.modified().ok();

    #[cfg(unix)]
    let changed = {
        use std::os::unix::fs::MetadataExt;
        u64::try_from(metadata.ctime())
            .ok()
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    };
    #[cfg(not(unix))]
    let changed = metadata.created().ok();

    match (modified, changed) {
        (Some(m), Some(c)) => Some(m.max(c)),
        (m, c) => m.or(c),
    }
}

fn entry_timestamp(stem: &str, metadata: &fs::Metadata) -> Option<DateTime<Local>> {
    NaiveDate::parse_from_str(stem, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .or_else(|| fallback_timestamp(metadata).map(DateTime::<Local>::from))
}

/// Scan `logs_dir` and classify every date entry against `policy` as of `now`.
///
/// `active` is the session's own date directory and is never touched.
pub fn plan(
    logs_dir: &Path,
    policy: &RetentionPolicy,
    now: DateTime<Local>,
    active: Option<&Path>,
) -> Result<SweepPlan> {
    let mut entries: Vec<_> = fs::read_dir(logs_dir)
        .map_err(|e| Error::Retention {
            message: format!("Failed to list {}: {}", logs_dir.display(), e),
        })?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut plan = SweepPlan::default();
    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = date_stem(&name) else {
            continue;
        };
        if active == Some(path.as_path()) {
            continue;
        }

        let Ok(metadata) = fs::symlink_metadata(&path) else {
            plan.undated.push(path);
            continue;
        };
        if !is_writable(&path, &metadata) {
            debug!(
                teelog.event = "retention_entry_unwritable",
                path = %path.display(),
                "Skipping unwritable log entry"
            );
            plan.unwritable.push(path);
            continue;
        }

        let Some(timestamp) = entry_timestamp(stem, &metadata) else {
            warn!(
                teelog.event = "retention_entry_undated",
                path = %path.display(),
                "Failed to determine log entry age"
            );
            plan.undated.push(path);
            continue;
        };
        let age = (now - timestamp).to_std().unwrap_or(Duration::ZERO);
        let archived = name.ends_with(ARCHIVE_SUFFIX);
        let action = policy.classify(age, archived);

        plan.decisions.push((
            RetentionCandidate {
                path,
                name,
                age,
                archived,
            },
            action,
        ));
    }

    Ok(plan)
}

/// Background maintenance work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceJob {
    Remove(PathBuf),
    Compress(PathBuf),
}

impl MaintenanceJob {
    pub fn path(&self) -> &Path {
        match self {
            MaintenanceJob::Remove(path) | MaintenanceJob::Compress(path) => path,
        }
    }

    fn run(&self) -> Result<()> {
        match self {
            MaintenanceJob::Remove(path) => remove_entry(path),
            MaintenanceJob::Compress(path) => compress_folder(path).map(|_| ()),
        }
    }
}

/// The finished result of one job
#[derive(Debug)]
pub struct JobOutcome {
    pub job: MaintenanceJob,
    pub result: Result<()>,
}

/// A bounded job queue drained by a few worker threads.
///
/// Workers are spawned on the first submission. Dropping the pool closes the
/// queue and waits for queued jobs to finish.
pub struct MaintenancePool {
    worker_count: usize,
    sender: Option<flume::Sender<MaintenanceJob>>,
    receiver: flume::Receiver<MaintenanceJob>,
    outcome_sender: flume::Sender<JobOutcome>,
    outcomes: flume::Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
}

impl MaintenancePool {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(queue_capacity.max(1));
        let (outcome_sender, outcomes) = flume::unbounded();
        Self {
            worker_count: worker_count.max(1),
            sender: Some(sender),
            receiver,
            outcome_sender,
            outcomes,
            workers: Vec::new(),
        }
    }

    fn spawn_workers(&mut self) -> io::Result<()> {
        while self.workers.len() < self.worker_count {
            let jobs = self.receiver.clone();
            let outcomes = self.outcome_sender.clone();
            let handle = thread::Builder::new()
                .name(format!("teelog-retention-{}", self.workers.len()))
                .spawn(move || {
                    for job in jobs.iter() {
                        let result = job.run();
                        match &result {
                            Ok(()) => info!(
                                teelog.event = "retention_job_completed",
                                job = ?job,
                                "Retention job completed"
                            ),
                            Err(e) => warn!(
                                teelog.event = "retention_job_failed",
                                job = ?job,
                                error = %e,
                                "Retention job failed"
                            ),
                        }
                        let _ = outcomes.send(JobOutcome { job, result });
                    }
                })?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Queue a job without blocking. Returns the job back when it cannot be queued.
    pub fn submit(&mut self, job: MaintenanceJob) -> std::result::Result<(), MaintenanceJob> {
        if self.workers.is_empty() {
            if let Err(e) = self.spawn_workers() {
                warn!(
                    teelog.event = "retention_worker_spawn_failed",
                    error = %e,
                    "Failed to start retention workers"
                );
            }
            if self.workers.is_empty() {
                return Err(job);
            }
        }

        let Some(sender) = &self.sender else {
            return Err(job);
        };
        sender.try_send(job).map_err(|e| {
            warn!(
                teelog.event = "retention_queue_full",
                "Retention job not queued; it will be retried by the next sweep"
            );
            e.into_inner()
        })
    }

    /// Close the queue, wait for every worker and collect all outcomes.
    pub fn join(&mut self) -> Vec<JobOutcome> {
        self.sender = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(
                    teelog.event = "retention_worker_panicked",
                    "Retention worker panicked"
                );
            }
        }
        self.outcomes.try_iter().collect()
    }
}

impl Drop for MaintenancePool {
    fn drop(&mut self) {
        self.join();
    }
}

/// Runs the startup sweep of one log root and owns its maintenance pool
pub struct RetentionEngine {
    policy: RetentionPolicy,
    pool: MaintenancePool,
}

impl RetentionEngine {
    pub fn new(config: &RetentionConfig) -> Self {
        Self {
            policy: RetentionPolicy::from(config),
            pool: MaintenancePool::new(config.workers, config.queue_capacity),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Classify the entries of `logs_dir` as of now
    pub fn plan(&self, logs_dir: &Path, active: Option<&Path>) -> Result<SweepPlan> {
        plan(logs_dir, &self.policy, Local::now(), active)
    }

    /// Queue the job for a delete or compress decision
    pub fn submit(
        &mut self,
        candidate: &RetentionCandidate,
        action: RetentionAction,
    ) -> std::result::Result<(), MaintenanceJob> {
        let job = match action {
            RetentionAction::Delete => MaintenanceJob::Remove(candidate.path.clone()),
            RetentionAction::Compress => MaintenanceJob::Compress(candidate.path.clone()),
            RetentionAction::Keep | RetentionAction::Ignore => return Ok(()),
        };
        self.pool.submit(job)
    }

    /// Plan and queue in one step, returning without waiting for the jobs
    pub fn sweep(&mut self, logs_dir: &Path, active: Option<&Path>) -> Result<SweepPlan> {
        let mut plan = self.plan(logs_dir, active)?;
        for (candidate, action) in &plan.decisions {
            if let Err(job) = self.submit(candidate, *action) {
                plan.dropped.push(job);
            }
        }

        info!(
            teelog.event = "retention_sweep_submitted",
            logs_dir = %logs_dir.display(),
            delete = plan.count(RetentionAction::Delete),
            compress = plan.count(RetentionAction::Compress),
            unwritable = plan.unwritable.len(),
            "Retention sweep submitted"
        );
        Ok(plan)
    }

    /// Wait for submitted jobs and return their outcomes
    pub fn finish(&mut self) -> Vec<JobOutcome> {
        self.pool.join()
    }
}

fn remove_entry(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn archive_path(folder: &Path) -> PathBuf {
    let mut name = folder.as_os_str().to_os_string();
    name.push(ARCHIVE_SUFFIX);
    PathBuf::from(name)
}

/// Path of `tar`, when both it and `xz` are on `PATH`
#[cfg(not(windows))]
fn external_archiver() -> Option<PathBuf> {
    let tar = which::which("tar").ok()?;
    which::which("xz").ok()?;
    Some(tar)
}

#[cfg(windows)]
fn external_archiver() -> Option<PathBuf> {
    None
}

/// Write `archive` with an external `tar`. The folder itself is left alone.
fn compress_with_tar(tar: &Path, folder: &Path, archive: &Path) -> Result<()> {
    let (Some(parent), Some(base)) = (folder.parent(), folder.file_name()) else {
        return Err(Error::Archive {
            message: format!("{} has no parent directory", folder.display()),
        });
    };

    let status = std::process::Command::new(tar)
        .arg("-caf")
        .arg(archive)
        .arg(base)
        .current_dir(parent)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Archive {
            message: format!("tar exited with {}", status),
        })
    }
}

/// Archive `folder` into `<folder>.tar.xz` with `tar` and `xz2`, then remove it.
///
/// On failure the partial archive is removed and the folder is left in place.
pub fn compress_folder_in_process(folder: &Path) -> Result<PathBuf> {
    let archive = archive_path(folder);
    let base = folder.file_name().map(PathBuf::from).ok_or_else(|| Error::Archive {
        message: format!("{} has no directory name", folder.display()),
    })?;

    let written = (|| -> io::Result<()> {
        if !folder.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a directory"));
        }
        let file = File::create(&archive)?;
        let mut builder = tar::Builder::new(XzEncoder::new(file, ARCHIVE_XZ_PRESET));
        builder.follow_symlinks(false);

        for entry in WalkDir::new(folder).sort_by_file_name() {
            let entry = entry?;
            let relative = entry.path().strip_prefix(folder).unwrap_or(entry.path());
            let name = base.join(relative);
            if entry.file_type().is_dir() {
                builder.append_dir(&name, entry.path())?;
            } else {
                builder.append_path_with_name(entry.path(), &name)?;
            }
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?.sync_all()
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&archive);
        return Err(Error::Archive {
            message: format!("Failed to archive {}: {}", folder.display(), e),
        });
    }

    fs::remove_dir_all(folder)?;
    Ok(archive)
}

/// Archive a date directory, preferring an external `tar` with `xz`.
pub fn compress_folder(folder: &Path) -> Result<PathBuf> {
    compress_folder_with(external_archiver().as_deref(), folder)
}

/// The folder is only removed once a complete archive exists.
fn compress_folder_with(tar: Option<&Path>, folder: &Path) -> Result<PathBuf> {
    if let Some(tar) = tar {
        let archive = archive_path(folder);
        match compress_with_tar(tar, folder, &archive) {
            Ok(()) => {
                fs::remove_dir_all(folder)?;
                return Ok(archive);
            }
            Err(e) => {
                warn!(
                    teelog.event = "external_archiver_failed",
                    folder = %folder.display(),
                    error = %e,
                    "External archiver failed; falling back to in-process compression"
                );
                let _ = fs::remove_file(&archive);
            }
        }
    }
    compress_folder_in_process(folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use std::io::Read;
    use tempfile::TempDir;

    fn days(n: u64) -> Duration {
        Duration::from_secs(n * SECS_PER_DAY)
    }

    fn policy(delete_after_years: u32, compress_after_months: u32) -> RetentionPolicy {
        RetentionPolicy {
            delete_after_years,
            compress_after_months,
        }
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap()
    }

    fn archive_entries(archive: &Path) -> BTreeSet<String> {
        let decoder = xz2::read::XzDecoder::new(File::open(archive).unwrap());
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string()
            })
            .collect()
    }

    #[test]
    fn test_classification_thresholds() {
        let p = policy(2, 2);
        assert_eq!(p.classify(days(10), false), RetentionAction::Keep);
        assert_eq!(p.classify(days(60), false), RetentionAction::Keep);
        assert_eq!(p.classify(days(61), false), RetentionAction::Compress);
        assert_eq!(p.classify(days(730), false), RetentionAction::Compress);
        assert_eq!(p.classify(days(731), false), RetentionAction::Delete);
    }

    #[test]
    fn test_delete_takes_precedence() {
        assert_eq!(policy(1, 1).classify(days(4000), false), RetentionAction::Delete);
        assert_eq!(policy(1, 1).classify(days(4000), true), RetentionAction::Delete);
    }

    #[test]
    fn test_zero_disables_actions() {
        assert_eq!(policy(0, 2).classify(days(4000), false), RetentionAction::Compress);
        assert_eq!(policy(0, 0).classify(days(4000), false), RetentionAction::Keep);
        assert_eq!(policy(2, 0).classify(days(400), false), RetentionAction::Keep);
    }

    #[test]
    fn test_archived_entries_are_not_recompressed() {
        assert_eq!(policy(0, 1).classify(days(400), true), RetentionAction::Keep);
    }

    #[test]
    fn test_date_stem() {
        assert_eq!(date_stem("2015-01-01"), Some("2015-01-01"));
        assert_eq!(date_stem("2015-01-01.tar.xz"), Some("2015-01-01"));
        assert_eq!(date_stem("2015-1-01"), None);
        assert_eq!(date_stem("demo_latest.log"), None);
        assert_eq!(date_stem("2015-01-01.zip"), None);
    }

    #[test]
    fn test_plan_classifies_date_entries() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("2015-01-01")).unwrap();
        fs::create_dir(root.join("2020-02-01")).unwrap();
        fs::create_dir(root.join("2020-05-30")).unwrap();
        fs::create_dir(root.join("2020-06-01")).unwrap();
        fs::create_dir(root.join("notes")).unwrap();
        fs::write(root.join("2019-01-01.tar.xz"), b"archive").unwrap();

        let active = root.join("2020-06-01");
        let plan = plan(root, &policy(2, 2), fixed_now(), Some(&active)).unwrap();
        let actions: Vec<(&str, RetentionAction)> = plan
            .decisions
            .iter()
            .map(|(c, a)| (c.name.as_str(), *a))
            .collect();

        assert_eq!(
            actions,
            vec![
                ("2015-01-01", RetentionAction::Delete),
                ("2019-01-01.tar.xz", RetentionAction::Keep),
                ("2020-02-01", RetentionAction::Compress),
                ("2020-05-30", RetentionAction::Keep),
            ]
        );
        assert!(plan.decisions[1].0.archived);
    }

    #[test]
    fn test_deletion_disabled_never_deletes() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("2015-01-01")).unwrap();

        let plan = plan(temp_dir.path(), &policy(0, 0), fixed_now(), None).unwrap();
        assert_eq!(plan.decisions[0].1, RetentionAction::Keep);
    }

    #[test]
    fn test_directory_with_archive_suffix_is_treated_as_archived() {
        // Classification is by name only, so this directory is never compressed.
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("2019-01-01.tar.xz")).unwrap();

        let plan = plan(temp_dir.path(), &policy(0, 1), fixed_now(), None).unwrap();
        assert_eq!(plan.decisions[0].1, RetentionAction::Keep);
        assert!(plan.decisions[0].0.archived);
    }

    #[test]
    fn test_unparseable_date_falls_back_to_file_times() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("2019-02-30");
        fs::create_dir(&dir).unwrap();
        let old = SystemTime::now() - days(4000);
        filetime::set_file_mtime(&dir, filetime::FileTime::from_system_time(old)).unwrap();

        // The change time is refreshed by the mtime update, so the entry is recent.
        let plan = plan(temp_dir.path(), &policy(1, 1), Local::now(), None).unwrap();
        assert_eq!(plan.decisions.len(), 1);
        assert_eq!(plan.decisions[0].1, RetentionAction::Keep);
        assert!(plan.undated.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_entries_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("2015-01-01");
        fs::create_dir(&dir).unwrap();
        let mut permissions = fs::metadata(&dir).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&dir, permissions).unwrap();

        let plan = plan(temp_dir.path(), &policy(1, 1), fixed_now(), None).unwrap();

        // Root may write read-only directories, so the outcome follows the process.
        let privileged = unsafe { libc::geteuid() } == 0;
        if privileged {
            assert!(plan.unwritable.is_empty());
            assert_eq!(plan.decisions.len(), 1);
            assert_eq!(plan.decisions[0].1, RetentionAction::Delete);
        } else {
            assert!(plan.decisions.is_empty());
            assert_eq!(plan.unwritable, vec![dir.clone()]);
        }

        let mut permissions = fs::metadata(&dir).unwrap().permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(&dir, permissions).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_writability_follows_process_access() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("2015-01-01");
        fs::create_dir(&path).unwrap();
        let metadata = fs::metadata(&path).unwrap();
        assert!(is_writable(&path, &metadata));

        let missing = temp_dir.path().join("2015-01-02");
        assert!(!is_writable(&missing, &metadata));
    }

    #[test]
    fn test_in_process_compression() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("2015-01-01");
        fs::create_dir_all(folder.join("nested")).unwrap();
        fs::write(folder.join("demo_2015-01-01_10-00-00.log"), "first session\n").unwrap();
        fs::write(folder.join("nested").join("extra.log"), "extra\n").unwrap();

        let archive = compress_folder_in_process(&folder).unwrap();
        assert_eq!(archive, temp_dir.path().join("2015-01-01.tar.xz"));
        assert!(!folder.exists());

        let entries = archive_entries(&archive);
        assert!(entries.contains("2015-01-01"));
        assert!(entries.contains("2015-01-01/demo_2015-01-01_10-00-00.log"));
        assert!(entries.contains("2015-01-01/nested/extra.log"));

        let decoder = xz2::read::XzDecoder::new(File::open(&archive).unwrap());
        let mut tar = tar::Archive::new(decoder);
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().ends_with("extra.log") {
                let mut text = String::new();
                entry.read_to_string(&mut text).unwrap();
                assert_eq!(text, "extra\n");
            }
        }
    }

    #[test]
    fn test_failed_compression_leaves_no_archive() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("2015-01-01");

        let result = compress_folder_in_process(&folder);
        assert!(matches!(result, Err(Error::Archive { .. })));
        assert!(!archive_path(&folder).exists());
    }

    #[test]
    fn test_compress_folder_produces_archive() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("2016-03-04");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("a.log"), "a\n").unwrap();

        let archive = compress_folder(&folder).unwrap();
        assert!(archive.exists());
        assert!(!folder.exists());
        assert!(archive_entries(&archive).contains("2016-03-04/a.log"));
    }

    /// A `tar` that honours `--remove-files` on its first member, then fails
    #[cfg(unix)]
    fn failing_tar(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("tar");
        fs::write(
            &script,
            "#!/bin/sh\n\
             for arg in \"$@\"; do\n\
             if [ \"$arg\" = \"--remove-files\" ]; then rm -f 2015-01-01/a.log; fi\n\
             done\n\
             echo partial > \"$2\"\n\
             exit 2\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_external_archiver_loses_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        let archiver = failing_tar(bin.path());
        let folder = temp_dir.path().join("2015-01-01");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("a.log"), "precious\n").unwrap();
        fs::write(folder.join("b.log"), "other\n").unwrap();

        let archive = compress_folder_with(Some(&archiver), &folder).unwrap();
        assert!(!folder.exists());

        let entries = archive_entries(&archive);
        assert!(entries.contains("2015-01-01/a.log"), "{:?}", entries);
        assert!(entries.contains("2015-01-01/b.log"), "{:?}", entries);

        let decoder = xz2::read::XzDecoder::new(File::open(&archive).unwrap());
        let mut contents = tar::Archive::new(decoder);
        let mut found = false;
        for entry in contents.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().ends_with("a.log") {
                let mut text = String::new();
                entry.read_to_string(&mut text).unwrap();
                assert_eq!(text, "precious\n");
                found = true;
            }
        }
        assert!(found);
    }

    #[test]
    fn test_pool_runs_jobs_and_reports_outcomes() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("2015-01-01");
        let file = temp_dir.path().join("2014-01-01.tar.xz");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("x.log"), "x").unwrap();
        fs::write(&file, "x").unwrap();

        let mut pool = MaintenancePool::new(2, 8);
        pool.submit(MaintenanceJob::Remove(dir.clone())).unwrap();
        pool.submit(MaintenanceJob::Remove(file.clone())).unwrap();
        pool.submit(MaintenanceJob::Remove(temp_dir.path().join("missing"))).unwrap();

        let outcomes = pool.join();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| o.result.is_ok()).count(), 2);
        assert!(!dir.exists());
        assert!(!file.exists());
    }

    #[test]
    fn test_engine_sweep_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("2001-01-01")).unwrap();
        fs::write(root.join("2001-01-01").join("old.log"), "old\n").unwrap();

        let config = RetentionConfig {
            delete_after_years: 0,
            compress_after_months: 1,
            workers: 1,
            queue_capacity: 4,
        };
        let mut engine = RetentionEngine::new(&config);
        let plan = engine.sweep(root, None).unwrap();
        assert_eq!(plan.count(RetentionAction::Compress), 1);

        let outcomes = engine.finish();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert!(root.join("2001-01-01.tar.xz").exists());
        assert!(!root.join("2001-01-01").exists());
    }
}
