//! Call-site resolution for location tags
//!
//! Depth `0` is the anchor: the `#[track_caller]` location of the code that
//! called into the session. It costs nothing and needs no debug info.
//! Positive depths walk further up a captured backtrace, starting from the
//! frame that matches the anchor. Negative depths count from the outermost
//! frame, so `-1` is the outermost resolvable frame.
//!
//! Resolution never fails: when frames cannot be read, the result is a
//! `TLError <cause>` file name with line `0`.

use std::panic::{self, AssertUnwindSafe, Location};
use std::path::{Path, PathBuf};

/// Source file base name and line of one call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
}

impl CallSite {
    fn from_path(path: &Path, line: u32) -> Self {
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { file, line }
    }

    pub fn from_location(location: &Location<'_>) -> Self {
        Self::from_path(Path::new(location.file()), location.line())
    }

    fn failure(cause: impl std::fmt::Display) -> Self {
        Self {
            file: format!("TLError {}", cause),
            line: 0,
        }
    }
}

/// One resolved stack frame, innermost first in [`current_stack`]
#[derive(Debug, Clone)]
pub struct Frame {
    pub path: PathBuf,
    pub line: u32,
}

/// Capture the current call stack as `(file, line)` frames, innermost first.
///
/// Inlined calls appear as separate frames. Frames without file or line
/// information are skipped.
pub fn current_stack() -> Result<Vec<Frame>, String> {
    let captured = panic::catch_unwind(AssertUnwindSafe(|| {
        let trace = backtrace::Backtrace::new();
        trace
            .frames()
            .iter()
            .flat_map(|frame| frame.symbols())
            .filter_map(|symbol| {
                Some(Frame {
                    path: symbol.filename()?.to_path_buf(),
                    line: symbol.lineno()?,
                })
            })
            .collect::<Vec<_>>()
    }));

    match captured {
        Ok(frames) if frames.is_empty() => Err("no symbol information".to_string()),
        Ok(frames) => Ok(frames),
        Err(_) => Err("stack capture panicked".to_string()),
    }
}

fn anchor_index(frames: &[Frame], anchor: &Location<'_>) -> Option<usize> {
    let anchor_path = Path::new(anchor.file());
    let same_file = |frame: &Frame| frame.path.ends_with(anchor_path);

    frames
        .iter()
        .position(|frame| same_file(frame) && frame.line == anchor.line())
        .or_else(|| {
            frames
                .iter()
                .enumerate()
                .filter(|(_, frame)| same_file(frame))
                .min_by_key(|(_, frame)| frame.line.abs_diff(anchor.line()))
                .map(|(index, _)| index)
        })
}

/// Resolve the call site `depth` frames away from `anchor`.
pub fn resolve(depth: i32, anchor: &'static Location<'static>) -> CallSite {
    if depth == 0 {
        return CallSite::from_location(anchor);
    }

    let frames = match current_stack() {
        Ok(frames) => frames,
        Err(cause) => return CallSite::failure(cause),
    };
    let len = frames.len() as i64;

    let index = if depth > 0 {
        match anchor_index(&frames, anchor) {
            Some(start) => (start as i64 + depth as i64).min(len - 1),
            None => {
                tracing::debug!(
                    teelog.event = "caller_anchor_missing",
                    anchor = %anchor,
                    "Anchor frame not found in backtrace"
                );
                return CallSite::from_location(anchor);
            }
        }
    } else {
        (depth as i64).rem_euclid(len)
    };

    let frame = &frames[index as usize];
    CallSite::from_path(&frame.path, frame.line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn site_of_my_caller() -> CallSite {
        resolve(1, Location::caller())
    }

    #[test]
    fn test_depth_zero_is_the_anchor() {
        let line = line!() + 1;
        let site = resolve(0, Location::caller());
        assert_eq!(site, CallSite { file: "caller.rs".to_string(), line });
    }

    #[test]
    fn test_positive_depth_walks_to_the_caller() {
        let line = line!() + 1;
        let site = site_of_my_caller();
        assert_eq!(site.file, "caller.rs");
        assert_eq!(site.line, line);
    }

    #[test]
    fn test_huge_depth_is_clamped_to_outermost() {
        let outermost = resolve(-1, Location::caller());
        let clamped = resolve(i32::MAX, Location::caller());
        assert_eq!(clamped, outermost);
    }

    #[test]
    fn test_negative_depth_wraps_around() {
        let stack_len = current_stack().unwrap().len() as i32;
        let wrapped = resolve(-1 - 3 * stack_len, Location::caller());
        assert!(!wrapped.file.starts_with("TLError"));

        let extreme = resolve(i32::MIN, Location::caller());
        assert!(!extreme.file.starts_with("TLError"));
    }

    #[test]
    fn test_failure_sentinel() {
        let site = CallSite::failure("no symbol information");
        assert_eq!(site.file, "TLError no symbol information");
        assert_eq!(site.line, 0);
    }
}
