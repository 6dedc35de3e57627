//! Retention policies over the demo directory
//!
//! Autodemos are capped by count. Race demos are ranked by the elapsed time
//! encoded at the end of their name, optionally deduplicated so each
//! `<map>_<player>` keeps only its best run, then capped by count.

use crate::error::{DemoError, DemoResult};
use crate::filename::decode_elapsed;
use log::{error, info};
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::Path;

const AUTO_TOKEN: &str = "_auto";
const AUTO_DIGITS: usize = 4;

/// One demo file as seen by a purge pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoFileRecord {
    pub filename: String,
    pub sort_key: u64,
    pub remainder: String,
}

impl DemoFileRecord {
    /// Splits `<remainder>_<time><ext>` into its ranking parts
    pub fn from_filename(filename: &str, extension: &str) -> Self {
        let stem = strip_extension(filename, extension);
        let (remainder, suffix) = match stem.rfind('_') {
            Some(pos) => (&stem[..pos], &stem[pos..]),
            None => ("", stem),
        };

        Self {
            filename: filename.to_string(),
            sort_key: decode_elapsed(suffix),
            remainder: remainder.to_string(),
        }
    }
}

/// Ascending by sort key, file name breaking ties
pub fn by_sort_key(a: &DemoFileRecord, b: &DemoFileRecord) -> Ordering {
    a.sort_key
        .cmp(&b.sort_key)
        .then_with(|| a.filename.cmp(&b.filename))
}

/// Groups case-insensitively by remainder, best run first within a group
pub fn by_remainder_then_key(a: &DemoFileRecord, b: &DemoFileRecord) -> Ordering {
    a.remainder
        .to_ascii_lowercase()
        .cmp(&b.remainder.to_ascii_lowercase())
        .then_with(|| by_sort_key(a, b))
}

/// Outcome of one purge pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
    pub kept: usize,
}

fn strip_extension<'a>(filename: &'a str, extension: &str) -> &'a str {
    let split = filename.len().saturating_sub(extension.len());
    if filename.is_char_boundary(split) && filename[split..].eq_ignore_ascii_case(extension) {
        &filename[..split]
    } else {
        filename
    }
}

/// Sorted names of the demo files directly inside `dir`
///
/// A missing directory holds no demos.
pub fn list_demos(dir: &Path, extension: &str) -> DemoResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DemoError::io("list", dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DemoError::io("list", dir, e))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.len() > extension.len() && strip_extension(&name, extension).len() < name.len() {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

/// Number in a `..._auto####<ext>` name, if the name is an autodemo
pub fn auto_demo_number(filename: &str, extension: &str) -> Option<u32> {
    let stem = strip_extension(filename, extension);
    if stem.len() == filename.len() || stem.len() < AUTO_TOKEN.len() + AUTO_DIGITS {
        return None;
    }

    let (token, digits) = stem.as_bytes().split_at(stem.len() - AUTO_DIGITS);
    if !token.ends_with(AUTO_TOKEN.as_bytes()) || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(digits.iter().fold(0, |n, d| n * 10 + u32::from(d - b'0')))
}

fn remove_logged<F>(dir: &Path, name: &str, remove: &mut F, report: &mut PurgeReport) -> bool
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let path = dir.join(name);
    info!("Removing old demo: {}", path.display());
    match remove(&path) {
        Ok(()) => {
            report.removed.push(name.to_string());
            true
        }
        Err(e) => {
            error!("Error, couldn't remove file {}: {}", path.display(), e);
            report.failed.push(name.to_string());
            false
        }
    }
}

/// Deletes the lowest-numbered autodemos until at most `max_auto_demos` remain
pub fn purge_auto_demos(dir: &Path, extension: &str, max_auto_demos: usize) -> DemoResult<PurgeReport> {
    purge_auto_demos_with(dir, extension, max_auto_demos, |p| fs::remove_file(p))
}

pub fn purge_auto_demos_with<F>(
    dir: &Path,
    extension: &str,
    max_auto_demos: usize,
    mut remove: F,
) -> DemoResult<PurgeReport>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut autodemos: Vec<(u32, String)> = list_demos(dir, extension)?
        .into_iter()
        .filter_map(|name| auto_demo_number(&name, extension).map(|n| (n, name)))
        .collect();
    autodemos.sort();

    let mut report = PurgeReport::default();
    let mut remaining = autodemos.len();
    for (_, name) in &autodemos {
        if remaining <= max_auto_demos {
            break;
        }
        if remove_logged(dir, name, &mut remove, &mut report) {
            remaining -= 1;
        }
    }

    report.kept = remaining;
    Ok(report)
}

/// Ranks race demos by their time suffix and deletes duplicates and excess
pub fn purge_race_demos(
    dir: &Path,
    extension: &str,
    dedupe_by_remainder: bool,
    max_demos: usize,
) -> DemoResult<PurgeReport> {
    purge_race_demos_with(dir, extension, dedupe_by_remainder, max_demos, |p| {
        fs::remove_file(p)
    })
}

pub fn purge_race_demos_with<F>(
    dir: &Path,
    extension: &str,
    dedupe_by_remainder: bool,
    max_demos: usize,
    mut remove: F,
) -> DemoResult<PurgeReport>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut records: Vec<DemoFileRecord> = list_demos(dir, extension)?
        .iter()
        .map(|name| DemoFileRecord::from_filename(name, extension))
        .collect();

    let mut report = PurgeReport::default();

    if dedupe_by_remainder {
        records.sort_by(by_remainder_then_key);

        let mut survivors: Vec<DemoFileRecord> = Vec::with_capacity(records.len());
        for record in records {
            let duplicate = survivors
                .iter()
                .rev()
                .find(|kept| report.failed.iter().all(|f| *f != kept.filename))
                .is_some_and(|kept| kept.remainder.eq_ignore_ascii_case(&record.remainder));

            if duplicate && remove_logged(dir, &record.filename, &mut remove, &mut report) {
                continue;
            }
            survivors.push(record);
        }
        records = survivors;
    }

    if max_demos > 0 && records.len() > max_demos {
        records.sort_by(by_sort_key);
        let excess = records.split_off(max_demos);
        for record in excess {
            if !remove_logged(dir, &record.filename, &mut remove, &mut report) {
                records.push(record);
            }
        }
    }

    report.kept = records.len();
    Ok(report)
}
