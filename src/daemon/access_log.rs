//! Append-only access log of audit events, one JSON object per line

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::constants::{
    ACCESS_LOG_FILE, ACCESS_LOG_KEEP_MIN, ACCESS_LOG_KEEP_RATIO, LOG_QUERY_DEFAULT_LIMIT, LOG_QUERY_MAX_LIMIT,
};
use crate::models::{AuditEvent, Operation};

/// Entries kept when a log of `total` entries is trimmed
pub fn retained_count(total: usize) -> usize {
    let share = (total as f64 * ACCESS_LOG_KEEP_RATIO) as usize;
    share.max(ACCESS_LOG_KEEP_MIN).min(total)
}

/// Constraints for [`AccessLog::query`]; empty fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub pkg: Option<String>,
    pub ops: Vec<Operation>,
    /// Inclusive lower bound on `ts` (ms)
    pub from: Option<i64>,
    /// Inclusive upper bound on `ts` (ms)
    pub to: Option<i64>,
    /// Substring of the stored JSON line
    pub contains: Option<String>,
}

impl LogQuery {
    pub fn for_pkg(pkg: impl Into<String>) -> Self {
        Self {
            pkg: Some(pkg.into()),
            ..Self::default()
        }
    }

    /// `line` is the stored text `event` was parsed from
    fn matches(&self, event: &AuditEvent, line: &str) -> bool {
        if let Some(ref pkg) = self.pkg {
            if &event.pkg != pkg {
                return false;
            }
        }
        if !self.ops.is_empty() && !self.ops.contains(&event.op) {
            return false;
        }
        if self.from.is_some_and(|from| event.ts < from) || self.to.is_some_and(|to| event.ts > to) {
            return false;
        }
        match self.contains {
            Some(ref needle) => line.contains(needle.as_str()),
            None => true,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPage {
    pub entries: Vec<AuditEvent>,
    /// Matching entries across all pages
    pub total: usize,
    /// Offset of the next page, `None` on the last one
    pub next_offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    /// Distinct packages with at least one entry
    pub app_count: usize,
}

#[derive(Debug)]
pub struct AccessLog {
    path: PathBuf,
    max_bytes: u64,
}

impl AccessLog {
    /// Open `<log_dir>/access.log`, creating the directory when needed
    pub fn open(log_dir: impl AsRef<Path>, max_bytes: u64) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
        Ok(Self {
            path: log_dir.join(ACCESS_LOG_FILE),
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Current size on disk; 0 when the file does not exist yet
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Append one event. When the append pushes the log over its cap the oldest entries
    /// are dropped and the number of entries kept is returned.
    pub fn append(&self, event: &AuditEvent) -> Result<Option<usize>> {
        let mut line = serde_json::to_string(event).context("Failed to serialize audit event")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open access log: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write access log: {}", self.path.display()))?;

        if self.size() > self.max_bytes {
            return self.drop_oldest();
        }
        Ok(None)
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open access log: {}", self.path.display()))
            }
        };
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("Failed to read access log: {}", self.path.display()))?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Parsed entries in file order, each with its stored line
    fn read_entries(&self) -> Result<Vec<(AuditEvent, String)>> {
        let mut entries = Vec::new();
        for line in self.read_lines()? {
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => entries.push((event, line)),
                Err(e) => warn!("Skipping malformed access log line: {}", e),
            }
        }
        Ok(entries)
    }

    /// Replace the log with `lines` through a temporary file
    fn rewrite<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let tmp = self.path.with_extension("log.tmp");
        {
            let file = File::create(&tmp)
                .with_context(|| format!("Failed to create temporary log: {}", tmp.display()))?;
            let mut writer = BufWriter::new(file);
            for line in lines {
                writeln!(writer, "{}", line).context("Failed to write temporary log")?;
            }
            writer.flush().context("Failed to flush temporary log")?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace access log: {}", self.path.display()))
    }

    /// Trim when it would drop anything; `Some(kept)` when the file was rewritten
    fn drop_oldest(&self) -> Result<Option<usize>> {
        let lines = self.read_lines()?;
        let keep = retained_count(lines.len());
        if keep == lines.len() {
            return Ok(None);
        }
        self.rewrite(lines[lines.len() - keep..].iter().map(String::as_str))?;
        debug!("Trimmed access log from {} to {} entries", lines.len(), keep);
        Ok(Some(keep))
    }

    /// Drop the oldest entries, keeping [`retained_count`] of them. Returns the number kept.
    pub fn trim(&self) -> Result<usize> {
        match self.drop_oldest()? {
            Some(kept) => Ok(kept),
            None => Ok(self.read_lines()?.len()),
        }
    }

    /// Matching entries newest first, paged by `offset`/`limit`.
    ///
    /// A zero `limit` means the default page size; larger limits are capped.
    pub fn query(&self, query: &LogQuery, limit: usize, offset: usize) -> Result<QueryPage> {
        let limit = match limit {
            0 => LOG_QUERY_DEFAULT_LIMIT,
            n => n.min(LOG_QUERY_MAX_LIMIT),
        };

        let mut matched: Vec<AuditEvent> = self
            .read_entries()?
            .into_iter()
            .rev()
            .filter(|(event, line)| query.matches(event, line))
            .map(|(event, _)| event)
            .collect();
        // stable: equal timestamps stay newest-appended first
        matched.sort_by_key(|event| Reverse(event.ts));

        let total = matched.len();
        let entries: Vec<AuditEvent> = matched.into_iter().skip(offset).take(limit).collect();
        let end = offset.saturating_add(entries.len());
        Ok(QueryPage {
            entries,
            total,
            next_offset: (end < total).then_some(end),
        })
    }

    /// Remove every entry, or only those of `pkg`. Returns the number removed.
    pub fn clear(&self, pkg: Option<&str>) -> Result<usize> {
        let lines = self.read_lines()?;
        let Some(pkg) = pkg else {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove access log: {}", self.path.display()))
                }
            }
            return Ok(lines.len());
        };

        let kept: Vec<&str> = lines
            .iter()
            .filter(|line| match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => event.pkg != pkg,
                Err(_) => false,
            })
            .map(String::as_str)
            .collect();
        let removed = lines.len() - kept.len();
        if removed > 0 {
            self.rewrite(kept)?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<LogStats> {
        let packages: HashSet<String> = self.read_entries()?.into_iter().map(|(event, _)| event.pkg).collect();
        Ok(LogStats {
            total_size_bytes: self.size(),
            max_size_bytes: self.max_bytes,
            app_count: packages.len(),
        })
    }
}
