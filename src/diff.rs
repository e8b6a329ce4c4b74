//! Line numbers touched by a unified diff.
//!
//! `added` numbers are positions in the new file, `removed` numbers are
//! positions in the old file, both 1-based. Malformed input never errors:
//! unrecognized lines are skipped.

use std::ops::RangeInclusive;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
        .expect("hunk header regex is valid")
});

/// Added/removed line numbers for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineNumbers {
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
}

/// Line numbers for one file in a multi-file diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileLineDelta {
    pub file: String,
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
}

impl FileLineDelta {
    /// `L<start>-L<end>` fragment for the first added range, falling back to
    /// the first removed range. None when the file has no line changes
    /// (renames, mode changes, binaries).
    pub fn anchor(&self) -> Option<String> {
        let lines = if self.added.is_empty() {
            &self.removed
        } else {
            &self.added
        };
        let first = line_ranges(lines).into_iter().next()?;
        let (start, end) = first.into_inner();
        Some(if start == end {
            format!("L{start}")
        } else {
            format!("L{start}-L{end}")
        })
    }
}

#[derive(Clone, Copy)]
struct HunkHeader {
    old_start: u32,
    old_len: u32,
    new_start: u32,
    new_len: u32,
}

fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let caps = HUNK_HEADER.captures(line)?;
    // An omitted length means a single line.
    let len = |i: usize| -> Option<u32> {
        caps.get(i)
            .map_or(Some(1), |m| m.as_str().parse().ok())
    };
    Some(HunkHeader {
        old_start: caps.get(1)?.as_str().parse().ok()?,
        old_len: len(2)?,
        new_start: caps.get(3)?.as_str().parse().ok()?,
        new_len: len(4)?,
    })
}

/// Position inside one hunk. Lines still owed by the header decide whether a
/// `---`/`+++` line is content or the next file's header.
struct HunkCursor {
    old_line: u32,
    new_line: u32,
    old_left: u32,
    new_left: u32,
}

impl HunkCursor {
    fn open(header: HunkHeader) -> Option<Self> {
        let cursor = Self {
            old_line: header.old_start.saturating_sub(1),
            new_line: header.new_start.saturating_sub(1),
            old_left: header.old_len,
            new_left: header.new_len,
        };
        cursor.has_lines_left().then_some(cursor)
    }

    fn has_lines_left(&self) -> bool {
        self.old_left > 0 || self.new_left > 0
    }

    fn next_old(&mut self) -> Option<u32> {
        self.old_line = self.old_line.checked_add(1)?;
        self.old_left = self.old_left.saturating_sub(1);
        Some(self.old_line)
    }

    fn next_new(&mut self) -> Option<u32> {
        self.new_line = self.new_line.checked_add(1)?;
        self.new_left = self.new_left.saturating_sub(1);
        Some(self.new_line)
    }

    /// Consume one body line. None ends the hunk: either its lines are
    /// used up or a counter would overflow.
    fn step(&mut self, line: &str, out: &mut LineNumbers) -> Option<()> {
        match line.as_bytes().first() {
            Some(b'+') => out.added.push(self.next_new()?),
            Some(b'-') => out.removed.push(self.next_old()?),
            // Some tools strip the space from blank context lines.
            Some(b' ') | None => {
                self.next_old()?;
                self.next_new()?;
            }
            // "\ No newline at end of file" and anything unrecognized.
            _ => {}
        }
        self.has_lines_left().then_some(())
    }
}

/// Extract added and removed line numbers from the diff of a single file.
///
/// Both lists are strictly increasing for a well-formed diff. Lines outside
/// any hunk are ignored. A hunk ends once the line counts in its header are
/// used up, so `--- x` and `+++ x` inside a hunk are content, not headers.
pub fn extract_line_numbers(diff: &str) -> LineNumbers {
    let mut out = LineNumbers::default();
    let mut hunk: Option<HunkCursor> = None;

    for line in diff.lines() {
        if let Some(header) = parse_hunk_header(line) {
            hunk = HunkCursor::open(header);
            continue;
        }
        // Unparseable hunk header or a new file: numbering is unknown until
        // the next valid header.
        if line.starts_with("@@") || line.starts_with("diff --git") {
            hunk = None;
            continue;
        }
        let Some(cursor) = hunk.as_mut() else {
            continue;
        };
        if cursor.step(line, &mut out).is_none() {
            hunk = None;
        }
    }
    out
}

/// Split a multi-file `git diff` into per-file line deltas.
///
/// The path comes from `+++ b/<path>`, or `--- a/<path>` when the new side is
/// `/dev/null` (deletions), or the `diff --git` line when neither is present.
pub fn split_file_diffs(diff: &str) -> Vec<FileLineDelta> {
    let mut sections: Vec<Vec<&str>> = Vec::new();
    for line in diff.lines() {
        if line.starts_with("diff --git") || sections.is_empty() {
            sections.push(Vec::new());
        }
        if let Some(section) = sections.last_mut() {
            section.push(line);
        }
    }

    sections
        .into_iter()
        .filter_map(|lines| {
            let file = section_path(&lines)?;
            let numbers = extract_line_numbers(&lines.join("\n"));
            Some(FileLineDelta {
                file,
                added: numbers.added,
                removed: numbers.removed,
            })
        })
        .collect()
}

fn section_path(lines: &[&str]) -> Option<String> {
    let strip = |p: &str, prefix: &str| -> Option<String> {
        let p = p.trim();
        if p == "/dev/null" {
            return None;
        }
        Some(p.strip_prefix(prefix).unwrap_or(p).to_string())
    };

    // Header lines only appear before the first hunk.
    let header = lines.iter().take_while(|l| !l.starts_with("@@"));
    let mut new_path = None;
    let mut old_path = None;
    let mut git_path = None;
    for line in header {
        if let Some(p) = line.strip_prefix("+++ ") {
            new_path = strip(p, "b/");
        } else if let Some(p) = line.strip_prefix("--- ") {
            old_path = strip(p, "a/");
        } else if let Some(rest) = line.strip_prefix("diff --git ") {
            git_path = rest
                .split_whitespace()
                .nth(1)
                .map(|p| p.strip_prefix("b/").unwrap_or(p).to_string());
        }
    }
    new_path.or(old_path).or(git_path)
}

/// Collapse sorted line numbers into inclusive runs of consecutive lines.
pub fn line_ranges(lines: &[u32]) -> Vec<RangeInclusive<u32>> {
    let mut ranges: Vec<RangeInclusive<u32>> = Vec::new();
    for &n in lines {
        match ranges.last_mut() {
            Some(r) if r.end().checked_add(1) == Some(n) => {
                *r = *r.start()..=n;
            }
            _ => ranges.push(n..=n),
        }
    }
    ranges
}
