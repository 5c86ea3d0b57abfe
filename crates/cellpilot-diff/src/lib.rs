use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Unchanged,
    Inserted,
    Deleted,
}

impl DiffLineKind {
    /// Single-character gutter marker, as used by unified diffs.
    pub fn marker(self) -> char {
        match self {
            DiffLineKind::Unchanged => ' ',
            DiffLineKind::Inserted => '+',
            DiffLineKind::Deleted => '-',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub line_content: String,
    pub kind: DiffLineKind,
    /// 1-based line number in `before`, absent for inserted lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_line: Option<usize>,
    /// 1-based line number in `after`, absent for deleted lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_line: Option<usize>,
}

/// Line-level diff between two code strings.
///
/// `unified_text` holds every line of `lines` in order, deletions included,
/// so a renderer can stripe it line by line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedDiff {
    pub unified_text: String,
    pub lines: Vec<DiffLine>,
}

impl UnifiedDiff {
    pub fn inserted_count(&self) -> usize {
        self.count(DiffLineKind::Inserted)
    }

    pub fn deleted_count(&self) -> usize {
        self.count(DiffLineKind::Deleted)
    }

    pub fn is_unchanged(&self) -> bool {
        self.lines
            .iter()
            .all(|line| line.kind == DiffLineKind::Unchanged)
    }

    /// The `before` side, rebuilt from unchanged and deleted lines.
    pub fn original_text(&self) -> String {
        self.side(DiffLineKind::Deleted)
    }

    /// The `after` side, rebuilt from unchanged and inserted lines.
    pub fn proposed_text(&self) -> String {
        self.side(DiffLineKind::Inserted)
    }

    fn count(&self, kind: DiffLineKind) -> usize {
        self.lines.iter().filter(|line| line.kind == kind).count()
    }

    fn side(&self, changed: DiffLineKind) -> String {
        self.lines
            .iter()
            .filter(|line| line.kind == DiffLineKind::Unchanged || line.kind == changed)
            .map(|line| line.line_content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Compute a minimal line diff from `before` to `after`.
///
/// Alignment is a longest-common-subsequence; when several alignments are
/// equally long the one matching lines earliest in `before` wins. Within a
/// changed block deletions are emitted before insertions.
///
/// Past a shared prefix the exact alignment needs a table of
/// `before_lines * after_lines` cells. Inputs over `MAX_TABLE_CELLS` are
/// aligned with Myers' algorithm instead, which is still minimal and
/// deterministic but may pick a different one of several equal alignments.
pub fn compute_unified_diff(before: &str, after: &str) -> UnifiedDiff {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();
    let matches = lcs_matches(&old, &new);

    let mut lines = Vec::with_capacity(old.len().max(new.len()));
    let (mut i, mut j) = (0_usize, 0_usize);
    for (mi, mj) in matches
        .into_iter()
        .chain(std::iter::once((old.len(), new.len())))
    {
        while i < mi {
            lines.push(DiffLine {
                line_content: old[i].to_string(),
                kind: DiffLineKind::Deleted,
                old_line: Some(i + 1),
                new_line: None,
            });
            i += 1;
        }
        while j < mj {
            lines.push(DiffLine {
                line_content: new[j].to_string(),
                kind: DiffLineKind::Inserted,
                old_line: None,
                new_line: Some(j + 1),
            });
            j += 1;
        }
        if mi < old.len() && mj < new.len() {
            lines.push(DiffLine {
                line_content: old[mi].to_string(),
                kind: DiffLineKind::Unchanged,
                old_line: Some(mi + 1),
                new_line: Some(mj + 1),
            });
            i = mi + 1;
            j = mj + 1;
        }
    }

    let unified_text = lines
        .iter()
        .map(|line| line.line_content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    UnifiedDiff {
        unified_text,
        lines,
    }
}

/// Largest LCS table, in cells, built for an exact earliest-match alignment.
const MAX_TABLE_CELLS: usize = 1 << 22;

/// Matched `(old, new)` index pairs of an LCS, in increasing order.
fn lcs_matches(old: &[&str], new: &[&str]) -> Vec<(usize, usize)> {
    // A shared prefix is always part of the earliest alignment.
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut matches: Vec<(usize, usize)> = (0..prefix).map(|k| (k, k)).collect();

    let a = &old[prefix..];
    let b = &new[prefix..];
    let (m, n) = (a.len(), b.len());
    if m == 0 || n == 0 {
        return matches;
    }
    if m.saturating_mul(n) > MAX_TABLE_CELLS {
        matches.extend(
            myers_matches(a, b)
                .into_iter()
                .map(|(i, j)| (prefix + i, prefix + j)),
        );
        return matches;
    }

    // suffix[i][j] = LCS length of a[i..] and b[j..]
    let width = n + 1;
    let mut suffix = vec![0_u32; (m + 1) * width];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            suffix[i * width + j] = if a[i] == b[j] {
                suffix[(i + 1) * width + j + 1] + 1
            } else {
                suffix[(i + 1) * width + j].max(suffix[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if a[i] == b[j] {
            matches.push((prefix + i, prefix + j));
            i += 1;
            j += 1;
        } else if suffix[(i + 1) * width + j] > suffix[i * width + j + 1] {
            i += 1;
        } else {
            // Ties skip an `after` line so a[i] stays available to match.
            j += 1;
        }
    }
    matches
}

/// Matched pairs from `similar`'s Myers diff, used when the table is too big.
fn myers_matches(old: &[&str], new: &[&str]) -> Vec<(usize, usize)> {
    similar::capture_diff_slices(similar::Algorithm::Myers, old, new)
        .into_iter()
        .filter_map(|op| match op {
            similar::DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => Some((0..len).map(move |k| (old_index + k, new_index + k))),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Git-style unified patch of `before` -> `after`, `None` when identical.
pub fn unified_patch(
    before: &str,
    after: &str,
    old_header: &str,
    new_header: &str,
) -> Option<String> {
    if before == after {
        return None;
    }
    let diff = similar::TextDiff::from_lines(before, after);
    let mut patch = diff
        .unified_diff()
        .context_radius(3)
        .header(old_header, new_header)
        .to_string();
    if !patch.ends_with('\n') {
        patch.push('\n');
    }
    Some(patch)
}

/// Hex sha256 of a code string, used to detect buffer drift.
pub fn code_fingerprint(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}
