//! Canonical text projection of a content tree.
//!
//! The canonical projection is the concatenation of every text run below a
//! root, in document order, ignoring all structural markup. A *global
//! offset* is a char index into that string. Global offsets are the only
//! positions that survive a re-parse: node ids are disposable, but the
//! text a fresh parse produces is the same every time.
//!
//! Two inverse mappings are provided:
//!
//! - [`global_offset_of`]: `(text run, local offset) -> global offset`
//! - [`range_from_global_offsets`]: `(start, end) -> (run, offset)` pairs
//!
//! Empty text runs are walked and counted (with zero length) so that both
//! directions visit runs in exactly the same order.

use crate::markup::{char_slice, ContentTree, NodeId};

/// One text run's window `[start, end)` in the canonical projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRun {
    pub node: NodeId,
    pub start: usize,
    pub end: usize,
}

impl TextRun {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The flattened text of a tree plus the window of every run.
#[derive(Debug, Clone)]
pub struct Projection {
    text: String,
    char_len: usize,
    runs: Vec<TextRun>,
}

impl Projection {
    /// Walk `root` once and record its canonical text.
    pub fn build(tree: &ContentTree, root: NodeId) -> Self {
        let mut text = String::new();
        let mut runs = Vec::new();
        let mut acc = 0;
        for node in tree.text_runs(root) {
            let run_text = tree.text(node).unwrap_or_default();
            let len = run_text.chars().count();
            text.push_str(run_text);
            runs.push(TextRun {
                node,
                start: acc,
                end: acc + len,
            });
            acc += len;
        }
        Self {
            text,
            char_len: acc,
            runs,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.char_len
    }

    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    /// Canonical text between two global offsets.
    pub fn slice(&self, start: usize, end: usize) -> Option<&str> {
        char_slice(&self.text, start, end)
    }

    /// Global offset of the first occurrence of `needle`.
    pub fn find(&self, needle: &str) -> Option<usize> {
        if needle.is_empty() {
            return None;
        }
        self.text
            .find(needle)
            .map(|byte| self.text[..byte].chars().count())
    }
}

/// A pair of concrete text positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start_run: NodeId,
    pub start_offset: usize,
    pub end_run: NodeId,
    pub end_offset: usize,
}

/// Global offset of `local_offset` inside `target`.
///
/// Returns `None` when `target` is not a text run below `root`, or when the
/// local offset lies past the end of the run.
pub fn global_offset_of(
    tree: &ContentTree,
    root: NodeId,
    target: NodeId,
    local_offset: usize,
) -> Option<usize> {
    if !tree.contains(target) || !tree.contains(root) || !tree.is_text(target) {
        return None;
    }
    let mut acc = 0;
    for run in tree.text_runs(root) {
        let len = tree.char_len(run);
        if run == target {
            return (local_offset <= len).then_some(acc + local_offset);
        }
        acc += len;
    }
    None
}

/// Map a global span back onto text runs.
///
/// `start` lands in the run whose window contains it (`[run.start,
/// run.end)`), `end` in the run whose window reaches it (`(run.start,
/// run.end]`). Empty runs never hold a boundary. Fails when `end <= start`
/// or the walk ends before reaching `end`.
pub fn range_from_global_offsets(
    tree: &ContentTree,
    root: NodeId,
    start: usize,
    end: usize,
) -> Option<TextRange> {
    if end <= start || !tree.contains(root) {
        return None;
    }
    let mut acc = 0;
    let mut start_pos: Option<(NodeId, usize)> = None;
    for run in tree.text_runs(root) {
        let len = tree.char_len(run);
        let (node_start, node_end) = (acc, acc + len);
        acc = node_end;
        if len == 0 {
            continue;
        }
        if start_pos.is_none() && start >= node_start && start < node_end {
            start_pos = Some((run, start - node_start));
        }
        if let Some((start_run, start_offset)) = start_pos {
            if end > node_start && end <= node_end {
                return Some(TextRange {
                    start_run,
                    start_offset,
                    end_run: run,
                    end_offset: end - node_start,
                });
            }
        }
    }
    None
}
