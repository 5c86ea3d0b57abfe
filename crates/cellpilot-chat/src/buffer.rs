use cellpilot_core::PreviewMode;
use cellpilot_diff::{DiffLine, DiffLineKind};
use serde::Serialize;
use std::collections::HashMap;

/// Access to the live code buffer (the active notebook cell).
///
/// The user may change the buffer at any time; the controller only reads it
/// when it needs a snapshot and writes it inside a single transition.
pub trait BufferPort {
    fn read_active_code(&self) -> Option<String>;

    /// `is_final` is false for a provisional preview and true for an
    /// accepted or rejected result.
    fn write_active_code(&mut self, code: &str, is_final: bool);
}

/// Receives the diff to decorate, or `None` to clear every decoration.
pub trait DiffRenderer {
    fn render(&mut self, diff_lines: Option<&[DiffLine]>);

    /// Set by the controller so stripes can be numbered against what its
    /// previews write into the buffer.
    fn set_preview_mode(&mut self, _mode: PreviewMode) {}
}

impl<T: BufferPort + ?Sized> BufferPort for &mut T {
    fn read_active_code(&self) -> Option<String> {
        (**self).read_active_code()
    }

    fn write_active_code(&mut self, code: &str, is_final: bool) {
        (**self).write_active_code(code, is_final)
    }
}

impl<T: DiffRenderer + ?Sized> DiffRenderer for &mut T {
    fn render(&mut self, diff_lines: Option<&[DiffLine]>) {
        (**self).render(diff_lines)
    }

    fn set_preview_mode(&mut self, mode: PreviewMode) {
        (**self).set_preview_mode(mode)
    }
}

/// Renderer for hosts that draw no decorations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderer;

impl DiffRenderer for NoopRenderer {
    fn render(&mut self, _diff_lines: Option<&[DiffLine]>) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CellId(pub String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// A changed line, numbered against the buffer content during review.
///
/// With a unified preview every diff line is in the buffer and `line` is its
/// 1-based position. With a proposed-code preview deleted lines are not in
/// the buffer: a deletion stripe is a marker after buffer line `line`, where
/// 0 means above the first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stripe {
    pub line: usize,
    pub kind: DiffLineKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellDecorations {
    stripes: Vec<Stripe>,
}

impl CellDecorations {
    pub fn stripes(&self) -> &[Stripe] {
        &self.stripes
    }

    pub fn is_clear(&self) -> bool {
        self.stripes.is_empty()
    }
}

/// Decoration state per cell, with explicit removal when a cell goes away.
#[derive(Debug, Clone, Default)]
pub struct DecorationRegistry {
    cells: HashMap<CellId, CellDecorations>,
    preview: PreviewMode,
}

impl DecorationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_preview(&mut self, preview: PreviewMode) {
        self.preview = preview;
    }

    pub fn preview(&self) -> PreviewMode {
        self.preview
    }

    /// Stripe `active` from `diff_lines` and clear every other cell in `cells`.
    pub fn sync(&mut self, active: &CellId, cells: &[CellId], diff_lines: Option<&[DiffLine]>) {
        for cell in cells {
            self.cells.entry(cell.clone()).or_default().stripes.clear();
        }
        let stripes = diff_lines
            .map(|lines| stripes_from(lines, self.preview))
            .unwrap_or_default();
        self.cells.entry(active.clone()).or_default().stripes = stripes;
    }

    pub fn dispose(&mut self, cell: &CellId) -> bool {
        self.cells.remove(cell).is_some()
    }

    pub fn stripes_for(&self, cell: &CellId) -> &[Stripe] {
        self.cells
            .get(cell)
            .map(CellDecorations::stripes)
            .unwrap_or(&[])
    }

    pub fn tracked_cells(&self) -> usize {
        self.cells.len()
    }
}

fn stripes_from(lines: &[DiffLine], preview: PreviewMode) -> Vec<Stripe> {
    let mut stripes = Vec::new();
    // Buffer lines up to and including this diff line.
    let mut written = 0;
    for line in lines {
        if preview == PreviewMode::Unified || line.kind != DiffLineKind::Deleted {
            written += 1;
        }
        if line.kind != DiffLineKind::Unchanged {
            stripes.push(Stripe {
                line: written,
                kind: line.kind,
            });
        }
    }
    stripes
}

/// [`DiffRenderer`] that keeps a [`DecorationRegistry`] in step with one active cell.
#[derive(Debug, Clone)]
pub struct NotebookRenderer {
    registry: DecorationRegistry,
    active: CellId,
    cells: Vec<CellId>,
}

impl NotebookRenderer {
    pub fn new(active: CellId, cells: Vec<CellId>) -> Self {
        Self {
            registry: DecorationRegistry::new(),
            active,
            cells,
        }
    }

    pub fn set_active(&mut self, active: CellId) {
        if !self.cells.contains(&active) {
            self.cells.push(active.clone());
        }
        self.active = active;
    }

    /// Forget a deleted cell.
    pub fn dispose(&mut self, cell: &CellId) {
        self.cells.retain(|c| c != cell);
        self.registry.dispose(cell);
    }

    pub fn registry(&self) -> &DecorationRegistry {
        &self.registry
    }

    pub fn active_stripes(&self) -> &[Stripe] {
        self.registry.stripes_for(&self.active)
    }
}

impl DiffRenderer for NotebookRenderer {
    fn render(&mut self, diff_lines: Option<&[DiffLine]>) {
        self.registry.sync(&self.active, &self.cells, diff_lines);
    }

    fn set_preview_mode(&mut self, mode: PreviewMode) {
        self.registry.set_preview(mode);
    }
}
