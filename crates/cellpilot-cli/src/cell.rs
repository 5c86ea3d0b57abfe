use cellpilot_chat::BufferPort;
use std::fs;
use std::path::{Path, PathBuf};

/// A cell stored in a file. Writes go straight to disk.
pub(crate) struct FileCell {
    path: PathBuf,
}

impl FileCell {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl BufferPort for FileCell {
    fn read_active_code(&self) -> Option<String> {
        fs::read_to_string(&self.path).ok()
    }

    fn write_active_code(&mut self, code: &str, _is_final: bool) {
        if let Err(err) = fs::write(&self.path, code) {
            eprintln!(
                "[cellpilot WARN] failed to write {}: {err}",
                self.path.display()
            );
        }
    }
}
