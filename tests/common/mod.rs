#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch vault that cleans up on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// A vault with five notes across two folders.
    pub fn sample_vault() -> Self {
        let workspace = Self::new();
        workspace.write(
            "a.md",
            "---\nstatus: todo\npriority: p1\ntags: [x, y]\npoints: 3\ndue: 2024-06-10\n---\n# A\n",
        );
        workspace.write(
            "b.md",
            "---\nstatus: done\npriority: p2\ntags: x\npoints: 5\n---\n# B\n",
        );
        workspace.write(
            "c.md",
            "---\nstatus: todo\npriority: p2\npoints: 8\ndue: 2024-06-16\n---\n# C\n",
        );
        workspace.write("d.md", "---\npriority: p1\n---\n# D\n");
        workspace.write(
            "sub/e.md",
            "---\nstatus: doing\npriority: p1\ntags: [y]\npoints: n/a\n---\n# E\n",
        );
        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn vault_arg(&self) -> &str {
        self.path().to_str().expect("utf-8 temp path")
    }

    /// Writes `contents` under the workspace, creating folders as needed.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent folders");
        }
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.temp_dir.path().join(name)).expect("read temp file")
    }
}
