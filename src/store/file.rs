// src/store/file.rs

//! File-backed task store.
//!
//! One task per file under a tasks directory. A task file is a TOML
//! metadata block delimited by `+++` lines, followed by a free-text body:
//!
//! ```text
//! +++
//! id = "task-a"
//! state = "new"
//! requires = ["dep-task"]
//! +++
//! Describe the work here.
//! ```
//!
//! Malformed metadata is a hard error: the engine must never guess a task's
//! state from a file it cannot read.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{Result, WorkdagError};
use crate::store::{Task, TaskMeta, TaskSet, TaskStore};

const DELIMITER: &str = "+++";

/// Task store reading and writing `.md` task files in a single directory.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load a single task file.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Task> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;

        let (header, body) = split_metadata_block(&contents).map_err(|message| {
            WorkdagError::TaskFile {
                path: path.to_path_buf(),
                message,
            }
        })?;

        let meta: TaskMeta = toml::from_str(header).map_err(|e| WorkdagError::TaskFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(Task {
            meta,
            body: body.to_string(),
            path: path.to_path_buf(),
        })
    }
}

impl TaskStore for FileTaskStore {
    fn load_all(&self) -> Result<TaskSet> {
        let mut tasks = TaskSet::new();

        if !self.dir.is_dir() {
            debug!(dir = %self.dir.display(), "tasks directory missing; treating as empty");
            return Ok(tasks);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !is_task_file(&path) {
                continue;
            }
            let task = self.load(&path)?;
            tasks.insert(task.id().to_string(), task);
        }

        debug!(dir = %self.dir.display(), count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    fn save(&self, task: &Task) -> Result<()> {
        let path = if task.path.as_os_str().is_empty() {
            self.dir.join(format!("{}.md", task.meta.id))
        } else {
            task.path.clone()
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let header = toml::to_string(&task.meta)?;
        let contents = format!("{DELIMITER}\n{header}{DELIMITER}\n{}", task.body);
        fs::write(&path, contents)?;

        debug!(task = %task.meta.id, path = %path.display(), "saved task file");
        Ok(())
    }
}

/// Split a task file into its TOML header and body.
///
/// Returns an error message (not a full error; the caller attaches the
/// path) when the delimiters are missing.
pub fn split_metadata_block(contents: &str) -> std::result::Result<(&str, &str), String> {
    let rest = contents
        .strip_prefix(DELIMITER)
        .and_then(|r| r.strip_prefix('\n'))
        .ok_or_else(|| format!("missing opening {DELIMITER} metadata delimiter"))?;

    let close = format!("\n{DELIMITER}");
    let end = rest
        .find(&close)
        .ok_or_else(|| format!("missing closing {DELIMITER} metadata delimiter"))?;

    let header = &rest[..end + 1];
    let body = rest[end + close.len()..].strip_prefix('\n').unwrap_or("");
    Ok((header, body))
}

fn is_task_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden && path.extension().is_some_and(|e| e == "md")
}
