//! On-disk workspace
//!
//! A workspace is a named directory scope:
//!
//!   <root>/workspaces/<name>/configs/*.jsonl   definition snapshots
//!   <root>/workspaces/<name>/workdir/          supervisor-owned scratch
//!   <root>/logs/                               event logs
//!
//! Definition snapshots are rewritten whole on every successful mutation:
//! one JSONL line per logical entity, tagged with the writing component so
//! a snapshot file cannot be silently taken over by another owner. The
//! workdir is scoped per principal: files are created under an owner and
//! only that owner may write them.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use overseer_core::{Error, Result};

/// One owner-tagged line of a definition snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedRecord {
    pub owner: String,
    pub record: serde_json::Value,
}

pub struct Workspace {
    name: String,
    dir: PathBuf,
    logs_dir: PathBuf,
    /// Relative workdir path → owning principal. Scratch files are
    /// ephemeral, so ownership is not persisted across restarts.
    workdir_owners: DashMap<PathBuf, String>,
}

impl Workspace {
    /// Open (creating directories as needed) the named workspace under `root`.
    pub fn open(root: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let root = root.as_ref();
        let dir = root.join("workspaces").join(&name);
        let logs_dir = root.join("logs");

        std::fs::create_dir_all(dir.join("configs"))?;
        std::fs::create_dir_all(dir.join("workdir"))?;
        std::fs::create_dir_all(&logs_dir)?;

        info!(workspace = %name, dir = %dir.display(), "workspace opened");
        Ok(Self {
            name,
            dir,
            logs_dir,
            workdir_owners: DashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn config_path(&self, file: &str) -> PathBuf {
        self.dir.join("configs").join(file)
    }

    /// Rewrite a definition snapshot. The file keeps one owner for its
    /// lifetime: a rewrite under a different owner is refused.
    pub fn write_snapshot(
        &self,
        file: &str,
        owner: &str,
        records: &[serde_json::Value],
    ) -> Result<()> {
        let path = self.config_path(file);
        if let Some(existing) = self.snapshot_owner(&path)? {
            if existing != owner {
                return Err(Error::permission_denied(
                    path.display().to_string(),
                    owner,
                    format!("snapshot is owned by '{existing}'"),
                ));
            }
        }

        let mut out = String::new();
        for record in records {
            let line = OwnedRecord {
                owner: owner.to_string(),
                record: record.clone(),
            };
            out.push_str(&serde_json::to_string(&line)?);
            out.push('\n');
        }

        // Write-then-rename so a crashed rewrite never truncates the snapshot.
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, out)?;
        std::fs::rename(&tmp, &path)?;
        debug!(file, owner, records = records.len(), "snapshot rewritten");
        Ok(())
    }

    /// Read a definition snapshot. A missing file is an empty set.
    pub fn read_snapshot(&self, file: &str) -> Result<Vec<OwnedRecord>> {
        let path = self.config_path(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&path)?);
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: OwnedRecord =
                serde_json::from_str(&line).map_err(|e| Error::RestoreFailed {
                    path: path.display().to_string(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }

    /// An owner-scoped handle onto the workdir scratch area.
    pub fn scoped(&self, owner: impl Into<String>) -> WorkdirScope<'_> {
        WorkdirScope {
            workspace: self,
            owner: owner.into(),
        }
    }

    fn snapshot_owner(&self, path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(std::fs::File::open(path)?);
        match reader.lines().next() {
            Some(line) => {
                let line = line?;
                if line.trim().is_empty() {
                    return Ok(None);
                }
                let record: OwnedRecord =
                    serde_json::from_str(&line).map_err(|e| Error::RestoreFailed {
                        path: path.display().to_string(),
                        line: 1,
                        message: e.to_string(),
                    })?;
                Ok(Some(record.owner))
            }
            None => Ok(None),
        }
    }

    fn workdir(&self) -> PathBuf {
        self.dir.join("workdir")
    }

    fn resolve_workdir(&self, rel: &Path) -> Result<PathBuf> {
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::illegal_state(format!(
                "workdir path '{}' must be relative and must not escape the scope",
                rel.display()
            )));
        }
        Ok(self.workdir().join(rel))
    }
}

/// Owner-scoped view of the workdir. Reads are open to every principal;
/// create and write are bound to the scope's owner.
pub struct WorkdirScope<'a> {
    workspace: &'a Workspace,
    owner: String,
}

impl WorkdirScope<'_> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Create a new scratch file owned by this scope.
    pub fn create(&self, rel: impl AsRef<Path>, contents: &str) -> Result<()> {
        let rel = rel.as_ref();
        let path = self.workspace.resolve_workdir(rel)?;
        if self.workspace.workdir_owners.contains_key(rel) || path.exists() {
            return Err(Error::illegal_state(format!(
                "workdir file '{}' already exists",
                rel.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        self.workspace
            .workdir_owners
            .insert(rel.to_path_buf(), self.owner.clone());
        Ok(())
    }

    /// Overwrite a scratch file. Only its owner may write.
    pub fn write(&self, rel: impl AsRef<Path>, contents: &str) -> Result<()> {
        let rel = rel.as_ref();
        let path = self.workspace.resolve_workdir(rel)?;
        let owner = self
            .workspace
            .workdir_owners
            .get(rel)
            .map(|o| o.clone())
            .ok_or_else(|| Error::not_found(format!("workdir file '{}'", rel.display())))?;
        if owner != self.owner {
            return Err(Error::permission_denied(
                rel.display().to_string(),
                &self.owner,
                "WRITE",
            ));
        }
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Read a scratch file. Any principal may read.
    pub fn read(&self, rel: impl AsRef<Path>) -> Result<String> {
        let rel = rel.as_ref();
        let path = self.workspace.resolve_workdir(rel)?;
        if !path.exists() {
            return Err(Error::not_found(format!("workdir file '{}'", rel.display())));
        }
        Ok(std::fs::read_to_string(&path)?)
    }

    /// Owners of every tracked scratch file.
    pub fn list(&self) -> HashMap<PathBuf, String> {
        self.workspace
            .workdir_owners
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
