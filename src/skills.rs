// src/skills.rs

//! Installation of the agent-facing skill prompt bundle.
//!
//! The bundle teaches an agent session how task worktrees are laid out
//! and what the runner expects of it. It lives where coding agents
//! discover skills (`.claude/skills/<name>/SKILL.md`).

use std::path::Path;

use tracing::info;

use crate::errors::{AgentDagError, Result};

const SKILL_DIR: &str = ".claude/skills/agentdag";

const SKILL_MD: &str = r#"---
name: agentdag
description: Working inside an agentdag task worktree
---

# Working inside an agentdag task worktree

You are running inside an isolated git worktree created for exactly one
task of a larger plan.

- `tasks.toml` in the worktree root is a read-only copy of the plan; it
  exists for context. Never edit it and never mark tasks completed —
  the runner does that after your branch merges.
- Implement only the task named in your instructions. Unrelated
  improvements belong in their own task.
- Commit with git as you work and leave the working tree clean. A task
  that produces no commits is treated as failed.
- Append a short note of what you did to `progress.txt`; the runner
  collects it into the task report.
- Your branch is merged into the integration branch automatically. If
  your task carries merge notes, they are shown to the agent that
  resolves any merge conflict.
"#;

/// Write the skill bundle into the repository.
///
/// Refuses to overwrite a modified bundle unless `force` is set; an
/// unmodified bundle is rewritten silently (idempotent).
pub fn init_skills(repo_root: &Path, force: bool) -> Result<()> {
    let dir = repo_root.join(SKILL_DIR);
    let path = dir.join("SKILL.md");

    if path.exists() && !force {
        let existing = std::fs::read_to_string(&path)?;
        if existing != SKILL_MD {
            return Err(AgentDagError::Precondition(format!(
                "{} exists with local modifications; pass --force to overwrite",
                path.display()
            )));
        }
    }

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&path, SKILL_MD)?;
    info!(path = %path.display(), "installed skill bundle");
    println!("installed {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        init_skills(dir.path(), false).unwrap();
        init_skills(dir.path(), false).unwrap();
        assert!(dir.path().join(SKILL_DIR).join("SKILL.md").exists());
    }

    #[test]
    fn refuses_to_clobber_local_changes_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_skills(dir.path(), false).unwrap();
        let path = dir.path().join(SKILL_DIR).join("SKILL.md");
        std::fs::write(&path, "locally changed").unwrap();

        assert!(init_skills(dir.path(), false).is_err());
        init_skills(dir.path(), true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SKILL_MD);
    }
}
