//! Built-in skill catalog.
//!
//! Mirrors the workbench's tool and command surface: file access, code
//! search, git, and the terminal bridge.

use sesh_core::types::RiskLevel;

use crate::skill::{Skill, SkillCategory};

/// The skills available at process start, in catalog order.
pub fn builtin_skills() -> Vec<Skill> {
    vec![
        Skill::new("file_read", "Read files", SkillCategory::FileSystem, RiskLevel::Safe)
            .with_description("Read file contents and browse directories")
            .with_tools([
                "read_file",
                "read_file_lines",
                "list_directory",
                "list_directory_recursive",
                "get_file_info",
                "path_exists",
            ]),
        Skill::new("file_write", "Write files", SkillCategory::FileSystem, RiskLevel::Moderate)
            .with_description("Create, overwrite, copy and move files")
            .with_tools(["write_file", "create_directory", "copy_file", "move_file"])
            .with_dependencies(["file_read"]),
        Skill::new(
            "file_delete",
            "Delete files",
            SkillCategory::FileSystem,
            RiskLevel::Dangerous,
        )
        .with_description("Remove files from the working tree")
        .with_tools(["delete_file"])
        .with_dependencies(["file_write"]),
        Skill::new("code_search", "Search code", SkillCategory::Search, RiskLevel::Safe)
            .with_description("Glob and regex search across the project")
            .with_tools(["search_files", "grep_files", "grep_files_with_context"])
            .with_dependencies(["file_read"]),
        Skill::new("git_read", "Inspect git", SkillCategory::Git, RiskLevel::Safe)
            .with_description("Status, diffs, history and branches")
            .with_tools([
                "git_status",
                "git_diff",
                "git_diff_file",
                "git_log",
                "git_branches",
                "git_show_file",
            ]),
        Skill::new("git_write", "Change git state", SkillCategory::Git, RiskLevel::Moderate)
            .with_description("Stage, commit, branch and discard local changes")
            .with_tools([
                "git_stage",
                "git_unstage",
                "git_stage_all",
                "git_commit",
                "git_checkout",
                "git_create_branch",
                "git_init",
                "git_discard",
            ])
            .with_dependencies(["git_read"]),
        Skill::new("git_remote", "Sync with remotes", SkillCategory::Git, RiskLevel::Dangerous)
            .with_description("Fetch, pull and push")
            .with_tools(["git_fetch", "git_pull", "git_push"])
            .with_dependencies(["git_write"]),
        Skill::new("terminal", "Run commands", SkillCategory::Terminal, RiskLevel::Dangerous)
            .with_description("Execute shell commands in the project directory")
            .with_tools(["execute_command", "execute_shell"]),
    ]
}
