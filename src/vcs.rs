use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Output;

use owo_colors::OwoColorize;
use tokio::process::Command;

use crate::error::{INFO, Log, Res, ResErr, ResExt, WARN};

pub fn commit_message(new: usize, updated: usize) -> String {
    if new == 0 && updated == 0 {
        String::from("Update game list: Minor changes.")
    } else {
        format!("Update game list: {} new, {} updated games.", new, updated)
    }
}

/// Stages `files`, then commits and pushes when any of them changed. Other dirty or
/// staged paths in the worktree are left alone. Best-effort: every git failure becomes
/// a warning and `Ok(false)`.
pub async fn publish_to_git(files: &[PathBuf], message: &str) -> Res<bool> {
    if files.is_empty() {
        String::from("Nothing was published, skipping git")
            .log(INFO)
            .await?;
        return Ok(false);
    }

    if git(&with_paths(&["add"], files)).await.log(WARN).await?.is_none() {
        return Ok(false);
    }

    let staged = staged_changes(&with_paths(&["diff", "--cached", "--quiet"], files))
        .await
        .log(WARN)
        .await?;

    match staged {
        None => return Ok(false),
        Some(false) => {
            String::from("No changes to commit").log(INFO).await?;
            return Ok(false);
        }
        Some(true) => {}
    }

    let commit = with_paths(&["commit", "-m", message], files);

    if git(&commit).await.log(WARN).await?.is_none() {
        return Ok(false);
    }

    if git(&["push"]).await.log(WARN).await?.is_none() {
        return Ok(false);
    }

    format!("Pushed commit: {}", message.green()).log(INFO).await?;

    Ok(true)
}

/// `args`, then `--`, then `files` as pathspecs.
fn with_paths<'a>(args: &[&'a str], files: &'a [PathBuf]) -> Vec<&'a OsStr> {
    args.iter()
        .copied()
        .map(OsStr::new)
        .chain(std::iter::once(OsStr::new("--")))
        .chain(files.iter().map(|file| file.as_os_str()))
        .collect()
}

/// `git diff --quiet` exits 1 when there are differences and 0 when there are none.
fn diff_exit_changed(code: Option<i32>) -> Option<bool> {
    match code {
        Some(0) => Some(false),
        Some(1) => Some(true),
        _ => None,
    }
}

async fn staged_changes(args: &[&OsStr]) -> Res<bool> {
    let output = run_git(args).await?;

    diff_exit_changed(output.status.code())
        .ok_or_else(|| git_failure(&printable(args), &output))
}

async fn git<S: AsRef<OsStr>>(args: &[S]) -> Res<String> {
    let output = run_git(args).await?;

    if !output.status.success() {
        return Err(git_failure(&printable(args), &output));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn run_git<S: AsRef<OsStr>>(args: &[S]) -> Res<Output> {
    Command::new("git")
        .args(args)
        .output()
        .await
        .with_context(format_args!(
            "Failed to run: {}",
            format!("git {}", printable(args)).yellow()
        ))
}

fn printable<S: AsRef<OsStr>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| arg.as_ref().to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn git_failure(printable: &str, output: &Output) -> ResErr {
    ResErr::new(
        "Git command failed",
        format!(
            "git {} exited with {}: {}",
            printable,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    )
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{commit_message, diff_exit_changed, printable, publish_to_git, with_paths};
    use crate::error::Res;

    #[test]
    fn test_commit_message() {
        assert_eq!(
            commit_message(3, 1),
            "Update game list: 3 new, 1 updated games."
        );
        assert_eq!(commit_message(0, 0), "Update game list: Minor changes.");
    }

    #[test]
    fn test_git_steps_are_limited_to_published_files() {
        let files = [
            PathBuf::from("hydrasteam.json"),
            PathBuf::from("out/hydrasteam_broad.json"),
        ];

        assert_eq!(
            printable(&with_paths(&["diff", "--cached", "--quiet"], &files)),
            "diff --cached --quiet -- hydrasteam.json out/hydrasteam_broad.json"
        );
        assert_eq!(
            printable(&with_paths(&["commit", "-m", "Update game list"], &files[..1])),
            "commit -m Update game list -- hydrasteam.json"
        );
    }

    #[test]
    fn test_diff_exit_codes() {
        assert_eq!(diff_exit_changed(Some(0)), Some(false));
        assert_eq!(diff_exit_changed(Some(1)), Some(true));
        assert_eq!(diff_exit_changed(Some(128)), None);
        assert_eq!(diff_exit_changed(None), None);
    }

    #[tokio::test]
    async fn test_no_files_skips_git() -> Res<()> {
        assert!(!publish_to_git(&[], "message").await?);

        Ok(())
    }
}
