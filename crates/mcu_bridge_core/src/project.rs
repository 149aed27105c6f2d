//! Project scaffolding, file access, build invocation, and git shell-outs.
//! Stateless: no session state lives here.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::runner::{self, CommandRun};
use crate::tools::{self, Tool};
use crate::{BridgeError, Result};

const MAIN_C: &str = "#include <stdint.h>\n\
\n\
int main(void)\n\
{\n\
    for (;;) {\n\
        /* application loop */\n\
    }\n\
    return 0;\n\
}\n";

const MAKEFILE: &str = "TARGET ?= firmware\n\
CC ?= arm-none-eabi-gcc\n\
CFLAGS ?= -Wall -Os\n\
SRC := $(wildcard src/*.c)\n\
\n\
all: $(TARGET).elf\n\
\n\
$(TARGET).elf: $(SRC)\n\
\t$(CC) $(CFLAGS) -o $@ $(SRC)\n\
\n\
clean:\n\
\trm -f $(TARGET).elf\n\
\n\
.PHONY: all clean\n";

const CMAKELISTS: &str = "cmake_minimum_required(VERSION 3.16)\n\
project(firmware C)\n\
\n\
file(GLOB SOURCES src/*.c)\n\
add_executable(firmware ${SOURCES})\n";

const GITIGNORE: &str = "*.elf\n*.bin\n*.o\nbuild/\n";

/// Directories never reported by `file_list`.
const SKIPPED_DIRS: &[&str] = &[".git", "build", "Debug", "Release", ".settings"];

/// Scaffold a minimal buildable skeleton. Refuses a non-empty target
/// directory. Returns the relative paths written.
pub async fn create_project(template: &str, path: &Path) -> Result<Vec<String>> {
    let files: &[(&str, &str)] = match template.to_ascii_lowercase().as_str() {
        "make" | "makefile" => &[
            ("Makefile", MAKEFILE),
            ("src/main.c", MAIN_C),
            (".gitignore", GITIGNORE),
        ],
        "cmake" => &[
            ("CMakeLists.txt", CMAKELISTS),
            ("src/main.c", MAIN_C),
            (".gitignore", GITIGNORE),
        ],
        other => {
            return Err(BridgeError::invalid_argument(format!(
                "unknown project template '{other}' (expected make or cmake)"
            )))
        }
    };

    if path.is_file() {
        return Err(BridgeError::invalid_argument(format!(
            "target '{}' is a file, not a directory",
            path.display()
        )));
    }
    if path.exists() {
        let mut entries = tokio::fs::read_dir(path).await?;
        if entries.next_entry().await?.is_some() {
            return Err(BridgeError::invalid_argument(format!(
                "target directory '{}' is not empty",
                path.display()
            )));
        }
    }

    let mut written = Vec::with_capacity(files.len());
    for (relative, content) in files {
        let target = path.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        written.push((*relative).to_string());
    }

    tracing::info!(template, path = %path.display(), "project scaffold created");
    Ok(written)
}

/// List project files relative to `root`, skipping VCS and build output.
pub fn file_list(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(BridgeError::invalid_argument(format!(
            "'{}' is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || entry
                .file_name()
                .to_str()
                .map(|name| !SKIPPED_DIRS.contains(&name))
                .unwrap_or(true)
    });

    for entry in walker {
        let entry = entry.map_err(|e| BridgeError::Io(e.into()))?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            files.push(relative);
        }
    }

    files.sort();
    Ok(files)
}

pub async fn read_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write bytes, creating parent directories as needed. Returns the byte
/// count written.
pub async fn write_file(path: &Path, bytes: &[u8]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, bytes).await?;
    Ok(bytes.len())
}

/// `git add -A` then `git commit -m`; the add's failure short-circuits.
pub async fn git_commit(cwd: &Path, message: &str, output_limit: usize) -> Result<CommandRun> {
    let git = tools::resolve(Tool::Git).await?;

    let add = runner::run(
        "git",
        &git.path,
        &["add".to_string(), "-A".to_string()],
        Some(cwd),
        None,
        output_limit,
    )
    .await?;
    if !add.ok {
        return Ok(add);
    }

    runner::run(
        "git",
        &git.path,
        &[
            "commit".to_string(),
            "-m".to_string(),
            message.to_string(),
        ],
        Some(cwd),
        None,
        output_limit,
    )
    .await
}

pub async fn git_diff(cwd: &Path, output_limit: usize) -> Result<CommandRun> {
    let git = tools::resolve(Tool::Git).await?;
    runner::run(
        "git",
        &git.path,
        &["diff".to_string()],
        Some(cwd),
        None,
        output_limit,
    )
    .await
}

/// Build the project with `make` or the STM32CubeIDE headless builder.
pub async fn compile(
    tool: &str,
    target: Option<&str>,
    cwd: Option<&Path>,
    project: Option<&str>,
    output_limit: usize,
) -> Result<CommandRun> {
    match tool.to_ascii_lowercase().as_str() {
        "make" => {
            let resolution = tools::resolve(Tool::Make).await?;
            let args: Vec<String> = target.map(|t| vec![t.to_string()]).unwrap_or_default();
            runner::run(
                Tool::Make.default_name(),
                &resolution.path,
                &args,
                cwd,
                None,
                output_limit,
            )
            .await
        }
        "ide" => {
            let resolution = tools::resolve(Tool::CubeIde).await?;
            let workspace: PathBuf = match cwd {
                Some(path) => path.to_path_buf(),
                None => std::env::current_dir()?,
            };
            let args = vec![
                "--launcher.suppressErrors".to_string(),
                "-nosplash".to_string(),
                "-application".to_string(),
                "org.eclipse.cdt.managedbuilder.core.headlessbuild".to_string(),
                "-data".to_string(),
                workspace.display().to_string(),
                "-build".to_string(),
                project.unwrap_or("all").to_string(),
            ];
            runner::run(
                Tool::CubeIde.default_name(),
                &resolution.path,
                &args,
                cwd,
                None,
                output_limit,
            )
            .await
        }
        other => Err(BridgeError::invalid_argument(format!(
            "unknown build tool '{other}' (expected make or ide)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_LIMIT: usize = 64 * 1024;

    #[tokio::test]
    async fn test_create_make_project_writes_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blinky");

        let files = create_project("make", &root).await.unwrap();
        assert_eq!(files, vec!["Makefile", "src/main.c", ".gitignore"]);
        assert!(root.join("Makefile").is_file());
        assert!(root.join("src/main.c").is_file());

        let makefile = read_file(&root.join("Makefile")).await.unwrap();
        assert!(makefile.contains("arm-none-eabi-gcc"));
    }

    #[tokio::test]
    async fn test_create_project_refuses_nonempty_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("existing.txt"), b"x")
            .await
            .unwrap();

        let err = create_project("cmake", dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_create_project_rejects_a_file_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("firmware");
        tokio::fs::write(&target, b"not a directory").await.unwrap();

        let err = create_project("make", &target).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
        assert!(err.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn test_create_project_rejects_unknown_template() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_project("rust", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_file_list_skips_vcs_and_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir_all(root.join("src")).await.unwrap();
        tokio::fs::create_dir_all(root.join(".git")).await.unwrap();
        tokio::fs::create_dir_all(root.join("build")).await.unwrap();
        tokio::fs::write(root.join("src/main.c"), b"int main;").await.unwrap();
        tokio::fs::write(root.join(".git/config"), b"").await.unwrap();
        tokio::fs::write(root.join("build/out.elf"), b"").await.unwrap();
        tokio::fs::write(root.join("Makefile"), b"").await.unwrap();

        let files = file_list(root).unwrap();
        assert_eq!(files, vec!["Makefile", "src/main.c"]);
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/notes.txt");

        let written = write_file(&path, b"probe notes").await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(read_file(&path).await.unwrap(), "probe notes");
    }

    #[tokio::test]
    async fn test_compile_rejects_unknown_tool() {
        let err = compile("ninja", None, None, None, TEST_LIMIT)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_git_diff_in_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        let init = runner::run(
            "git",
            Path::new("git"),
            &["init".to_string(), "-q".to_string()],
            Some(dir.path()),
            None,
            TEST_LIMIT,
        )
        .await
        .expect("git init should run");
        assert!(init.ok);

        let diff = git_diff(dir.path(), TEST_LIMIT).await.unwrap();
        assert!(diff.ok);
        assert!(diff.stdout.is_empty());
    }
}
