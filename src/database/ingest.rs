//! Record ingestion and post-processing.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;

use super::{BuildDatabase, DatabaseError, ObjectFileInfo, TargetInfo};
use crate::command::{CompileCommand, LinkCommand};
use crate::paths;
use crate::record::{CompileEntry, LinkEntry};

/// Tool names whose link-record entries are bookkeeping, not link steps.
const SKIPPED_LINK_TOOLS: &[&str] = &["ranlib", "cmake"];

/// Absolutize every file-shaped token against the entry directory.
fn absolutize_file_args(argv: Vec<String>, directory: &Utf8Path) -> Vec<String> {
    argv.into_iter()
        .map(|token| {
            if paths::looks_like_file(&token) {
                paths::absolutize(Utf8Path::new(&token), directory).into_string()
            } else {
                token
            }
        })
        .collect()
}

pub(super) fn ingest_compile_entries(
    db: &mut BuildDatabase,
    entries: Vec<CompileEntry>,
) -> Result<(), DatabaseError> {
    for entry in entries {
        let directory = paths::normalize(&entry.directory);
        let source = paths::absolutize(&entry.file, &directory);
        let argv = absolutize_file_args(entry.argv()?, &directory);
        let mut command = CompileCommand::new(argv, directory, source.clone())?;
        command.remove_werror();
        let output = command.output().to_path_buf();

        if let Some(existing) = db.objects.get(&output) {
            if existing.source == source {
                tracing::debug!(%output, %source, "ignoring duplicate compile command");
                continue;
            }
            // Two sources compiled straight into one artifact: the output is
            // really a link unit built directly from sources.
            let first = db
                .objects
                .shift_remove(&output)
                .ok_or_else(|| DatabaseError::UnknownUnit {
                    path: output.clone(),
                })?;
            remove_source_output(db, &first.source, &output);
            attach_to_direct_target(db, &output, first.command, first.source);
            attach_to_direct_target(db, &output, command, source);
            continue;
        }
        if db.targets.contains_key(&output) {
            // Third and later producers join the synthesized target.
            attach_to_direct_target(db, &output, command, source);
            continue;
        }
        insert_object(db, output, source, command);
    }
    Ok(())
}

fn insert_object(
    db: &mut BuildDatabase,
    output: Utf8PathBuf,
    source: Utf8PathBuf,
    command: CompileCommand,
) {
    let unit_dir = db
        .project
        .out_path(&source)
        .parent()
        .map_or_else(|| db.project.out_dir.clone(), Utf8Path::to_path_buf);
    db.sources
        .entry(source.clone())
        .or_default()
        .push(output.clone());
    db.objects.insert(
        output.clone(),
        ObjectFileInfo {
            command,
            source,
            output,
            unit_dir,
        },
    );
}

fn remove_source_output(db: &mut BuildDatabase, source: &Utf8Path, output: &Utf8Path) {
    if let Some(outputs) = db.sources.get_mut(source) {
        outputs.retain(|o| o != output);
    }
}

/// Redirect one producer of a contested output to a unique object name and
/// fold it into the synthesized link unit at the original path.
fn attach_to_direct_target(
    db: &mut BuildDatabase,
    target_output: &Utf8Path,
    mut command: CompileCommand,
    source: Utf8PathBuf,
) {
    let object = paths::temporary_object_path(target_output, &source);
    tracing::debug!(
        target = %target_output,
        %source,
        %object,
        "redirecting colliding compile output to synthesized link unit"
    );
    command.set_output(&object);
    insert_object(db, object.clone(), source, command);
    db.link_units
        .entry(object.clone())
        .or_insert_with(|| target_output.to_path_buf());
    db.object_parents
        .entry(object.clone())
        .or_default()
        .push(target_output.to_path_buf());

    let directory = db
        .objects
        .get(&object)
        .map_or_else(|| db.project.project_dir.clone(), |info| {
            info.command.directory().to_path_buf()
        });
    let target = db
        .targets
        .entry(target_output.to_path_buf())
        .or_insert_with(|| TargetInfo {
            output: target_output.to_path_buf(),
            commands: Vec::new(),
            files: IndexSet::new(),
            installed: IndexSet::new(),
            parents: Vec::new(),
        });
    target.files.insert(object);
    // Rebuild the one synthesized command from the accumulated file set.
    let mut argv = vec![
        "cc".to_string(),
        "-o".to_string(),
        target_output.to_string(),
    ];
    argv.extend(target.files.iter().map(ToString::to_string));
    if let Ok(link) = LinkCommand::new(argv, directory) {
        target.commands = vec![link];
    }
}

/// Merge two-token flag/argument pairs (`-L dir`, `-l name`) into single
/// tokens, absolutizing search directories.
fn merge_flag_pairs(argv: Vec<String>, directory: &Utf8Path) -> Vec<String> {
    let mut merged = Vec::with_capacity(argv.len());
    let mut iter = argv.into_iter().peekable();
    while let Some(token) = iter.next() {
        match token.as_str() {
            "-L" => {
                if let Some(dir) = iter.next() {
                    let absolute = paths::absolutize(Utf8Path::new(&dir), directory);
                    merged.push(format!("-L{absolute}"));
                }
            }
            "-l" => {
                if let Some(name) = iter.next() {
                    merged.push(format!("-l{name}"));
                }
            }
            _ => merged.push(token),
        }
    }
    merged
}

fn link_tool_is_skipped(argv: &[String]) -> bool {
    argv.first().is_some_and(|tool| {
        Utf8Path::new(tool).file_name().is_some_and(|name| {
            SKIPPED_LINK_TOOLS
                .iter()
                .any(|skipped| name.contains(skipped))
        })
    })
}

pub(super) fn ingest_link_entries(
    db: &mut BuildDatabase,
    entries: Vec<LinkEntry>,
) -> Result<(), DatabaseError> {
    for entry in entries {
        let directory = paths::normalize(&entry.directory);
        let argv = entry.argv()?;
        if link_tool_is_skipped(&argv) {
            tracing::debug!(tool = ?argv.first(), "skipping bookkeeping link entry");
            continue;
        }
        let argv = absolutize_file_args(merge_flag_pairs(argv, &directory), &directory);
        let command = LinkCommand::new(argv, directory.clone())?;
        let output = command.output().to_path_buf();

        let mut files: IndexSet<Utf8PathBuf> = entry
            .files
            .iter()
            .map(|file| paths::absolutize(file, &directory))
            .collect();
        if files.is_empty() {
            files = command
                .args()
                .skip(1)
                .filter(|token| paths::looks_like_file(token))
                .map(Utf8PathBuf::from)
                .filter(|path| {
                    *path != output
                        && (paths::is_object_file(path)
                            || paths::is_library(path)
                            || paths::is_source_file(path))
                })
                .collect();
        }

        for file in &files {
            if db.targets.contains_key(file) || !paths::is_object_file(file) {
                continue;
            }
            if db.objects.contains_key(file) {
                db.link_units
                    .entry(file.clone())
                    .or_insert_with(|| output.clone());
                db.object_parents
                    .entry(file.clone())
                    .or_default()
                    .push(output.clone());
            } else {
                return Err(DatabaseError::MissingObjectCommand {
                    object: file.clone(),
                    target: output,
                });
            }
        }

        if let Some(target) = db.targets.get_mut(&output) {
            tracing::warn!(%output, "duplicate link command for one output; first stays authoritative");
            target.commands.push(command);
            target.files.extend(files);
        } else {
            db.targets.insert(
                output.clone(),
                TargetInfo {
                    output,
                    commands: vec![command],
                    files,
                    installed: IndexSet::new(),
                    parents: Vec::new(),
                },
            );
        }
    }
    Ok(())
}

/// Partition each target's file set into project-owned vs. installed by
/// membership in the object and target maps.
pub(super) fn partition_installed(db: &mut BuildDatabase) {
    let installed: Vec<(Utf8PathBuf, IndexSet<Utf8PathBuf>)> = db
        .targets
        .iter()
        .map(|(output, target)| {
            let set = target
                .files
                .iter()
                .filter(|file| {
                    !db.objects.contains_key(*file)
                        && !db.targets.contains_key(*file)
                        && !db.sources.contains_key(*file)
                })
                .cloned()
                .collect();
            (output.clone(), set)
        })
        .collect();
    for (output, set) in installed {
        if let Some(target) = db.targets.get_mut(&output) {
            target.installed = set;
        }
    }
}

/// Resolve `-lname` arguments against each consuming command's own search
/// directories, rewriting matches to the concrete file on disk.
pub(super) fn resolve_shared_libraries(db: &mut BuildDatabase) {
    let outputs: Vec<Utf8PathBuf> = db.targets.keys().cloned().collect();
    for output in outputs {
        let Some(target) = db.targets.get(&output) else {
            continue;
        };
        let mut rewrites: Vec<(usize, String, Utf8PathBuf)> = Vec::new();
        for (index, command) in target.commands.iter().enumerate() {
            let mut search_dirs: Vec<Utf8PathBuf> = command
                .args()
                .filter_map(|arg| {
                    arg.strip_prefix("-L")
                        .filter(|dir| !dir.is_empty())
                        .or_else(|| arg.strip_prefix("-Wl,-rpath,"))
                        .map(Utf8PathBuf::from)
                })
                .collect();
            search_dirs.push(command.directory().to_path_buf());
            for arg in command.args() {
                let Some(name) = arg.strip_prefix("-l").filter(|n| !n.is_empty()) else {
                    continue;
                };
                let resolved = search_dirs.iter().find_map(|dir| {
                    ["so", "a"]
                        .iter()
                        .map(|ext| dir.join(format!("lib{name}.{ext}")))
                        .find(|candidate| candidate.as_std_path().exists())
                });
                match resolved {
                    Some(path) => rewrites.push((index, arg.to_string(), path)),
                    None => tracing::debug!(library = name, target = %output, "library not found on any search path"),
                }
            }
        }
        let classified: Vec<(usize, String, Utf8PathBuf, bool)> = rewrites
            .into_iter()
            .map(|(index, from, to)| {
                let project_owned = db.targets.contains_key(&to);
                (index, from, to, project_owned)
            })
            .collect();
        if let Some(target) = db.targets.get_mut(&output) {
            for (index, from, to, project_owned) in classified {
                if let Some(command) = target.commands.get_mut(index) {
                    command.replace_argument(Utf8Path::new(&from), &to);
                }
                target.files.insert(to.clone());
                // Resolution runs after the installed partition; a library
                // the project does not build itself joins it here.
                if !project_owned {
                    target.installed.insert(to.clone());
                }
                tracing::debug!(from, to = %to, target = %output, "resolved library argument");
            }
        }
    }
}

/// Compute each library's consuming link units by scanning all file sets.
pub(super) fn fill_parents(db: &mut BuildDatabase) -> Result<(), DatabaseError> {
    let mut edges: Vec<(Utf8PathBuf, Utf8PathBuf)> = Vec::new();
    for (output, target) in &db.targets {
        for file in &target.files {
            if file == output || target.installed.contains(file) {
                continue;
            }
            if db.targets.contains_key(file) {
                edges.push((file.clone(), output.clone()));
            } else if paths::is_library(file) {
                return Err(DatabaseError::MissingLibraryCommand {
                    library: file.clone(),
                    target: output.clone(),
                });
            }
        }
    }
    for (child, parent) in edges {
        if let Some(target) = db.targets.get_mut(&child) {
            target.parents.push(parent);
        }
    }
    Ok(())
}
