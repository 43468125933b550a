//! Graph queries over the constructed database.
//!
//! All recursive walks carry an in-progress set and fail fast with
//! [`DatabaseError::DependencyCycle`] instead of recursing indefinitely.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;

use super::{BuildDatabase, DatabaseError, ObjectFileInfo, TargetInfo};

impl BuildDatabase {
    /// Resolve an object output path to its compilation unit.
    #[must_use]
    pub fn object_info(&self, output: &Utf8Path) -> Option<&ObjectFileInfo> {
        self.objects.get(output)
    }

    /// Resolve a source path to its authoritative (first-recorded)
    /// compilation unit.
    #[must_use]
    pub fn source_info(&self, source: &Utf8Path) -> Option<&ObjectFileInfo> {
        self.sources
            .get(source)
            .and_then(|outputs| outputs.first())
            .and_then(|output| self.objects.get(output))
    }

    /// Resolve a source or object path to its compilation unit.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::UnknownUnit`] when the path matches neither
    /// map.
    pub fn unit_info(&self, path: &Utf8Path) -> Result<&ObjectFileInfo, DatabaseError> {
        self.object_info(path)
            .or_else(|| self.source_info(path))
            .ok_or_else(|| DatabaseError::UnknownUnit {
                path: path.to_path_buf(),
            })
    }

    /// Whether `path` names a known link unit.
    #[must_use]
    pub fn has_target(&self, path: &Utf8Path) -> bool {
        self.targets.contains_key(path)
    }

    /// Resolve a link-unit path to its target.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::UnknownTarget`] for unknown paths.
    pub fn target_info(&self, path: &Utf8Path) -> Result<&TargetInfo, DatabaseError> {
        self.targets
            .get(path)
            .ok_or_else(|| DatabaseError::UnknownTarget {
                path: path.to_path_buf(),
            })
    }

    /// All link units, in record order.
    pub fn all_targets(&self) -> impl Iterator<Item = &TargetInfo> {
        self.targets.values()
    }

    /// Link units nothing else consumes as a library, in record order.
    pub fn root_targets(&self) -> impl Iterator<Item = &TargetInfo> {
        self.targets.values().filter(|target| target.is_root())
    }

    /// All recorded source files, in record order.
    pub fn source_files(&self) -> impl Iterator<Item = &Utf8Path> {
        self.sources.keys().map(Utf8PathBuf::as_path)
    }

    /// Whether `output` is the first object recorded for its source.
    /// Later duplicates are tolerated but never drive linking.
    #[must_use]
    pub fn is_first_object_for_source(&self, output: &Utf8Path) -> bool {
        self.objects.get(output).is_some_and(|info| {
            self.sources
                .get(&info.source)
                .and_then(|outputs| outputs.first())
                .is_some_and(|first| first == output)
        })
    }

    /// Every object file transitively reachable from `target`, skipping
    /// installed files.
    ///
    /// # Errors
    ///
    /// Fails on unknown targets and on dependency cycles.
    pub fn archive_object_files(
        &self,
        target: &Utf8Path,
    ) -> Result<IndexSet<Utf8PathBuf>, DatabaseError> {
        let mut objects = IndexSet::new();
        let mut in_progress = IndexSet::new();
        self.collect_objects(target, &mut objects, &mut in_progress)?;
        Ok(objects)
    }

    fn collect_objects(
        &self,
        target: &Utf8Path,
        objects: &mut IndexSet<Utf8PathBuf>,
        in_progress: &mut IndexSet<Utf8PathBuf>,
    ) -> Result<(), DatabaseError> {
        if !in_progress.insert(target.to_path_buf()) {
            return Err(DatabaseError::DependencyCycle {
                unit: target.to_path_buf(),
            });
        }
        let info = self.target_info(target)?;
        for file in &info.files {
            if info.installed.contains(file) {
                continue;
            }
            if self.targets.contains_key(file) {
                self.collect_objects(file, objects, in_progress)?;
            } else if self.objects.contains_key(file) {
                objects.insert(file.clone());
            } else if let Some(outputs) = self.sources.get(file) {
                // A source listed directly stands for its first object.
                if let Some(first) = outputs.first() {
                    objects.insert(first.clone());
                }
            }
        }
        in_progress.shift_remove(target);
        Ok(())
    }

    /// Every link unit transitively reachable from `target`, including
    /// itself, depth-first.
    ///
    /// # Errors
    ///
    /// Fails on unknown targets and on dependency cycles.
    pub fn archive_target_files(
        &self,
        target: &Utf8Path,
    ) -> Result<IndexSet<Utf8PathBuf>, DatabaseError> {
        let mut collected = IndexSet::new();
        let mut in_progress = IndexSet::new();
        self.collect_targets(target, &mut collected, &mut in_progress)?;
        Ok(collected)
    }

    fn collect_targets(
        &self,
        target: &Utf8Path,
        collected: &mut IndexSet<Utf8PathBuf>,
        in_progress: &mut IndexSet<Utf8PathBuf>,
    ) -> Result<(), DatabaseError> {
        if !in_progress.insert(target.to_path_buf()) {
            return Err(DatabaseError::DependencyCycle {
                unit: target.to_path_buf(),
            });
        }
        let info = self.target_info(target)?;
        collected.insert(target.to_path_buf());
        for file in &info.files {
            if self.targets.contains_key(file) && !collected.contains(file) {
                self.collect_targets(file, collected, in_progress)?;
            }
        }
        in_progress.shift_remove(target);
        Ok(())
    }

    /// Source files covered by `target`'s transitive object set.
    ///
    /// # Errors
    ///
    /// Fails on unknown targets and on dependency cycles.
    pub fn source_files_for_target(
        &self,
        target: &Utf8Path,
    ) -> Result<IndexSet<Utf8PathBuf>, DatabaseError> {
        Ok(self
            .archive_object_files(target)?
            .iter()
            .filter_map(|object| self.objects.get(object))
            .map(|info| info.source.clone())
            .collect())
    }

    /// Number of source files transitively covered by `target`.
    ///
    /// # Errors
    ///
    /// Fails on unknown targets and on dependency cycles.
    pub fn transitive_source_count(&self, target: &Utf8Path) -> Result<usize, DatabaseError> {
        Ok(self.source_files_for_target(target)?.len())
    }

    /// Walk link-unit parents upward from `source`'s object until a root.
    ///
    /// When a unit has several parents the walk ascends to the one covering
    /// the most transitive sources; ties break by record order. This is a
    /// deliberate, deterministic policy, not a semantic property of the
    /// build graph.
    ///
    /// # Errors
    ///
    /// Fails when the source is unknown, its object is never linked, or the
    /// parent chain is cyclic.
    pub fn root_for_source(&self, source: &Utf8Path) -> Result<Utf8PathBuf, DatabaseError> {
        let object = self.unit_info(source)?.output.clone();
        let mut current = self
            .link_units
            .get(&object)
            .cloned()
            .ok_or(DatabaseError::UnlinkedObject { object })?;
        let mut seen = IndexSet::new();
        loop {
            if !seen.insert(current.clone()) {
                return Err(DatabaseError::DependencyCycle { unit: current });
            }
            let info = self.target_info(&current)?;
            let Some(first_parent) = info.parents.first() else {
                return Ok(current);
            };
            let mut best = first_parent.clone();
            let mut best_count = self.transitive_source_count(&best)?;
            for parent in info.parents.iter().skip(1) {
                let count = self.transitive_source_count(parent)?;
                if count > best_count {
                    best = parent.clone();
                    best_count = count;
                }
            }
            current = best;
        }
    }

    /// Every root target transitively containing `source`, in record order.
    ///
    /// # Errors
    ///
    /// Fails on dependency cycles while scanning roots.
    pub fn root_targets_for_source(
        &self,
        source: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, DatabaseError> {
        let mut roots = Vec::new();
        for target in self.root_targets() {
            if self.source_files_for_target(&target.output)?.contains(source) {
                roots.push(target.output.clone());
            }
        }
        Ok(roots)
    }

    /// Ordered candidate targets for linking `source`: roots transitively
    /// containing it, then units directly referencing its first object.
    ///
    /// # Errors
    ///
    /// Fails when the source is unknown or a walk hits a cycle.
    pub fn candidate_targets(&self, source: &Utf8Path) -> Result<Vec<Utf8PathBuf>, DatabaseError> {
        let object = self.unit_info(source)?.output.clone();
        let mut candidates: IndexSet<Utf8PathBuf> =
            self.root_targets_for_source(source)?.into_iter().collect();
        if let Some(direct) = self.object_parents.get(&object) {
            candidates.extend(direct.iter().cloned());
        }
        Ok(candidates.into_iter().collect())
    }

    /// The root target covering the most source files.
    ///
    /// # Errors
    ///
    /// Fails on dependency cycles while measuring roots.
    pub fn priority_target(&self) -> Result<Option<Utf8PathBuf>, DatabaseError> {
        let mut best: Option<(Utf8PathBuf, usize)> = None;
        for target in self.root_targets() {
            let count = self.transitive_source_count(&target.output)?;
            let better = best.as_ref().is_none_or(|(_, best_count)| count > *best_count);
            if better {
                best = Some((target.output.clone(), count));
            }
        }
        Ok(best.map(|(output, _)| output))
    }

    /// Whether `path` names a file this project compiles or produces.
    #[must_use]
    pub fn is_project_file(&self, path: &Utf8Path) -> bool {
        self.objects.contains_key(path)
            || self.targets.contains_key(path)
            || self.sources.contains_key(path)
    }
}
