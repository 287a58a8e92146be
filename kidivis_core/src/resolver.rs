//! Selection of the design files and the OLD/NEW revisions to compare.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::repository::{join_relative, relative_to, VersionControl};
use crate::schematic::sheet_refs;
use crate::{DesignFile, DesignKind, Error, Result, Revision, RevisionPair};

const PROJECT_EXTENSION: &str = "kicad_pro";

/// How many touching commits the default resolution needs.
const DEFAULT_HISTORY_DEPTH: usize = 2;

/// What the caller asked to compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveInput {
    /// A project directory, or explicit `.kicad_pro`/`.kicad_pcb`/`.kicad_sch`
    /// files sharing one directory.
    pub targets: Vec<PathBuf>,
    /// Explicit OLD revision name.
    pub old: Option<String>,
    /// Explicit NEW revision name.
    pub new: Option<String>,
    /// Keep design files that did not change between OLD and NEW.
    pub include_unchanged: bool,
}

impl ResolveInput {
    /// Compare `targets` using the default revisions.
    #[must_use]
    pub fn new<I, P>(targets: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            old: None,
            new: None,
            include_unchanged: true,
        }
    }

    /// Override the OLD revision.
    #[must_use]
    pub fn with_old(mut self, name: impl Into<String>) -> Self {
        self.old = Some(name.into());
        self
    }

    /// Override the NEW revision.
    #[must_use]
    pub fn with_new(mut self, name: impl Into<String>) -> Self {
        self.new = Some(name.into());
        self
    }

    /// Set whether unchanged design files stay in the request.
    #[must_use]
    pub const fn with_include_unchanged(mut self, include: bool) -> Self {
        self.include_unchanged = include;
        self
    }
}

/// A fully resolved comparison: one revision pair and the files to diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRequest {
    /// Revisions being compared.
    pub revisions: RevisionPair,
    /// Design files in output order.
    pub files: Vec<DesignFile>,
}

/// Outcome of resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// At least one design file differs; ready to render.
    Ready(ComparisonRequest),
    /// No PCB or schematic differs between the revisions.
    NoRelevantChanges {
        /// Revisions that were resolved.
        revisions: RevisionPair,
    },
}

impl Resolution {
    /// Revisions chosen by the resolver.
    #[must_use]
    pub const fn revisions(&self) -> &RevisionPair {
        match self {
            Self::Ready(request) => &request.revisions,
            Self::NoRelevantChanges { revisions } => revisions,
        }
    }
}

/// Root design files named by the targets, as repository-relative paths.
#[derive(Debug, Default)]
struct Targets {
    project: Option<String>,
    pcb: Option<String>,
    schematic: Option<String>,
}

impl Targets {
    fn roots(&self) -> Vec<DesignFile> {
        let pcb = self.pcb.iter().map(|path| DesignFile::new(path.clone(), DesignKind::Pcb));
        let sch = self
            .schematic
            .iter()
            .map(|path| DesignFile::new(path.clone(), DesignKind::Schematic));
        pcb.chain(sch).collect()
    }
}

/// Maps user targets and revision names onto a [`ComparisonRequest`].
pub struct RevisionResolver<'a> {
    source: &'a dyn VersionControl,
}

impl<'a> RevisionResolver<'a> {
    /// Create a resolver reading from `source`.
    #[must_use]
    pub fn new(source: &'a dyn VersionControl) -> Self {
        Self { source }
    }

    /// Resolve targets and revisions.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for unusable targets.
    /// - [`Error::UnknownRevision`] for names that do not resolve.
    /// - [`Error::MissingHistory`] when no default revision can be derived.
    pub fn resolve(&self, input: &ResolveInput) -> Result<Resolution> {
        let targets = self.targets(&input.targets)?;
        let roots = targets.roots();
        let revisions = self.revisions(input, &targets, &roots)?;

        let mut files = Vec::new();
        for file in roots {
            if self.exists_anywhere(&revisions, &file.path)? {
                files.push(file);
            }
        }
        if let Some(root) = files.iter().find(|file| file.kind == DesignKind::Schematic) {
            let sheets = self.sheets(&[&revisions.old, &revisions.new], &root.path)?;
            files.extend(sheets);
        }
        if files.is_empty() {
            return Err(Error::invalid_input(
                "no .kicad_pcb or .kicad_sch exists for the given targets",
            ));
        }

        let changed = self.source.list_changed_paths(&revisions.old, &revisions.new)?;
        let relevant = files.iter().filter(|file| changed.contains(&file.path)).count();
        tracing::info!(
            old = %revisions.old.short_label(),
            new = %revisions.new.short_label(),
            files = files.len(),
            changed = relevant,
            "resolved comparison"
        );
        if relevant == 0 {
            return Ok(Resolution::NoRelevantChanges { revisions });
        }
        if !input.include_unchanged {
            files.retain(|file| changed.contains(&file.path));
        }
        Ok(Resolution::Ready(ComparisonRequest { revisions, files }))
    }

    fn targets(&self, paths: &[PathBuf]) -> Result<Targets> {
        let Some(first) = paths.first() else {
            return Err(Error::invalid_input("no targets given"));
        };
        if first.is_dir() {
            if paths.len() > 1 {
                return Err(Error::invalid_input(
                    "a project directory must be the only target",
                ));
            }
            let project = find_project(first)?;
            return self.targets(&[project]);
        }

        let mut targets = Targets::default();
        let mut directory: Option<String> = None;
        for path in paths {
            if path.is_dir() {
                return Err(Error::invalid_input(format!(
                    "{} is a directory; give either one directory or design files",
                    path.display()
                )));
            }
            let relative = relative_to(self.source.root(), path)?;
            let (dir, _) = split_dir(&relative);
            match &directory {
                Some(existing) if existing != dir => {
                    return Err(Error::invalid_input(format!(
                        "design files must share one directory, found {existing:?} and {dir:?}"
                    )));
                }
                Some(_) => {}
                None => directory = Some(dir.to_owned()),
            }

            let slot = match relative.rsplit_once('.').map(|(_, extension)| extension) {
                Some(PROJECT_EXTENSION) => &mut targets.project,
                Some(extension) if extension == DesignKind::Pcb.extension() => &mut targets.pcb,
                Some(extension) if extension == DesignKind::Schematic.extension() => {
                    &mut targets.schematic
                }
                _ => {
                    return Err(Error::invalid_input(format!(
                        "{} is not a .kicad_pro, .kicad_pcb or .kicad_sch file",
                        path.display()
                    )))
                }
            };
            if slot.is_some() {
                return Err(Error::invalid_input(format!(
                    "more than one file of the same type given: {}",
                    path.display()
                )));
            }
            *slot = Some(relative);
        }

        if let Some(project) = &targets.project {
            let stem = project
                .strip_suffix(PROJECT_EXTENSION)
                .unwrap_or(project.as_str());
            if targets.pcb.is_none() {
                targets.pcb = Some(format!("{stem}{}", DesignKind::Pcb.extension()));
            }
            if targets.schematic.is_none() {
                targets.schematic = Some(format!("{stem}{}", DesignKind::Schematic.extension()));
            }
        }
        Ok(targets)
    }

    fn revisions(
        &self,
        input: &ResolveInput,
        targets: &Targets,
        roots: &[DesignFile],
    ) -> Result<RevisionPair> {
        let mut history: Option<Vec<Revision>> = None;
        let mut touching = || -> Result<Vec<Revision>> {
            if let Some(found) = &history {
                return Ok(found.clone());
            }
            let watched = self.watched_paths(targets, roots)?;
            let found = self.source.touching_commits(&watched, DEFAULT_HISTORY_DEPTH)?;
            history = Some(found.clone());
            Ok(found)
        };

        let new = match &input.new {
            Some(name) => self.source.resolve_ref(name)?,
            None => touching()?.into_iter().next().ok_or_else(|| Error::MissingHistory {
                message: "no commit touches the design files".to_owned(),
            })?,
        };

        let old = match &input.old {
            Some(name) => self.source.resolve_ref(name)?,
            None if input.new.is_some() => self.parent_of(&new)?,
            None => match touching()?.into_iter().nth(1) {
                Some(previous) => previous,
                None => self.parent_of(&new)?,
            },
        };
        Ok(RevisionPair { old, new })
    }

    fn parent_of(&self, revision: &Revision) -> Result<Revision> {
        self.source
            .first_parent(revision)?
            .ok_or_else(|| Error::MissingHistory {
                message: format!("{} has no parent to compare against", revision.short_label()),
            })
    }

    /// Paths whose history selects the default revisions: the root design
    /// files, the project file, and the sheets referenced at `HEAD`.
    fn watched_paths(&self, targets: &Targets, roots: &[DesignFile]) -> Result<Vec<String>> {
        let mut watched: Vec<String> = roots.iter().map(|file| file.path.clone()).collect();
        watched.extend(targets.project.iter().cloned());
        if let (Some(schematic), Ok(head)) = (&targets.schematic, self.source.resolve_ref("HEAD")) {
            for sheet in self.sheets(&[&head], schematic)? {
                watched.push(sheet.path);
            }
        }
        Ok(watched)
    }

    fn exists_anywhere(&self, revisions: &RevisionPair, path: &str) -> Result<bool> {
        if self.source.root().join(path).is_file() {
            return Ok(true);
        }
        for revision in [&revisions.old, &revisions.new] {
            if self.source.read_blob(revision, path)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Sub-sheets reachable from `root` at any of `revisions`, in discovery
    /// order, excluding the root itself.
    fn sheets(&self, revisions: &[&Revision], root: &str) -> Result<Vec<DesignFile>> {
        let mut seen = BTreeSet::from([root.to_owned()]);
        let mut found = Vec::new();
        for revision in revisions {
            let mut queue = vec![root.to_owned()];
            let mut visited = BTreeSet::new();
            while let Some(path) = queue.pop() {
                if !visited.insert(path.clone()) {
                    continue;
                }
                let Some(bytes) = self.source.read_blob(revision, &path)? else {
                    continue;
                };
                let Ok(source) = std::str::from_utf8(&bytes) else {
                    tracing::warn!(path = %path, revision = %revision.short_label(), "schematic is not UTF-8");
                    continue;
                };
                let refs = match sheet_refs(source) {
                    Ok(refs) => refs,
                    Err(err) => {
                        tracing::warn!(
                            path = %path,
                            revision = %revision.short_label(),
                            error = %err,
                            "skipping sheet discovery"
                        );
                        continue;
                    }
                };

                let (dir, _) = split_dir(&path);
                let mut children = Vec::new();
                for sheet in refs {
                    let Some(child) = join_relative(dir, &sheet.file) else {
                        tracing::warn!(path = %path, sheet = %sheet.file, "sheet points outside the repository");
                        continue;
                    };
                    if seen.insert(child.clone()) {
                        tracing::debug!(parent = %path, sheet = %child, name = %sheet.name, "found sub-sheet");
                        found.push(DesignFile::new(child.clone(), DesignKind::Schematic));
                    }
                    children.push(child);
                }
                // Depth-first in source order.
                queue.extend(children.into_iter().rev());
            }
        }
        Ok(found)
    }
}

impl std::fmt::Debug for RevisionResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionResolver")
            .field("root", &self.source.root())
            .finish()
    }
}

fn find_project(dir: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(dir).map_err(|err| Error::io(dir, err))?;
    let mut projects = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| Error::io(dir, err))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == PROJECT_EXTENSION) {
            projects.push(path);
        }
    }
    projects.sort();
    match projects.len() {
        0 => Err(Error::invalid_input(format!(
            "no .kicad_pro project found in {}",
            dir.display()
        ))),
        1 => Ok(projects.remove(0)),
        _ => Err(Error::invalid_input(format!(
            "{} contains several .kicad_pro projects; name one explicitly",
            dir.display()
        ))),
    }
}

/// Split a repository path into its directory (possibly empty) and file name.
fn split_dir(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}
