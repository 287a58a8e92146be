#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use git2::{ErrorClass, ErrorCode, IndexAddOption, Repository as GitRepository};
use image::{Rgba, RgbaImage};
use kidivis_core::{
    DesignKind, Error, Raster, RenderError, RenderRequest, Renderer, RendererResult, Result,
};
use tempfile::TempDir;

/// A throwaway git repository holding a KiCad project.
pub struct Fixture {
    pub temp: TempDir,
    pub git: GitRepository,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let git = GitRepository::init(temp.path()).expect("init repository");
        Self { temp, git }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }

    pub fn write(&self, relative: &str, contents: &str) -> &Self {
        write_file(self.path(relative), contents);
        self
    }

    pub fn remove(&self, relative: &str) -> &Self {
        fs::remove_file(self.path(relative)).expect("remove file");
        self
    }

    pub fn commit(&self, message: &str) -> String {
        commit_all(&self.git, message)
            .expect("commit")
            .to_string()
    }
}

/// Board source understood by [`FakeRenderer`]: `WxH` plus an ink pattern.
pub fn board(width: u32, height: u32, ink: &str) -> String {
    format!("(kicad_pcb {width}x{height} {ink})\n")
}

/// Schematic source understood by [`FakeRenderer`], optionally with sheets.
pub fn schematic(ink: &str, sheets: &[(&str, &str)]) -> String {
    let mut source = format!("(kicad_sch 20x20 {ink}\n");
    for (name, file) in sheets {
        source.push_str(&format!(
            "  (sheet (at 0 0)\n    (property \"Sheetname\" \"{name}\")\n    (property \"Sheetfile\" \"{file}\"))\n"
        ));
    }
    source.push_str(")\n");
    source
}

/// Board source with one ink token per layer, e.g. `F.Cu:##`.
pub fn layered_board(width: u32, height: u32, layers: &[(&str, &str)]) -> String {
    let inks: Vec<String> = layers
        .iter()
        .map(|(layer, ink)| format!("{layer}:{ink}"))
        .collect();
    format!("(kicad_pcb {width}x{height} {})\n", inks.join(" "))
}

/// Deterministic in-process renderer. The first token after the opening
/// form is the canvas size; every `#` of the ink token paints the matching
/// pixel of the first row black. A layered request uses the `LAYER:ink`
/// token instead and renders a blank canvas when the layer has none.
/// Sources containing `TIMEOUT` fail like a timed-out process.
#[derive(Default)]
pub struct FakeRenderer {
    pub calls: AtomicUsize,
    pub inputs: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
    pub board_layers: Vec<String>,
}

impl FakeRenderer {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn layered(layers: &[&str]) -> Self {
        Self {
            board_layers: layers.iter().map(|layer| (*layer).to_owned()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rendered_files(&self) -> Vec<String> {
        let mut inputs = self.inputs.lock().expect("inputs lock").clone();
        inputs.sort();
        inputs
    }
}

impl Renderer for FakeRenderer {
    fn id(&self) -> &'static str {
        "fake"
    }

    fn kinds(&self) -> &[DesignKind] {
        &DesignKind::ALL
    }

    fn version(&self) -> &str {
        "fake-1"
    }

    fn layers(&self, kind: DesignKind) -> &[String] {
        match kind {
            DesignKind::Pcb => &self.board_layers,
            DesignKind::Schematic => &[],
        }
    }

    fn render(&self, request: &RenderRequest) -> RendererResult<Raster> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = request
            .input
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_owned();
        let name = match &request.layer {
            Some(layer) => format!("{name}@{layer}"),
            None => name,
        };
        self.inputs.lock().expect("inputs lock").push(name);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let source = fs::read_to_string(&request.input).map_err(|source| RenderError::Io {
            path: request.input.display().to_string(),
            source,
        })?;
        if source.contains("TIMEOUT") {
            return Err(RenderError::TimedOut {
                timeout: Duration::from_secs(1),
            });
        }

        let mut tokens = source
            .trim_start_matches('(')
            .split_whitespace()
            .skip(1)
            .map(|token| token.trim_end_matches(')'));
        let size = tokens.next().unwrap_or("1x1");
        let ink = match &request.layer {
            Some(layer) => tokens
                .find_map(|token| token.strip_prefix(layer.as_str())?.strip_prefix(':'))
                .unwrap_or(""),
            None => tokens.next().unwrap_or(""),
        };
        let (width, height) = size
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
            .ok_or_else(|| RenderError::output(format!("bad size {size}")))?;

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        for (x, mark) in ink.chars().enumerate() {
            let x = u32::try_from(x).expect("small ink");
            if mark == '#' && x < width && height > 0 {
                image.put_pixel(x, 0, Rgba([0, 0, 0, 255]));
            }
        }
        Ok(Raster::new(image))
    }
}

pub fn commit_all(repo: &GitRepository, message: &str) -> Result<git2::Oid> {
    let parents = match repo.head() {
        Ok(reference) => vec![reference.peel_to_commit().map_err(Error::from)?],
        Err(err)
            if matches!(
                (err.class(), err.code()),
                (
                    ErrorClass::Reference,
                    ErrorCode::NotFound | ErrorCode::UnbornBranch
                )
            ) =>
        {
            Vec::new()
        }
        Err(err) => return Err(Error::from(err)),
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

    let mut index = repo.index().map_err(Error::from)?;
    index
        .add_all(["*"], IndexAddOption::DEFAULT, None)
        .map_err(Error::from)?;
    index.update_all(["*"], None).map_err(Error::from)?;
    index.write().map_err(Error::from)?;
    let tree_id = index.write_tree().map_err(Error::from)?;
    let tree = repo.find_tree(tree_id).map_err(Error::from)?;
    let signature = git2::Signature::now("Test User", "test@example.com").map_err(Error::from)?;

    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        parent_refs.as_slice(),
    )
    .map_err(Error::from)
}

pub fn write_file(path: impl AsRef<Path>, contents: &str) {
    fs::create_dir_all(
        path.as_ref()
            .parent()
            .expect("path should have a parent directory"),
    )
    .expect("create directories");
    fs::write(path, contents).expect("write file");
}
