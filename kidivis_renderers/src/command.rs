use std::env;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

use kidivis_api::DesignKind;
use kidivis_render_api::{Raster, RenderError, RenderRequest, Renderer, RendererResult};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use wait_timeout::ChildExt;

use crate::CommandSettings;

const OUTPUT_FILE: &str = "render.png";
const ORIGIN_SUFFIX: &str = ".origin.json";
const PASSTHROUGH_PREFIX: &str = "KIDIVIS_RENDER_";
const PROGRAM_OVERRIDE: &str = "KIDIVIS_RENDER_BIN";
const UNKNOWN_VERSION: &str = "unknown";

/// Renderer that shells out to an external program for every render.
///
/// The program receives the materialized design file and must write an image
/// to `{output}`. It may also write `{output}.origin.json` containing
/// `{"x": .., "y": ..}` to place the raster in design space.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: OsString,
    settings: CommandSettings,
    version: String,
    path: Option<OsString>,
    home: Option<OsString>,
    passthrough: Vec<(OsString, OsString)>,
}

impl CommandRenderer {
    /// Build a renderer and ask the program for its version.
    ///
    /// A failed version query is logged and yields an `unknown` version; rendering
    /// failures surface later, per file.
    #[must_use]
    pub fn new(settings: CommandSettings) -> Self {
        let mut renderer = Self::with_version(settings, UNKNOWN_VERSION);
        match renderer.query_version() {
            Ok(reported) => renderer.version = renderer.qualified_version(&reported),
            Err(err) => tracing::warn!(
                program = %renderer.program.to_string_lossy(),
                error = %err,
                "renderer version query failed"
            ),
        }
        renderer
    }

    /// Build a renderer with a known version, skipping the version query.
    #[must_use]
    pub fn with_version(settings: CommandSettings, version: &str) -> Self {
        let mut passthrough = Vec::new();
        for (key, value) in env::vars_os() {
            if key.to_string_lossy().starts_with(PASSTHROUGH_PREFIX) {
                passthrough.push((key, value));
            }
        }
        let program =
            env::var_os(PROGRAM_OVERRIDE).unwrap_or_else(|| OsString::from(&settings.program));
        let mut renderer = Self {
            program,
            settings,
            version: String::new(),
            path: env::var_os("PATH"),
            home: env::var_os("HOME"),
            passthrough,
        };
        renderer.version = renderer.qualified_version(version);
        renderer
    }

    /// Settings the renderer was built from.
    #[must_use]
    pub const fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    fn query_version(&self) -> RendererResult<String> {
        let output = self.run(&self.settings.version_args)?;
        let reported = output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| RenderError::output("version query printed nothing"))?;
        Ok(reported.to_owned())
    }

    /// Reported version joined with a digest of the invocation, so that a
    /// changed argument template never reuses stale renders.
    fn qualified_version(&self, reported: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.program.to_string_lossy().as_bytes());
        for arg in self
            .settings
            .pcb_args
            .iter()
            .chain(&self.settings.schematic_args)
        {
            hasher.update([0]);
            hasher.update(arg.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        format!("{reported}+{}", &digest[..12])
    }

    fn arguments(&self, request: &RenderRequest, output: &Path) -> Vec<String> {
        let template = match request.kind {
            DesignKind::Pcb => &self.settings.pcb_args,
            DesignKind::Schematic => &self.settings.schematic_args,
        };
        let stem = request
            .input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let vars = [
            ("input", request.input.to_string_lossy().into_owned()),
            ("output", output.to_string_lossy().into_owned()),
            ("output_dir", request.output_dir.to_string_lossy().into_owned()),
            ("stem", stem),
            ("layer", request.layer.clone().unwrap_or_default()),
        ];
        template.iter().map(|arg| expand(arg, &vars)).collect()
    }

    fn run(&self, args: &[String]) -> RendererResult<ProcessOutput> {
        let mut command = Command::new(&self.program);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        self.configure_environment(&mut command);
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = command.spawn().map_err(|source| RenderError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;

        let stdout_handle = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || -> io::Result<Vec<u8>> {
                let mut buffer = Vec::new();
                stdout.read_to_end(&mut buffer)?;
                Ok(buffer)
            })
        });

        let stderr_handle = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || -> io::Result<Vec<u8>> {
                let mut buffer = Vec::new();
                stderr.read_to_end(&mut buffer)?;
                Ok(buffer)
            })
        });

        let timeout = self.settings.timeout();
        let status = match child.wait_timeout(timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                kill_tree(&mut child);
                let _ = child.wait();
                return Err(RenderError::TimedOut { timeout });
            }
            Err(source) => {
                kill_tree(&mut child);
                let _ = child.wait();
                return Err(RenderError::Io {
                    path: self.program.to_string_lossy().into_owned(),
                    source,
                });
            }
        };
        // Stragglers left in the group would hold the pipes open.
        kill_group(&child);

        let stdout = join_reader(stdout_handle, "stdout")?;
        let stderr = join_reader(stderr_handle, "stderr")?;

        if !status.success() {
            return Err(RenderError::Exit {
                code: exit_code(status),
                stdout,
                stderr,
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }

    fn configure_environment(&self, command: &mut Command) {
        command.env_clear();
        if let Some(path) = &self.path {
            command.env("PATH", path);
        }
        if let Some(home) = &self.home {
            command.env("HOME", home);
        }
        for (key, value) in &self.passthrough {
            command.env(key, value);
        }
    }
}

impl Renderer for CommandRenderer {
    fn id(&self) -> &'static str {
        "command"
    }

    fn kinds(&self) -> &[DesignKind] {
        &DesignKind::ALL
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn layers(&self, kind: DesignKind) -> &[String] {
        match kind {
            DesignKind::Pcb => &self.settings.layers,
            DesignKind::Schematic => &[],
        }
    }

    fn render(&self, request: &RenderRequest) -> RendererResult<Raster> {
        let output = request.output_dir.join(OUTPUT_FILE);
        let args = self.arguments(request, &output);
        tracing::debug!(
            program = %self.program.to_string_lossy(),
            ?args,
            "invoking renderer"
        );

        let process = self.run(&args)?;
        if !process.stderr.trim().is_empty() {
            tracing::debug!(stderr = %process.stderr.trim(), "renderer stderr");
        }

        if !output.is_file() {
            return Err(RenderError::output(format!(
                "no image written to {}",
                output.display()
            )));
        }
        let image = image::open(&output)
            .map_err(|err| {
                RenderError::output(format!("failed to decode {}: {err}", output.display()))
            })?
            .to_rgba8();

        let origin = read_origin(&origin_path(&output))?;
        Ok(Raster::with_origin(image, origin.x, origin.y))
    }
}

#[derive(Debug, Default, Deserialize)]
struct Origin {
    x: i64,
    y: i64,
}

fn origin_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(ORIGIN_SUFFIX);
    PathBuf::from(name)
}

fn read_origin(path: &Path) -> RendererResult<Origin> {
    if !path.is_file() {
        return Ok(Origin::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| RenderError::Io {
        path: path.to_string_lossy().into_owned(),
        source,
    })?;
    serde_json::from_str(&text)
        .map_err(|err| RenderError::output(format!("invalid origin in {}: {err}", path.display())))
}

fn expand(template: &str, vars: &[(&str, String)]) -> String {
    let mut expanded = template.to_owned();
    for (name, value) in vars {
        let placeholder = format!("{{{name}}}");
        if expanded.contains(&placeholder) {
            expanded = expanded.replace(&placeholder, value);
        }
    }
    expanded
}

/// Kill the child and everything it started in its process group.
fn kill_tree(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: `kill` has no memory-safety preconditions; the child leads its
    // own process group, so a negative pid only reaches processes it spawned.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn exit_code(status: ExitStatus) -> String {
    status
        .code()
        .map_or_else(|| "terminated".to_owned(), |code| code.to_string())
}

fn join_reader(
    handle: Option<thread::JoinHandle<io::Result<Vec<u8>>>>,
    stream: &str,
) -> RendererResult<String> {
    match handle {
        Some(handle) => {
            let bytes = handle
                .join()
                .map_err(|_| RenderError::output(format!("failed to join renderer {stream} reader")))?
                .map_err(|source| RenderError::Io {
                    path: stream.to_owned(),
                    source,
                })?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => Ok(String::new()),
    }
}

#[derive(Debug)]
struct ProcessOutput {
    stdout: String,
    stderr: String,
}
