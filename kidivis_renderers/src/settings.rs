use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_PROGRAM: &str = "kidivis-render";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LAYERS: [&str; 7] = [
    "F.Cu",
    "B.Cu",
    "F.Silkscreen",
    "B.Silkscreen",
    "F.Mask",
    "B.Mask",
    "Edge.Cuts",
];

/// How to invoke the external renderer.
///
/// Argument templates may contain `{input}`, `{output}`, `{output_dir}`,
/// `{stem}` and `{layer}`; each placeholder is replaced per render. Boards are
/// rendered once per configured layer with `{layer}` naming that layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Renderer executable, looked up on `PATH` when not absolute.
    pub program: String,
    /// Arguments for `.kicad_pcb` inputs.
    pub pcb_args: Vec<String>,
    /// Arguments for `.kicad_sch` inputs.
    pub schematic_args: Vec<String>,
    /// Arguments that make the program print its version.
    pub version_args: Vec<String>,
    /// Board layers, each rendered and compared on its own.
    pub layers: Vec<String>,
    /// Upper bound for a single invocation, in seconds.
    pub timeout_secs: u64,
}

impl CommandSettings {
    /// Invocation time budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_owned(),
            pcb_args: strings(&["pcb", "{input}", "{output}", "--layers", "{layer}"]),
            schematic_args: strings(&["sch", "{input}", "{output}"]),
            version_args: strings(&["--version"]),
            layers: strings(&DEFAULT_LAYERS),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}
