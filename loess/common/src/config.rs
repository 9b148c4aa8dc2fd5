use strum::{Display, EnumString};

/// Whether the module is being compiled for training or for inference.
///
/// The low-level optimizer currently runs the same pipeline for both modes,
/// but mode-dependent scheduling decisions hang off of this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CompilationMode {
    Train,
    Infer,
}

/// The config which specifies how to compile the current module
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to run the low-level IR optimization pipeline.
    /// When false, only the entry verifier runs.
    pub optimize_lir: bool,
    /// Brackets every real instruction with debug-print instructions
    pub instrument_debug: bool,
    pub mode: CompilationMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            optimize_lir: true,
            instrument_debug: false,
            mode: CompilationMode::Infer,
        }
    }
}
