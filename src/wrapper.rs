//! Runner program executed by the child interpreter.
//!
//! The runner configures matplotlib (when installed) for off-screen
//! rendering, turns `plt.show()` into "save every open figure", executes the
//! submission from `SUBMISSION_FILE` in a fresh namespace, and saves any
//! figures still open afterwards.

/// File the submission is written to inside the working directory
pub const SUBMISSION_FILE: &str = "submission.py";

/// File the runner program is written to inside the working directory
pub const RUNNER_FILE: &str = "runner.py";

/// Environment variable through which the runner learns its output directory
pub const OUTPUT_DIR_ENV: &str = "SANDBOX_OUTPUT_DIR";

/// Extension of the images the runner produces
pub const IMAGE_EXTENSION: &str = "png";

/// Rendering settings for saved figures
#[derive(Debug, Clone)]
pub struct PlotSettings {
    pub dpi: u32,
    pub face_color: String,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            dpi: 150,
            face_color: "white".to_string(),
        }
    }
}

/// Build the runner program.
///
/// Figures are saved as `plot_000001.png`, `plot_000002.png`, ... so that sorting
/// file names reproduces creation order.
pub fn build_runner(settings: &PlotSettings) -> String {
    format!(
        r#"import os
import sys

_output_dir = os.environ["{output_env}"]
_plot_counter = [0]

try:
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as _plt
except ImportError:
    _plt = None


def _save_open_figures(*args, **kwargs):
    for _num in _plt.get_fignums():
        _fig = _plt.figure(_num)
        _plot_counter[0] += 1
        _path = os.path.join(_output_dir, "plot_%06d.{ext}" % _plot_counter[0])
        _fig.savefig(_path, dpi={dpi}, bbox_inches="tight", facecolor="{face}")
    _plt.close("all")


if _plt is not None:
    _plt.show = _save_open_figures

with open("{submission}", encoding="utf-8") as _f:
    _source = _f.read()

try:
    exec(compile(_source, "{submission}", "exec"), {{"__name__": "__main__"}})
finally:
    if _plt is not None and _plt.get_fignums():
        _save_open_figures()
"#,
        output_env = OUTPUT_DIR_ENV,
        ext = IMAGE_EXTENSION,
        dpi = settings.dpi,
        face = settings.face_color,
        submission = SUBMISSION_FILE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_contents() {
        let runner = build_runner(&PlotSettings::default());
        assert!(runner.contains("matplotlib.use(\"Agg\")"));
        assert!(runner.contains("_plt.show = _save_open_figures"));
        assert!(runner.contains("os.environ[\"SANDBOX_OUTPUT_DIR\"]"));
        assert!(runner.contains("\"plot_%06d.png\""));
        assert!(runner.contains("dpi=150"));
        assert!(runner.contains("compile(_source, \"submission.py\", \"exec\")"));
        assert!(runner.contains("{\"__name__\": \"__main__\"}"));
        // Missing matplotlib must not be fatal
        assert!(runner.contains("except ImportError:"));
    }

    #[test]
    fn test_custom_settings() {
        let runner = build_runner(&PlotSettings {
            dpi: 72,
            face_color: "black".to_string(),
        });
        assert!(runner.contains("dpi=72"));
        assert!(runner.contains("facecolor=\"black\""));
    }
}
