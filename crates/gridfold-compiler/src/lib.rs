//! Gridfold Compiler
//!
//! Unified entry point for the compilation pipeline: freeze the
//! solution, analyze dependencies, bundle, optimize, fold, and emit
//! each requested format. Any phase error aborts the whole pipeline;
//! output sinks are rendered in memory first and written whole, so a
//! failed run never leaves partial artifacts behind.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use gridfold_codegen::{FormatError, OutputFormat};
use gridfold_ir::{
    expand_clusters, make_bundles, optimize_solution, optimize_vec_bundles, resolve_fold,
    DepGraph, Settings, Solution,
};

/// Compiler result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Any failure of the compilation pipeline, tagged with a stable kind
/// for the single-line stderr report.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Ir(#[from] gridfold_ir::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    /// No registered stencil solution carries the requested name.
    #[error("unknown stencil solution '{0}'")]
    UnknownStencil(String),

    /// A settings value was rejected before the pipeline started.
    #[error("bad option: {0}")]
    BadOption(String),

    /// An output sink could not be written.
    #[error("cannot write '{path}': {source}")]
    OutputIo {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    /// Stable kind tag used in top-level error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Ir(e) => e.kind(),
            Error::Format(e) => e.kind(),
            Error::UnknownStencil(_) => "UnknownStencil",
            Error::BadOption(_) => "BadOption",
            Error::OutputIo { .. } => "OutputIOError",
        }
    }
}

/// One rendered artifact, not yet written to its sink.
#[derive(Debug)]
pub struct Artifact {
    pub format: OutputFormat,
    pub text: String,
}

/// Run the full pipeline over a defined solution and render every
/// requested format.
///
/// The solution must already be populated (the registry's `define`
/// callback has run); this function freezes it, so it is consumed for
/// further definition.
pub fn compile(
    soln: &mut Solution,
    settings: &Settings,
    formats: &[OutputFormat],
) -> Result<Vec<Artifact>> {
    if !matches!(settings.elem_bytes, 4 | 8) {
        return Err(Error::BadOption(format!(
            "elem-bytes must be 4 or 8, got {}",
            settings.elem_bytes
        )));
    }
    if settings.min_es > settings.max_es {
        return Err(Error::BadOption(format!(
            "min-es {} exceeds max-es {}",
            settings.min_es, settings.max_es
        )));
    }

    soln.freeze(settings)?;
    if settings.print_eqs {
        for i in 0..soln.equations().len() {
            info!(
                "equation {}: {}",
                soln.equations()[i].name,
                gridfold_codegen::render_equation(soln, i)
            );
        }
    }

    let deps = if settings.find_deps {
        DepGraph::analyze(soln)
    } else {
        DepGraph::default()
    };
    debug!(edges = deps.edges.len(), "dependency analysis complete");

    let bundles = make_bundles(soln, &deps, settings)?;
    info!(
        vars = soln.num_grids(),
        equations = soln.equations().len(),
        bundles = bundles.len(),
        "solution '{}' analyzed",
        soln.name()
    );

    optimize_solution(soln, &bundles, settings);

    let mut artifacts = Vec::with_capacity(formats.len());
    for &format in formats {
        let layout = resolve_fold(soln, settings, format.lanes(settings.elem_bytes))?;
        let mut vec_bundles = expand_clusters(soln, &bundles, &layout);
        optimize_vec_bundles(soln, &mut vec_bundles, settings);
        let text = gridfold_codegen::emit(format, soln, &layout, &vec_bundles, settings);
        debug!(format = %format, bytes = text.len(), "rendered artifact");
        artifacts.push(Artifact { format, text });
    }
    Ok(artifacts)
}

/// Write one artifact to its sink: `-` is standard output, anything
/// else is a file written in a single operation.
pub fn write_artifact(artifact: &Artifact, path: &Path) -> Result<()> {
    if path.as_os_str() == "-" {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        lock.write_all(artifact.text.as_bytes())
            .map_err(|source| Error::OutputIo {
                path: path.to_path_buf(),
                source,
            })?;
        return Ok(());
    }
    std::fs::write(path, &artifact.text).map_err(|source| Error::OutputIo {
        path: path.to_path_buf(),
        source,
    })?;
    info!("wrote {} output to {}", artifact.format, path.display());
    Ok(())
}
