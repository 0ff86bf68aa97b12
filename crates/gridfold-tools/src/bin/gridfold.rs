//! Gridfold stencil compiler driver.
//!
//! Selects a registered stencil solution, applies command-line
//! settings, runs the compilation pipeline, and writes each requested
//! output format to its sink.

use std::path::PathBuf;
use std::process;

use clap::{CommandFactory, FromArgMatches, Parser};
use tracing::info;

use gridfold_codegen::OutputFormat;
use gridfold_compiler::{compile, write_artifact, Error};
use gridfold_foundation::DimTuple;
use gridfold_ir::Settings;
use gridfold_stencils::{builtin_registry, StencilRegistry};

#[derive(Parser, Debug)]
#[command(name = "gridfold")]
#[command(about = "Vector-folding stencil compiler", version)]
struct Args {
    /// Stencil solution to compile (see the list below).
    #[arg(long)]
    stencil: String,

    /// Radius for radius-parameterized stencils.
    #[arg(long)]
    radius: Option<u32>,

    /// Bytes per FP element: 4 (single) or 8 (double precision).
    #[arg(long, default_value_t = 4)]
    elem_bytes: u8,

    /// Domain dimension names and order; the last is unit stride.
    #[arg(long, value_delimiter = ',')]
    domain_dims: Vec<String>,

    /// Step dimension name.
    #[arg(long)]
    step_dim: Option<String>,

    /// Vector fold lengths, e.g. 'x=4,y=2'.
    #[arg(long)]
    fold: Option<String>,

    /// Cluster multiplicities, e.g. 'y=2'.
    #[arg(long)]
    cluster: Option<String>,

    /// Only process updates to vars whose names match this regex.
    #[arg(long, default_value = ".*")]
    vars: String,

    /// Equation-bundle targets, e.g. 'a=foo,b=b[aeiou]r'.
    #[arg(long)]
    eq_bundles: Option<String>,

    /// Bundle scratch equations even when their halos must grow.
    #[arg(long)]
    bundle_scratch: bool,
    #[arg(long, conflicts_with = "bundle_scratch")]
    no_bundle_scratch: bool,

    /// Halo size override for all vars.
    #[arg(long)]
    halo: Option<i64>,

    /// Step-dimension allocation override for all vars.
    #[arg(long)]
    step_alloc: Option<i64>,

    /// Lay misc dimensions innermost (disables misc resizing).
    #[arg(long)]
    interleave_misc: bool,
    #[arg(long, conflicts_with = "interleave_misc")]
    no_interleave_misc: bool,

    /// Make the first fold dimension unit stride.
    #[arg(long)]
    fus: bool,
    /// Make the last fold dimension unit stride (default).
    #[arg(long, conflicts_with = "fus")]
    lus: bool,

    /// Generate simple unaligned loads (1D folds only).
    #[arg(long)]
    ul: bool,
    #[arg(long, conflicts_with = "ul")]
    no_ul: bool,

    /// Combine commutative operations (default on).
    #[arg(long)]
    opt_comb: bool,
    #[arg(long, conflicts_with = "opt_comb")]
    no_opt_comb: bool,

    /// Eliminate common subexpressions (default on).
    #[arg(long)]
    opt_cse: bool,
    #[arg(long, conflicts_with = "opt_cse")]
    no_opt_cse: bool,

    /// Pair eligible function calls, e.g. sin+cos (default on).
    #[arg(long)]
    opt_pair: bool,
    #[arg(long, conflicts_with = "opt_pair")]
    no_opt_pair: bool,

    /// Optimize across the cluster (default on).
    #[arg(long)]
    opt_cluster: bool,
    #[arg(long, conflicts_with = "opt_cluster")]
    no_opt_cluster: bool,

    /// Max single-expression size, in nodes.
    #[arg(long)]
    max_es: Option<usize>,

    /// Min expression size worth naming for reuse, in nodes.
    #[arg(long)]
    min_es: Option<usize>,

    /// Find dependencies between stencil equations (default on).
    #[arg(long)]
    find_deps: bool,
    #[arg(long, conflicts_with = "find_deps")]
    no_find_deps: bool,

    /// Log each equation after definition.
    #[arg(long)]
    print_eqs: bool,
    #[arg(long, conflicts_with = "print_eqs")]
    no_print_eqs: bool,

    /// Emit FORMAT to FILE ('-' = stdout). May repeat.
    #[arg(
        short = 'p',
        long = "print",
        num_args = 2,
        value_names = ["FORMAT", "FILE"],
        action = clap::ArgAction::Append
    )]
    print: Vec<String>,
}

fn main() {
    gridfold_tools::init_logging();
    let mut registry = builtin_registry();

    let cmd = Args::command().after_help(solution_list(&registry));
    // Help and version print to stdout and exit 0; any argument error
    // is reported on stderr with exit 1.
    let matches = match cmd.try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let failed = e.use_stderr();
            let _ = e.print();
            process::exit(if failed { 1 } else { 0 });
        }
    };
    let args = match Args::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    if let Err(e) = run(args, &mut registry) {
        eprintln!("gridfold: {}: {e}", e.kind());
        process::exit(1);
    }
}

fn run(args: Args, registry: &mut StencilRegistry) -> gridfold_compiler::Result<()> {
    info!(
        "gridfold stencil compiler {}",
        env!("CARGO_PKG_VERSION")
    );

    let settings = build_settings(&args)?;
    let outputs = parse_outputs(&args.print)?;

    {
        let def = registry
            .get_mut(&args.stencil)
            .ok_or_else(|| Error::UnknownStencil(args.stencil.clone()))?;
        if let Some(radius) = args.radius {
            if !def.set_radius(radius) {
                return Err(Error::BadOption(format!(
                    "invalid radius {radius} for stencil '{}'",
                    args.stencil
                )));
            }
        }
        if let Some(radius) = def.radius() {
            info!("stencil radius: {radius}");
        }
    }
    let mut soln = registry
        .define(&args.stencil)
        .expect("presence checked above")
        .map_err(Error::Ir)?;
    info!(
        "solution '{}' defined: {} var(s), {} equation(s)",
        soln.name(),
        soln.num_grids(),
        soln.equations().len()
    );

    if outputs.is_empty() {
        info!("no output requested; use '-p FORMAT FILE' to emit code");
    }
    let formats: Vec<OutputFormat> = outputs.iter().map(|(f, _)| *f).collect();
    let artifacts = compile(&mut soln, &settings, &formats)?;
    for (artifact, (_, path)) in artifacts.iter().zip(&outputs) {
        write_artifact(artifact, path)?;
    }
    Ok(())
}

fn build_settings(args: &Args) -> gridfold_compiler::Result<Settings> {
    let mut settings = Settings::default();
    settings.elem_bytes = args.elem_bytes;
    settings.step_dim = args.step_dim.clone();
    settings.domain_dims = args.domain_dims.clone();
    if let Some(text) = &args.fold {
        settings.fold = parse_tuple(text)?;
    }
    if let Some(text) = &args.cluster {
        settings.cluster = parse_tuple(text)?;
    }
    settings.var_regex = args.vars.clone();
    if let Some(text) = &args.eq_bundles {
        settings.bundle_targets = parse_bundle_targets(text)?;
    }
    settings.bundle_scratch = toggle(args.bundle_scratch, args.no_bundle_scratch, false);
    settings.halo = args.halo;
    settings.step_alloc = args.step_alloc;
    settings.interleave_misc = toggle(args.interleave_misc, args.no_interleave_misc, false);
    settings.first_inner = toggle(args.fus, args.lus, false);
    settings.allow_unaligned_loads = toggle(args.ul, args.no_ul, false);
    settings.opt_comb = toggle(args.opt_comb, args.no_opt_comb, true);
    settings.opt_cse = toggle(args.opt_cse, args.no_opt_cse, true);
    settings.opt_pair = toggle(args.opt_pair, args.no_opt_pair, true);
    settings.opt_cluster = toggle(args.opt_cluster, args.no_opt_cluster, true);
    if let Some(v) = args.max_es {
        settings.max_es = v;
    }
    if let Some(v) = args.min_es {
        settings.min_es = v;
    }
    settings.find_deps = toggle(args.find_deps, args.no_find_deps, true);
    settings.print_eqs = toggle(args.print_eqs, args.no_print_eqs, false);
    Ok(settings)
}

fn toggle(on: bool, off: bool, default: bool) -> bool {
    if on {
        true
    } else if off {
        false
    } else {
        default
    }
}

/// `x=4,y=2` into a tuple.
fn parse_tuple(text: &str) -> gridfold_compiler::Result<DimTuple> {
    let mut tuple = DimTuple::new();
    for part in text.split(',') {
        let (name, val) = part
            .split_once('=')
            .ok_or_else(|| Error::BadOption(format!("expected <dim>=<len>, got '{part}'")))?;
        let val: i64 = val
            .trim()
            .parse()
            .map_err(|_| Error::BadOption(format!("bad length in '{part}'")))?;
        tuple
            .push(name.trim(), val)
            .map_err(|e| Error::BadOption(e.to_string()))?;
    }
    Ok(tuple)
}

/// `a=foo,b=b[aeiou]r` into (template, regex) pairs.
fn parse_bundle_targets(text: &str) -> gridfold_compiler::Result<Vec<(String, String)>> {
    text.split(',')
        .map(|part| {
            part.split_once('=')
                .map(|(name, re)| (name.trim().to_string(), re.trim().to_string()))
                .ok_or_else(|| {
                    Error::BadOption(format!("expected <name>=<regex>, got '{part}'"))
                })
        })
        .collect()
}

/// Flatten repeated `-p FORMAT FILE` pairs.
fn parse_outputs(print: &[String]) -> gridfold_compiler::Result<Vec<(OutputFormat, PathBuf)>> {
    print
        .chunks(2)
        .map(|pair| match pair {
            [format, file] => {
                let format = OutputFormat::parse(format)?;
                Ok((format, PathBuf::from(file)))
            }
            _ => Err(Error::BadOption(
                "-p requires a FORMAT and a FILE".to_string(),
            )),
        })
        .collect()
}

fn solution_list(registry: &StencilRegistry) -> String {
    let mut out = String::from("Registered stencil solutions ('*' accepts --radius):\n");
    for def in registry.iter() {
        let marker = if def.radius().is_some() { " *" } else { "" };
        out.push_str(&format!("  {}{marker}\n      {}\n", def.name(), def.description()));
    }
    out.push_str("\nSupported output formats:\n  ");
    let tags: Vec<&str> = OutputFormat::ALL.iter().map(|f| f.tag()).collect();
    out.push_str(&tags.join(", "));
    out
}
