use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use feederpf::debug::format_operating_point;
use feederpf::dense::Mat;
use feederpf::{
    batch, Alg, Backend, Criterion, GridDefinition, GridModel, Injection, LinearModel,
    OperatingPoint, PowerFlowOptions, Sensitivity,
};
use num_complex::Complex64;
use serde_json::{json, Value};
use spsolve::rlu::RLU;
use std::fs;
use std::path::PathBuf;

/// Unbalanced distribution grid power flow and linearization.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power Flow
    #[clap(name = "pf")]
    PowerFlow(PfArgs),

    /// Power flow followed by linearization around each operating point
    #[clap(name = "lin")]
    Linearize(PfArgs),
}

#[derive(Args)]
struct PfArgs {
    /// The input grid description (JSON)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (JSON report)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Power flow algorithm.
    #[arg(long)]
    pub alg: Option<Alg>,

    /// Termination tolerance on the voltage change.
    #[arg(long)]
    pub tol: Option<f64>,

    /// Voltage change measure compared with the tolerance.
    #[arg(long)]
    pub criterion: Option<Criterion>,

    /// Maximum number of iterations.
    #[arg(long)]
    pub max_it: Option<usize>,

    /// Uniform load scaling factors, one power flow each.
    #[arg(long, value_delimiter = ',')]
    pub scale: Vec<f64>,

    /// Number of worker threads.
    #[arg(long)]
    pub threads: Option<usize>,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {:#}", err);
            std::process::exit(2);
        }
    }
}

fn execute(cli: &Cli) -> Result<()> {
    let (args, linearize) = match &cli.command {
        Commands::PowerFlow(args) => (args, false),
        Commands::Linearize(args) => (args, true),
    };

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("reading grid '{}'", args.input.display()))?;
    let def: GridDefinition = serde_json::from_str(&text)
        .with_context(|| format!("parsing grid '{}'", args.input.display()))?;
    let model = GridModel::build(&def)?;

    let mut builder = PowerFlowOptions::builder();
    if let Some(alg) = args.alg {
        builder.algorithm(alg);
    }
    if let Some(tol) = args.tol {
        builder.tolerance(tol);
    }
    if let Some(criterion) = args.criterion {
        builder.criterion(criterion);
    }
    if let Some(max_it) = args.max_it {
        builder.max_iterations(max_it);
    }
    let options = builder.build()?;

    let scales = if args.scale.is_empty() {
        vec![1.0]
    } else {
        args.scale.clone()
    };
    let injections = scales
        .iter()
        .map(|&k| Injection::from_loads(&model, &vec![k; model.load_count()]))
        .collect::<Result<Vec<_>, _>>()?;

    let points = batch::solve_all(&model, &injections, args.threads, || {
        Backend::from_options(options.clone(), RLU::default())
    })?
    .into_iter()
    .collect::<Result<Vec<_>, _>>()?;

    for (k, op) in scales.iter().zip(&points) {
        println!("load scale {}", k);
        println!("{}", format_operating_point(&model, op));
    }

    let linear_models = if linearize {
        batch::linearize_all(&model, &points, args.threads, RLU::default)?
            .into_iter()
            .map(|lin| lin.map(Some))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![None; points.len()]
    };

    if let Some(out_path) = &args.output {
        let results: Vec<Value> = scales
            .iter()
            .zip(&points)
            .zip(&linear_models)
            .map(|((k, op), lin)| report(&model, *k, op, lin.as_ref()))
            .collect();
        let report = json!({
            "grid": model.name(),
            "node_phases": (0..model.node_phase_count())
                .map(|i| model.node_phase_label(i))
                .collect::<Vec<_>>(),
            "branch_phases": (0..model.branch_phase_count())
                .map(|i| model.branch_phase_label(i))
                .collect::<Vec<_>>(),
            "results": results,
        });
        fs::write(out_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing report '{}'", out_path.display()))?;
    }

    Ok(())
}

fn complex(z: &Complex64) -> Value {
    json!([z.re, z.im])
}

fn complex_vec(v: &[Complex64]) -> Value {
    Value::Array(v.iter().map(complex).collect())
}

fn complex_mat(m: &Mat<Complex64>) -> Value {
    Value::Array(m.to_rows().iter().map(|r| complex_vec(r)).collect())
}

fn sensitivity(s: &Sensitivity<f64>) -> Value {
    json!({
        "wye_active": s.wye_active.to_rows(),
        "wye_reactive": s.wye_reactive.to_rows(),
        "delta_active": s.delta_active.to_rows(),
        "delta_reactive": s.delta_reactive.to_rows(),
    })
}

fn report(model: &GridModel, scale: f64, op: &OperatingPoint, lin: Option<&LinearModel>) -> Value {
    let mut v = json!({
        "scale": scale,
        "iterations": op.iterations,
        "voltage": complex_vec(&op.voltage),
        "voltage_magnitude_pu": op.voltage_magnitude_per_unit(model),
        "branch_power_from": complex_vec(&op.branch_power_from),
        "branch_power_to": complex_vec(&op.branch_power_to),
        "loss": complex(&op.total_loss()),
    });
    if let Some(lin) = lin {
        v["linear_model"] = json!({
            "voltage": {
                "wye_active": complex_mat(&lin.voltage.wye_active),
                "wye_reactive": complex_mat(&lin.voltage.wye_reactive),
                "delta_active": complex_mat(&lin.voltage.delta_active),
                "delta_reactive": complex_mat(&lin.voltage.delta_reactive),
            },
            "voltage_magnitude": sensitivity(&lin.voltage_magnitude),
            "branch_power_from": sensitivity(&lin.branch_power_from),
            "branch_power_to": sensitivity(&lin.branch_power_to),
            "branch_power_magnitude_from": sensitivity(&lin.branch_power_magnitude_from),
            "branch_power_magnitude_to": sensitivity(&lin.branch_power_magnitude_to),
            "loss_active": sensitivity(&lin.loss_active),
            "loss_reactive": sensitivity(&lin.loss_reactive),
        });
    }
    v
}
