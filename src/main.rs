#![allow(dead_code)]

use std::fs::File;
use std::path::Path;
use std::process::exit;

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

use crate::demand::DemandScenarios;
use crate::discretize::Discretization;
use crate::flow::ScheduleFlow;
use crate::instance::Instance;
use crate::milp::{accept_solution, lp_file, SolveStatus, Solution};
use crate::model::{build_model, MilpModel};
use crate::network::TimeExpandedNetwork;
use crate::serialization::flow::export_flow;
use crate::serialization::instance::{export_instance, import_instance};

mod col;
mod demand;
mod discretize;
mod flow;
mod instance;
mod milp;
mod model;
mod network;
mod primitives;
mod serialization;
mod test;

#[derive(Parser, Debug)]
#[command(
    version,
    author,
    about = "Joint fleet-schedule and passenger-flow optimization for inter-city bus carriers under stochastic demand"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    #[command(about = "Parse carrier inputs, sample demand scenarios, and export the instance")]
    Build(BuildArgs),

    #[command(about = "Assemble the flow model from an instance and write it in LP format")]
    WriteLp(WriteLpArgs),

    #[command(about = "Validate an external solver's solution and report nonzero flows")]
    Report(ReportArgs),

    #[command(about = "Solve the continuous relaxation in-process (requires the `lp` feature)")]
    Solve(SolveArgs),

    #[command(about = "Run the built-in reference instance and write its model in LP format")]
    Sample(SampleArgs),
}

#[derive(Args, Clone, Debug)]
struct BuildArgs {
    #[arg(short = 'c', long, default_value = "Cities.csv")]
    cities_path: String,

    #[arg(short = 't', long, default_value = "TravelTimes.csv")]
    travel_times_path: String,

    #[arg(short = 'g', long, default_value = "Config.csv")]
    config_path: String,

    #[arg(
        short = 'o',
        long,
        help = "The file to write the assembled instance to.",
        default_value = "busflow-instance.sqlite3"
    )]
    out_filename: String,
}

fn main_build(args: &BuildArgs) {
    if Path::new(&args.out_filename).exists() {
        error!("Output file already exists: {}", args.out_filename);
        exit(1);
    }

    let open = |path: &str| {
        File::open(path).unwrap_or_else(|err| {
            error!("Could not open {}: {}", path, err);
            exit(1);
        })
    };
    let cities = instance::parse_cities(open(&args.cities_path)).unwrap_or_else(|err| {
        error!("Could not parse cities:\n{:#?}", err);
        exit(1);
    });
    let travel_times =
        instance::parse_travel_times(open(&args.travel_times_path)).unwrap_or_else(|err| {
            error!("Could not parse travel times:\n{:#?}", err);
            exit(1);
        });
    let config = instance::parse_config(open(&args.config_path)).unwrap_or_else(|err| {
        error!("Could not parse config:\n{:#?}", err);
        exit(1);
    });

    let instance = Instance::assemble(&cities, &travel_times, *config).unwrap_or_else(|err| {
        error!("Could not assemble instance:\n{:#?}", err);
        exit(1);
    });
    info!("Number cities: {}", instance.num_cities());

    let disc = Discretization::new(instance.config.tao).unwrap_or_else(|err| {
        error!("Invalid discretization:\n{:#?}", err);
        exit(1);
    });
    let scenarios = demand::generate(&instance).unwrap_or_else(|err| {
        error!("Demand scenario generation failed:\n{:#?}", err);
        exit(1);
    });
    let network = TimeExpandedNetwork::build(&instance, &disc);
    info!("Number arcs: {}", network.num_arcs());

    export_instance(&instance, &scenarios, &args.out_filename).unwrap_or_else(|err| {
        error!("Could not export instance:\n{:#?}", err);
        exit(1);
    });
}

fn load_instance(filename: &str) -> (Instance, DemandScenarios) {
    import_instance(filename).unwrap_or_else(|err| {
        error!("Could not import instance:\n{:#?}", err);
        exit(1);
    })
}

fn assemble_model(
    instance: &Instance,
    scenarios: &DemandScenarios,
) -> (TimeExpandedNetwork, MilpModel) {
    let disc = Discretization::new(instance.config.tao).unwrap_or_else(|err| {
        error!("Invalid discretization:\n{:#?}", err);
        exit(1);
    });
    let network = TimeExpandedNetwork::build(instance, &disc);
    let model = build_model(instance, &network, scenarios);
    (network, model)
}

#[derive(Args, Clone, Debug)]
struct WriteLpArgs {
    #[arg(short = 'i', long, default_value = "busflow-instance.sqlite3")]
    instance_filename: String,

    #[arg(
        short = 'o',
        long,
        help = "The file to write the LP-format model to.",
        default_value = "busflow-model.lp"
    )]
    out_filename: String,
}

fn main_write_lp(args: &WriteLpArgs) {
    if Path::new(&args.out_filename).exists() {
        error!("Output file already exists: {}", args.out_filename);
        exit(1);
    }

    let (instance, scenarios) = load_instance(&args.instance_filename);
    let (_network, model) = assemble_model(&instance, &scenarios);
    std::fs::write(&args.out_filename, lp_file::render(&model)).unwrap_or_else(|err| {
        error!("Could not write {}: {}", args.out_filename, err);
        exit(1);
    });
    info!("Wrote model to {}", args.out_filename);
}

#[derive(Args, Clone, Debug)]
struct ReportArgs {
    #[arg(short = 'i', long, default_value = "busflow-instance.sqlite3")]
    instance_filename: String,

    #[arg(
        short = 's',
        long,
        help = "The external solver's variable values (`# variable; value` rows).",
        default_value = "Solution.csv"
    )]
    solution_path: String,

    #[arg(
        long,
        help = "The status the external solver reported.",
        default_value = "optimal"
    )]
    status: String,

    #[arg(
        short = 'o',
        long,
        help = "The file to write the nonzero flows to.",
        default_value = "busflow-flow.sqlite3"
    )]
    out_filename: String,
}

fn main_report(args: &ReportArgs) {
    if Path::new(&args.out_filename).exists() {
        error!("Output file already exists: {}", args.out_filename);
        exit(1);
    }

    let Some(status) = SolveStatus::parse(&args.status) else {
        error!("Unknown solver status: {}", args.status);
        exit(1);
    };

    let (instance, scenarios) = load_instance(&args.instance_filename);
    let (network, model) = assemble_model(&instance, &scenarios);

    let solution_file = File::open(&args.solution_path).unwrap_or_else(|err| {
        error!("Could not open {}: {}", args.solution_path, err);
        exit(1);
    });
    let values = lp_file::parse_solution(&model, solution_file).unwrap_or_else(|err| {
        error!("Could not parse solution:\n{:#?}", err);
        exit(1);
    });
    let objective = model.objective_value(&values);
    let solution = Solution {
        status,
        objective,
        values,
    };

    finish_with_solution(&instance, &network, &model, solution, &args.out_filename);
}

fn finish_with_solution(
    instance: &Instance,
    network: &TimeExpandedNetwork,
    model: &MilpModel,
    solution: Solution,
    out_filename: &str,
) {
    let solution = accept_solution(model, solution).unwrap_or_else(|err| {
        error!("Solver outcome rejected:\n{:#?}", err);
        exit(1);
    });

    let fractional = model.integrality_violations(&solution.values);
    if !fractional.is_empty() {
        warn!(
            "{} integer variables carry fractional values (relaxed solution)",
            fractional.len()
        );
    }

    let flow = ScheduleFlow::extract(model, network, &solution.values);
    println!("{}", flow.describe(instance, network));
    info!(
        "Status {}, objective {}",
        solution.status.as_str(),
        solution.objective
    );

    export_flow(&flow, &solution, network, out_filename).unwrap_or_else(|err| {
        error!("Could not export flow:\n{:#?}", err);
        exit(1);
    });
}

#[derive(Args, Clone, Debug)]
struct SolveArgs {
    #[arg(short = 'i', long, default_value = "busflow-instance.sqlite3")]
    instance_filename: String,

    #[arg(
        short = 'o',
        long,
        help = "The file to write the nonzero flows to.",
        default_value = "busflow-flow.sqlite3"
    )]
    out_filename: String,
}

#[cfg(feature = "lp")]
fn main_solve(args: &SolveArgs) {
    use crate::milp::relaxation::RelaxationSolver;
    use crate::milp::MilpSolver;

    if Path::new(&args.out_filename).exists() {
        error!("Output file already exists: {}", args.out_filename);
        exit(1);
    }

    let (instance, scenarios) = load_instance(&args.instance_filename);
    let (network, model) = assemble_model(&instance, &scenarios);
    let solution = RelaxationSolver::default().solve(&model);
    finish_with_solution(&instance, &network, &model, solution, &args.out_filename);
}

#[cfg(not(feature = "lp"))]
fn main_solve(_args: &SolveArgs) {
    error!("In-process solving requires the `lp` cargo feature; use `write-lp` with an external solver instead.");
    exit(1);
}

#[derive(Args, Clone, Debug)]
struct SampleArgs {
    #[arg(
        short = 'o',
        long,
        help = "The file to write the reference model to.",
        default_value = "busflow-sample-model.lp"
    )]
    out_filename: String,
}

fn main_sample(args: &SampleArgs) {
    if Path::new(&args.out_filename).exists() {
        error!("Output file already exists: {}", args.out_filename);
        exit(1);
    }

    let instance = test::sample::create_sample_instance();
    let scenarios = demand::generate(&instance).unwrap_or_else(|err| {
        error!("Demand scenario generation failed:\n{:#?}", err);
        exit(1);
    });
    let (network, model) = assemble_model(&instance, &scenarios);
    info!(
        "Reference instance: {} cities, {} arcs, {} variables, {} constraints",
        instance.num_cities(),
        network.num_arcs(),
        model.num_vars(),
        model.constraints().len()
    );
    std::fs::write(&args.out_filename, lp_file::render(&model)).unwrap_or_else(|err| {
        error!("Could not write {}: {}", args.out_filename, err);
        exit(1);
    });
    info!("Wrote model to {}", args.out_filename);
}

fn main() {
    env_logger::builder().parse_env("LOG").init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => main_build(&args),
        Commands::WriteLp(args) => main_write_lp(&args),
        Commands::Report(args) => main_report(&args),
        Commands::Solve(args) => main_solve(&args),
        Commands::Sample(args) => main_sample(&args),
    }
}
