use anyhow::Context;
use clap::{ArgAction, Args, ColorChoice, CommandFactory, FromArgMatches, Parser, Subcommand};
use lfvkit::config::CliConfig;
use lfvkit::detection::{DetectionResponse, MaskDelivery};
use lfvkit::interpret::interpret_response;
use lfvkit::manifest::{create_train_manifest, manifest_location};
use lfvkit::report::{self, OutcomeReport};
use lfvkit::upload::{MirrorStore, RemotePath, upload_dir};
use is_terminal::IsTerminal;
use std::io::stdout;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lfv",
    about = "Lookout for Vision dataset and edge inference utilities",
    arg_required_else_help = true
)]
struct Cli {
    /// Disable color
    #[arg(long = "no-color", global = true)]
    no_color: bool,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the training manifest and stage the dataset for upload
    Prepare(PrepareArgs),
    /// Interpret a detection response for an image
    Interpret(InterpretArgs),
    /// Print the JSON Schema of detection responses
    Schema,
}

#[derive(Args, Clone)]
struct PrepareArgs {
    /// Destination folder for the dataset files, e.g. s3://bucket/prefix
    #[arg(value_name = "REMOTE_PATH")]
    remote_path: String,

    /// Local dataset folder (defaults to the configured dataset_dir)
    #[arg(long, value_name = "DIR")]
    dataset_dir: Option<PathBuf>,

    /// Local folder mirroring remote buckets
    #[arg(long, value_name = "DIR")]
    staging_root: Option<PathBuf>,

    /// Only write the training manifest
    #[arg(long)]
    skip_upload: bool,
}

#[derive(Args, Clone)]
struct InterpretArgs {
    /// Image the response was produced for
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    /// Detection response as JSON
    #[arg(value_name = "RESPONSE")]
    response: PathBuf,

    /// Use this PNG as the anomaly mask instead of the one in the response
    #[arg(long, value_name = "PNG")]
    mask_image: Option<PathBuf>,

    /// Minimum area fraction for a defect to count
    #[arg(long, value_name = "FRACTION")]
    threshold: Option<f32>,

    /// The model does not produce masks
    #[arg(long)]
    classification_only: bool,

    /// Write defectmask.png and blended.png here
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Output the outcome as JSON
    #[arg(long)]
    json: bool,
}

fn detect_color_choice() -> ColorChoice {
    // Scan args before clap so help/errors honor `--no-color`.
    // Mirror clap's parsing by stopping at `--` which terminates flags.
    let mut args = std::env::args_os();
    args.next();
    let mut flag = false;
    for arg in args {
        if arg == "--" {
            break;
        }
        if arg == "--no-color" {
            flag = true;
            break;
        }
    }
    if flag || std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "lfvkit=warn,lfv=warn",
        1 => "lfvkit=info,lfv=info",
        _ => "lfvkit=debug,lfv=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_prepare(args: PrepareArgs, config: &CliConfig) -> anyhow::Result<()> {
    let dataset_dir = args
        .dataset_dir
        .unwrap_or_else(|| config.dataset.dataset_dir.clone());
    // Reject bad destinations before anything is written.
    let remote = if args.skip_upload {
        None
    } else {
        Some(RemotePath::parse(&args.remote_path)?)
    };

    println!("Copying getting started files to {}", args.remote_path);

    let summary = create_train_manifest(&dataset_dir, &args.remote_path, &config.dataset.layout)?;
    println!(
        "Wrote {} records to {}",
        summary.records,
        summary.destination.display()
    );

    if let Some(remote) = remote {
        let staging_root = args
            .staging_root
            .unwrap_or_else(|| config.upload.staging_root.clone());
        let store = MirrorStore::new(staging_root);
        let copied = upload_dir(&store, &dataset_dir, &remote)?;
        println!(
            "Staged {} files for {} under {}",
            copied,
            remote,
            store.root().display()
        );
    }

    println!(
        "Create dataset using manifest file: {}",
        manifest_location(&args.remote_path, &config.dataset.layout)
    );
    Ok(())
}

fn run_interpret(args: InterpretArgs, config: &CliConfig, color: ColorChoice) -> anyhow::Result<()> {
    let source = image::open(&args.image)
        .with_context(|| format!("couldn't open image {}", args.image.display()))?
        .to_rgb8();

    let raw = std::fs::read_to_string(&args.response)
        .with_context(|| format!("couldn't open file: {}", args.response.display()))?;
    let mut response = DetectionResponse::from_json(&raw)
        .with_context(|| format!("invalid detection response {}", args.response.display()))?;

    if let Some(mask_path) = &args.mask_image {
        let mask = image::open(mask_path)
            .with_context(|| format!("couldn't open mask {}", mask_path.display()))?
            .to_rgb8();
        response.anomaly_mask = MaskDelivery::from_image(&mask);
    }

    let mut options = config.interpret;
    if let Some(threshold) = args.threshold {
        options.area_threshold = threshold;
    }
    if args.classification_only {
        options.mask_expected = false;
    }

    let outcome = interpret_response(&source, &response, &options).inspect_err(|e| {
        tracing::debug!(kind = ?e.kind(), "interpretation failed: {}", e);
    })?;

    if let Some(out_dir) = &args.out_dir {
        for path in report::write_images(&outcome, out_dir)? {
            tracing::info!("saved {}", path.display());
        }
    }

    if args.json {
        let rendered = serde_json::to_string_pretty(&OutcomeReport::from(&outcome))?;
        println!("{}", rendered);
    } else {
        let want_color = stdout().is_terminal() && !matches!(color, ColorChoice::Never);
        println!(
            "{}",
            report::summary(&outcome, options.area_threshold, want_color)
        );
    }
    Ok(())
}

fn run_schema() -> anyhow::Result<()> {
    let schema = DetectionResponse::json_schema();
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn main() {
    let color = detect_color_choice();
    let matches = Cli::command().color(color).get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    init_logging(cli.verbose);

    let config = CliConfig::load();
    let result = match cli.command {
        Some(Commands::Prepare(args)) => run_prepare(args, &config),
        Some(Commands::Interpret(args)) => run_interpret(args, &config, color),
        Some(Commands::Schema) => run_schema(),
        None => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
