use ariadne::{Color, Config, IndexType, Label, Report, ReportKind, Source};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use kinship_driver::logging::init_logging;
use kinship_driver::{
    analyse, pack, BundleReader, KinshipError, PackOptions, Segment, CORE_DIR_ENV,
};
use kinship_scan::scan;

#[derive(Parser)]
#[command(
    name = "kinship",
    version,
    about = "Bundles CommonJS modules into a single browser script",
    long_about = "Packs CommonJS modules, their node_modules dependencies and browser\n\
                  polyfills of host modules into one self-describing script."
)]
struct Cli {
    /// More logs on stderr (-v: info, -vv: debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack modules and packages into a bundle
    Pack {
        #[command(flatten)]
        graph: GraphArgs,

        /// Output file path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Require the entry module once the bundle is loaded
        #[arg(short = 'x', long)]
        execute: bool,

        /// Bind the entry module's exports to this global name
        #[arg(short = 'm', long, value_name = "NAME")]
        expose_main: Option<String>,

        /// Bind the bundle's require() to globalThis.require
        #[arg(short = 'r', long)]
        expose_require: bool,

        /// Emit an ES module exporting the entry module by default
        #[arg(long)]
        esm: bool,

        /// Manifest whose name and version go in the bundle header
        #[arg(short = 'p', long, value_name = "PACKAGE_JSON")]
        manifest: Option<PathBuf>,

        /// Drop comments and collapse whitespace in code modules
        #[arg(short, long)]
        shrink: bool,
    },

    /// List the packages and modules a pack would contain
    Analyse {
        #[command(flatten)]
        graph: GraphArgs,
    },

    /// Show the header of a bundle
    Info {
        /// Bundle file
        bundle: PathBuf,
    },

    /// Extract a module or package declaration from a bundle
    Extract {
        /// Bundle file
        bundle: PathBuf,

        /// Module id, package id, alias id or package name; lists every
        /// segment when omitted
        key: Option<String>,

        /// Print the whole segment as JSON instead of the module body
        #[arg(long)]
        json: bool,
    },

    /// Scan a file and show its spans (debug)
    Scan {
        /// Input JavaScript file
        input: PathBuf,

        /// Show span positions
        #[arg(short, long)]
        positions: bool,
    },
}

/// Options shared by every command building a module graph.
#[derive(Args)]
struct GraphArgs {
    /// Module files, package directories or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Follow static require() calls
    #[arg(short, long)]
    discover: bool,

    /// Directory every id is relative to (computed from inputs otherwise)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Directory whose node_modules holds the core polyfill packages
    #[arg(long, env = CORE_DIR_ENV)]
    core_dir: Option<PathBuf>,
}

impl GraphArgs {
    fn into_options(self) -> PackOptions {
        let mut options = PackOptions::new(self.inputs).with_discovery(self.discover);
        if let Some(root) = self.root {
            options = options.with_root(root);
        }
        if let Some(core_dir) = self.core_dir {
            options = options.with_core_dir(core_dir);
        }
        options
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("warning: logging is disabled: {err}");
    }

    let result = match cli.command {
        Commands::Pack {
            graph,
            output,
            execute,
            expose_main,
            expose_require,
            esm,
            manifest,
            shrink,
        } => {
            let mut options = graph
                .into_options()
                .with_execute(execute)
                .with_expose_require(expose_require)
                .with_esm(esm)
                .with_shrink(shrink);
            if let Some(name) = expose_main {
                options = options.with_expose_main(name);
            }
            if let Some(manifest) = manifest {
                options = options.with_manifest(manifest);
            }
            if let Some(output) = output {
                options = options.with_output(output);
            }
            pack_command(&options)
        }
        Commands::Analyse { graph } => analyse_command(&graph.into_options()),
        Commands::Info { bundle } => info_command(bundle),
        Commands::Extract { bundle, key, json } => extract_command(bundle, key, json),
        Commands::Scan { input, positions } => return scan_command(input, positions),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn pack_command(options: &PackOptions) -> Result<(), KinshipError> {
    let bundle = pack(options)?;
    if options.output.is_none() {
        print!("{bundle}");
    }
    Ok(())
}

fn analyse_command(options: &PackOptions) -> Result<(), KinshipError> {
    let analysis = analyse(options)?;
    println!("{}", to_json(&analysis)?);
    Ok(())
}

fn info_command(bundle: PathBuf) -> Result<(), KinshipError> {
    let text = read_bundle(&bundle)?;
    let reader = BundleReader::new(&text)?;
    println!("{}", to_json(reader.header())?);
    Ok(())
}

fn extract_command(bundle: PathBuf, key: Option<String>, json: bool) -> Result<(), KinshipError> {
    let text = read_bundle(&bundle)?;
    let reader = BundleReader::new(&text)?;

    let Some(key) = key else {
        for segment in reader.segments()? {
            let kind = match segment {
                Segment::Package(_) => "package",
                Segment::Module(_) => "module",
            };
            println!("{kind:8} {}", segment.id());
        }
        return Ok(());
    };

    let segment = reader.find(&key)?;
    match &segment {
        Segment::Module(module) if !json => println!("{}", module.body),
        _ => println!("{}", to_json(&segment)?),
    }
    Ok(())
}

fn scan_command(input: PathBuf, positions: bool) -> ExitCode {
    let source = match fs::read_to_string(&input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: can't read {}: {}", input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let filename = input.to_string_lossy().to_string();

    let tokens = match scan(&source) {
        Ok(tokens) => tokens,
        Err(error) => {
            let span = error.span();
            report_error("E001", "Scan error", &error.to_string(), span.start, span.end, &filename, &source);
            return ExitCode::FAILURE;
        }
    };

    println!("Spans for {}:\n", filename);
    println!("{}", "=".repeat(80));

    for (i, token) in tokens.iter().enumerate() {
        if positions {
            println!(
                "{:4} | {:10} | {:?} | {}..{}",
                i,
                token.kind.as_str(),
                token.text,
                token.span.start,
                token.span.end
            );
        } else {
            println!("{:4} | {:10} | {:?}", i, token.kind.as_str(), token.text);
        }
    }

    println!("{}", "=".repeat(80));
    println!("\nTotal spans: {}", tokens.len());

    ExitCode::SUCCESS
}

fn read_bundle(path: &PathBuf) -> Result<String, KinshipError> {
    fs::read_to_string(path).map_err(|e| KinshipError::io(path, e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, KinshipError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| KinshipError::internal(format!("can't serialize output: {e}")))
}

fn report(err: &KinshipError) {
    match err {
        KinshipError::Scan {
            path,
            source_text,
            error,
        } => {
            let span = error.span();
            let filename = path.to_string_lossy();
            report_error("E001", "Scan error", &error.to_string(), span.start, span.end, &filename, source_text);
        }
        err if err.is_user_error() => eprintln!("error: {err}"),
        err => eprintln!("internal error: {err:?}"),
    }
}

fn report_error(code: &str, title: &str, message: &str, start: usize, end: usize, filename: &str, source: &str) {
    let span = (filename, start..end);
    let printed = Report::build(ReportKind::Error, span.clone())
        .with_config(Config::default().with_index_type(IndexType::Byte))
        .with_code(code)
        .with_message(title)
        .with_label(
            Label::new(span)
                .with_message(message)
                .with_color(Color::Red),
        )
        .finish()
        .eprint((filename, Source::from(source)));

    if printed.is_err() {
        eprintln!("error: {filename}: {message}");
    }
}
