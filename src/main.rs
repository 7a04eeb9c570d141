use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rsmake::{Config, MakeError, PROGRAM};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Read FILE as a makefile
    #[arg(short, long, value_name = "FILE")]
    file: Vec<PathBuf>,

    /// Number of jobs to run at once
    #[arg(short = 'j', long, default_value_t = 1)]
    jobs: usize,

    /// Change to DIR before doing anything
    #[arg(short = 'C', long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Don't echo recipes
    #[arg(short, long)]
    silent: bool,

    /// Ignore errors from recipes
    #[arg(short, long)]
    ignore_errors: bool,

    /// Print recipes without running them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Keep going when some targets can't be made
    #[arg(short, long)]
    keep_going: bool,

    /// Consider every target out of date
    #[arg(short = 'B', long)]
    always_make: bool,

    /// Print debugging information
    #[arg(short, long)]
    debug: bool,

    /// Goals to build and NAME=value variable assignments
    words: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<Config, MakeError> {
        let cwd = std::env::current_dir()?;
        let directory = match self.directory {
            Some(dir) => cwd.join(dir),
            None => cwd,
        };
        let mut config = Config::new(directory);
        config.makefiles = self.file;
        config.jobs = self.jobs;
        config.silent = self.silent;
        config.ignore_errors = self.ignore_errors;
        config.dry_run = self.dry_run;
        config.keep_going = self.keep_going;
        config.always_make = self.always_make;
        config.debug = self.debug;
        for word in &self.words {
            config.add_word(word);
        }
        config.environment = std::env::vars().collect();
        if let Ok(flags) = std::env::var("MAKEFLAGS") {
            config.merge_makeflags(&flags);
        }
        Ok(config)
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Args = Parser::parse();
    init_tracing(args.debug);

    let result = match args.into_config() {
        Ok(config) => rsmake::run(&config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: *** {}.  Stop.", PROGRAM, e);
            ExitCode::from(2)
        }
    }
}
