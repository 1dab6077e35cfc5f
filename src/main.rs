use base::Error;
use bpaf::{Bpaf, Parser as _};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

mod cmds;
mod signal;

// This is either in the environment when `cargo` is invoked or set from within `build.rs`.
const VERSION: &str = env!("VERSION");

/// Ruth AI video-analytics orchestration core: frame export, stream-agent
/// FPS scheduling, reconciliation, and model-container IPC.
#[derive(Bpaf, Debug)]
#[bpaf(options, version(VERSION))]
enum Args {
    // See docstrings of `cmds::*::Args` structs for a description of the respective subcommands.
    Health(#[bpaf(external(cmds::health::args))] cmds::health::Args),
    ModelContainer(#[bpaf(external(cmds::model_container::args))] cmds::model_container::Args),
    Reconcile(#[bpaf(external(cmds::reconcile::args))] cmds::reconcile::Args),
}

impl Args {
    fn run(self) -> Result<i32, Error> {
        match self {
            Args::Health(a) => cmds::health::run(a),
            Args::ModelContainer(a) => cmds::model_container::run(a),
            Args::Reconcile(a) => cmds::reconcile::run(a),
        }
    }
}

fn main() {
    base::tracing_setup::install();

    // Get the program name from the OS (e.g. if invoked as `target/debug/ruth-ai-vas`: `ruth-ai-vas`),
    // falling back to the crate name if conversion to a path/UTF-8 string fails.
    // `bpaf`'s default logic is similar but doesn't have the fallback.
    let progname = std::env::args_os().next().map(PathBuf::from);
    let progname = progname
        .as_deref()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .unwrap_or(env!("CARGO_PKG_NAME"));

    let args = match args()
        .fallback_to_usage()
        .run_inner(bpaf::Args::current_args().set_name(progname))
    {
        Ok(a) => a,
        Err(e) => std::process::exit(e.exit_code()),
    };
    tracing::trace!("Parsed command-line arguments: {args:#?}");

    match args.run() {
        Err(e) => {
            error!(err = %e.chain(), "exiting due to error");
            ::std::process::exit(1);
        }
        Ok(rv) => {
            debug!("exiting with status {}", rv);
            std::process::exit(rv)
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn bpaf_invariants() {
        super::args().check_invariants(false);
    }
}
