//! The `health` subcommand: a one-shot diagnostic dump of §4.4.7's
//! health aggregation, printed as JSON to stdout. This process never has
//! an `AgentRegistry` colocated (that only exists inside a running
//! `model-container`/`reconcile` process), so its camera section always
//! reports `null` ("not integrated"), per §4.4.7.

use base::Error;
use bpaf::Bpaf;
use core_::config::Config;
use core_::container::health;

/// Prints a one-shot health report for every discovered heartbeat file.
#[derive(Bpaf, Debug)]
#[bpaf(command("health"))]
pub struct Args {}

pub fn run(_args: Args) -> Result<i32, Error> {
    let config = Config::from_env();
    let reports = health::scan_heartbeats(std::path::Path::new(&config.socket_dir));
    let body = serde_json::json!({
        "models": reports,
        "cameras": health::camera_reports(None),
    });
    println!("{}", serde_json::to_string_pretty(&body).expect("health report serializes"));
    Ok(0)
}
