//! configurator: applies configuration artifacts for the platform
//!
//! ## Usage
//! ```text
//! configurator                                   # boot pass, all types
//! configurator run [types...]                    # boot pass, selected types
//! configurator scan <id> <app|service> <system|third-party>
//! configurator rescan <id> <app|service> <system|third-party>
//! configurator unconfigure <id> <app|service> <system|third-party> [types...]
//! ```
//!
//! Types are `dbkinds`, `dbpermissions`, `filecache` and `activities`.
//!
//! ## Configuration
//! - CONFIGURATOR_CONFIG: Path to a YAML config file (optional)
//! - CONFIGURATOR__TRANSPORT__BASE_URL: Service bus bridge
//! - CONFIGURATOR_LOG: Log filter (default: info)

use std::sync::Arc;

use tracing::{error, info};

use configurator::bus::{HttpServiceBus, ServiceBus};
use configurator::cache::StampCache;
use configurator::config::Config;
use configurator::plan::{PassPlanner, PassRequest};
use configurator::runner::PassRunner;
use configurator::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let request = PassRequest::from_args(&args)?;
    let config = Config::load(None)?;

    let bus: Arc<dyn ServiceBus> = Arc::new(HttpServiceBus::from_config(&config.transport)?);
    let cache = StampCache::from_config(&config.cache);
    let planner = PassPlanner::new(config.layout.clone(), cache, bus);

    let mut runner = PassRunner::new();
    planner.plan(&request, &mut runner);
    info!(engines = runner.engine_count(), request = ?request, "configurator started");

    let summary = runner.run().await;
    println!("{}", summary.reply());

    if !summary.is_success() {
        error!("Configuration pass did not fully succeed");
        std::process::exit(1);
    }
    Ok(())
}
