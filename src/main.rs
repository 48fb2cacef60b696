//! # Connection Secret Controller
//!
//! A Kubernetes controller that turns `DatabaseDeployment` and `DatabaseUser`
//! resources into ready-to-use connection secrets.
//!
//! For every deployment/user pair in the same project the controller keeps one
//! secret named `<project>-<cluster>-<username>` in the user's namespace,
//! holding the username, password and credential-bearing connection strings.
//! Secrets are deleted when either side disappears, the user expires or falls
//! out of scope, and orphans are swept project-wide.

use anyhow::Result;
use connection_secret_controller::runtime::initialization::initialize;
use connection_secret_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init).await
}
