//! # CRD Generator
//!
//! Prints the `DatabaseProject`, `DatabaseDeployment` and `DatabaseUser`
//! CustomResourceDefinitions as a multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/connection-secrets.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use connection_secret_controller::crd::{DatabaseDeployment, DatabaseProject, DatabaseUser};
use kube::core::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        DatabaseProject::crd(),
        DatabaseDeployment::crd(),
        DatabaseUser::crd(),
    ];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
