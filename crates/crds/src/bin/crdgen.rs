//! Prints the CRD manifests owned by this repository as a multi-document YAML stream.

use crds::{Agent, ClusterDeployment};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let manifests = [Agent::crd(), ClusterDeployment::crd()];
    for crd in &manifests {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
