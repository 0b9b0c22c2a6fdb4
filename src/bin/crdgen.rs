//! # CRD Generator
//!
//! Prints the `Extension` CustomResourceDefinition the controller watches.
//!
//! Gardener installs this CRD itself; the output is meant for local clusters
//! and tests.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/extension.yaml
//! ```

use audit_extension::crd::Extension;
use kube::core::CustomResourceExt;

fn main() {
    let crd = Extension::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            println!("# This file is auto-generated by crdgen");
            println!("# DO NOT EDIT THIS FILE MANUALLY");
            println!("---");
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
