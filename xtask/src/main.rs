// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::{env, path::PathBuf};

use anyhow::anyhow;
use clap::CommandFactory;
use xrdsst::config::Config;

const TASKS: [&str; 2] = ["manual", "example-config"];

fn main() -> anyhow::Result<()> {
    match env::args()
        .nth(1)
        .ok_or(anyhow!("Must provide a task"))?
        .as_str()
    {
        "manual" => generate_manual(),
        "example-config" => generate_example_config(),
        _ => Err(anyhow!("Unknown task, use one of {:?}", TASKS)),
    }
}

fn root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../")
}

fn generate_manual() -> anyhow::Result<()> {
    let outdir = root().join("xrdsst/docs/");
    std::fs::create_dir_all(&outdir)?;
    let command = xrdsst::cli::Cli::command();
    let manual = clap_mangen::Man::new(command);
    manual.generate_to(outdir)?;

    Ok(())
}

/// Regenerate the example configuration document from the built-in defaults.
fn generate_example_config() -> anyhow::Result<()> {
    let path = root().join("xrdsst/config/example.yaml");
    let document = format!(
        "# An example xrdsst configuration document.\n#\n# Generated by `cargo run -p xtask -- example-config`.\n{}",
        Config::default()
    );
    std::fs::write(&path, document)?;
    println!("Wrote {}", path.display());

    Ok(())
}
