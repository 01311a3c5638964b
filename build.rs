//! Renders the `wirehop(1)` manual page from the demo CLI definition.
//!
//! The page is written to `$OUT_DIR/man/wirehop.1` so packaging steps can pick
//! it up without the build touching the source tree.

use std::{env, fs, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let man_dir = PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR is not set")?).join("man");
    fs::create_dir_all(&man_dir)?;

    let mut page = Vec::new();
    Man::new(cli::Cli::command()).render(&mut page)?;
    fs::write(man_dir.join("wirehop.1"), page)?;

    Ok(())
}
