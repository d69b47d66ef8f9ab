#![allow(missing_docs)]

use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};

fn git_revision() -> Option<String> {
    let cmd = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .stderr(Stdio::inherit())
        .output()
        .ok()?;

    if !cmd.status.success() {
        return None;
    }

    Some(String::from_utf8_lossy(&cmd.stdout).trim().to_owned())
}

fn emit_release_var() {
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_default();
    match git_revision() {
        Some(revision) => println!("cargo:rustc-env=PIPEWATCH_RELEASE=pipewatch@{version}+{revision}"),
        None => println!("cargo:rustc-env=PIPEWATCH_RELEASE=pipewatch@{version}"),
    }
}

fn list_crates() -> io::Result<Vec<String>> {
    let mut crates = Vec::new();

    for result in fs::read_dir("../")? {
        let entry = result?;

        if !entry.file_type()?.is_dir() {
            continue;
        }

        if let Some(s) = entry.file_name().to_str() {
            if s.starts_with("pipewatch") {
                crates.push(s.replace('-', "_"));
            }
        }
    }

    crates.sort();
    Ok(crates)
}

fn emit_crate_list() -> io::Result<()> {
    let crates = list_crates()?;

    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let dest_path = Path::new(&out_dir).join("constants.gen.rs");
    let mut f = File::create(dest_path)?;

    write!(f, "const CRATE_NAMES: &[&str] = &[")?;
    for name in &crates {
        write!(f, "\"{name}\",")?;
    }
    writeln!(f, "];")?;

    Ok(())
}

fn main() {
    emit_release_var();
    emit_crate_list().unwrap();
    println!("cargo:rerun-if-changed=build.rs");
}
