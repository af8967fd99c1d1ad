use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::fs;
use std::path::PathBuf;

use emulator::pe::{self, MACHINE_X64};
use emulator::error::ImageError;
use emulator::ImageRegistry;

/// Checks whether PE images can be run by the x86-64 image emulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PE/COFF images to inspect
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Load address used for the trial registration (hex accepted with 0x)
    #[arg(short, long, default_value = "0x10000000", value_parser = parse_address)]
    base: u64,
}

fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    println!("{}", "PE Inspect v0.1.0".bold().blue());
    println!("{}", "=====================================".blue());

    let mut accepted = 0;
    for path in &args.files {
        println!();
        println!("{} {}", "Image:".bold(), path.display().to_string().yellow());

        let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        if inspect_one(&bytes, args.base)? {
            accepted += 1;
        }
    }

    println!();
    let summary = format!("{}/{} images can be emulated", accepted, args.files.len());
    if accepted == args.files.len() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
    Ok(())
}

fn inspect_one(bytes: &[u8], base: u64) -> Result<bool> {
    let parsed = goblin::pe::PE::parse(bytes).context("Failed to parse PE headers")?;
    let machine = parsed.header.coff_header.machine;
    let optional = parsed
        .header
        .optional_header
        .context("PE image has no optional header")?;
    let subsystem = optional.windows_fields.subsystem;

    let machine_str = format!("0x{:04x}", machine);
    println!(
        "  machine:   {}",
        if machine == MACHINE_X64 { machine_str.green() } else { machine_str.red() }
    );
    let subsystem_str = format!("{} ({})", subsystem, pe::subsystem_name(subsystem));
    println!(
        "  subsystem: {}",
        if pe::is_supported_subsystem(subsystem) { subsystem_str.green() } else { subsystem_str.red() }
    );
    println!("  entry:     0x{:x}", parsed.entry);
    println!("  size:      0x{:x}", optional.windows_fields.size_of_image);

    let info = match pe::inspect(bytes) {
        Ok(info) => info,
        Err(err @ (ImageError::UnsupportedMachine(_) | ImageError::UnsupportedSubsystem(_))) => {
            println!("  {} {}", "❌".bold(), err.to_string().red());
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    };

    let mut registry = ImageRegistry::new();
    let record = registry.register(base, info.size_of_image)?;
    println!(
        "  {} registered at 0x{:x}..0x{:x}",
        "✅".bold(),
        record.base,
        record.base.saturating_add(record.size)
    );
    Ok(true)
}
