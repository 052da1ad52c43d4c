//! LH-024: CLI subcommands.

use crate::core::{fingerprint, manifest, orchestrator, parser, types};
use crate::driver::recording::LogDriver;
use crate::driver::run_on_driver;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a template plan request
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a plan request without planning it
    Validate {
        /// Path to the request (YAML, or TOML by extension)
        #[arg(short, long, default_value = "liquidplan.yaml")]
        file: PathBuf,
    },

    /// Plan a request and print a summary
    Plan {
        /// Path to the request (YAML, or TOML by extension)
        #[arg(short, long, default_value = "liquidplan.yaml")]
        file: PathBuf,

        /// Write the input manifest into this directory
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Export terminal instructions as JSON
        #[arg(long)]
        instructions: Option<PathBuf>,

        /// Print the plan fingerprint
        #[arg(long)]
        fingerprint: bool,
    },

    /// Plan a request and send it to the logging driver
    Run {
        /// Path to the request (YAML, or TOML by extension)
        #[arg(short, long, default_value = "liquidplan.yaml")]
        file: PathBuf,
    },

    /// Print the JSON schema of a plan request
    Schema,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            manifest,
            instructions,
            fingerprint,
        } => cmd_plan(&file, manifest.as_deref(), instructions.as_deref(), fingerprint),
        Commands::Run { file } => cmd_run(&file),
        Commands::Schema => cmd_schema(),
    }
}

const TEMPLATE: &str = r#"version: "1.0"
name: my-run
description: "Planned by liquidplan"

policy:
  carry_volume: 0.5
  input_plate_types: [pcrplate_skirted]
  output_plate_types: [pcrplate]

liquids:
  water: {}
  dna: { name: dna_part, type: single_channel }

operations:
  - id: first-mix
    mix:
      components:
        - { liquid: water, volume: 50 }
        - { liquid: dna, volume: 25 }
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let request_path = path.join("liquidplan.yaml");
    if request_path.exists() {
        return Err(format!("{} already exists", request_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create dir: {}", e))?;
    std::fs::write(&request_path, TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", request_path.display(), e))?;

    println!("Initialized liquidplan request at {}", path.display());
    println!("  Created: {}", request_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let request = parser::parse_request_file(file)?;
    let errors = parser::validate_request(&request);

    if errors.is_empty() {
        println!(
            "OK: {} ({} liquids, {} input plates, {} operations)",
            request.name,
            request.liquids.len(),
            request.input_plates.len(),
            request.operations.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse and validate a request file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<types::PlanRequest, String> {
    let request = parser::parse_request_file(file)?;
    let errors = parser::validate_request(&request);
    if errors.is_empty() {
        return Ok(request);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err("validation failed".to_string())
}

fn plan_file(file: &Path) -> Result<orchestrator::Plan, String> {
    let request = parse_and_validate(file)?;
    orchestrator::plan_request(&request).map_err(|e| e.to_string())
}

/// Display a plan to stdout.
fn print_plan(plan: &orchestrator::Plan) {
    println!(
        "Planning: {} ({} operations, {} stages)",
        plan.name,
        plan.ops.len(),
        plan.chain.len()
    );
    println!();

    if !plan.allocations.is_empty() {
        println!("Inputs to load:");
        for a in &plan.allocations {
            println!(
                "  + {:.2} ul {} in {} well(s) of {}",
                a.supply, a.liquid, a.wells, a.plate_type
            );
        }
        println!();
    }
    for id in &plan.inflated {
        if let Some(product) = plan.ops.get(id).and_then(|o| o.product()) {
            println!("  ~ {} raised to {:.2} ul", id, product.volume);
        }
    }
    for d in &plan.diagnostics {
        println!("  ! {}", d);
    }
    for (before, after) in plan.id_map.iter() {
        println!("  {} ends as {}", before, after);
    }

    println!(
        "Plan: {} instructions ({} aspirate, {} dispense, {} message).",
        plan.instructions.len(),
        plan.count("aspirate"),
        plan.count("dispense"),
        plan.count("message")
    );
}

fn cmd_plan(
    file: &Path,
    manifest_dir: Option<&Path>,
    instructions_path: Option<&Path>,
    show_fingerprint: bool,
) -> Result<(), String> {
    let plan = plan_file(file)?;
    print_plan(&plan);

    if let Some(dir) = manifest_dir {
        let m = manifest::Manifest::from_plan(&plan);
        let path = manifest::save_manifest(dir, &m)?;
        println!("Manifest: {}", path.display());
    }
    if let Some(path) = instructions_path {
        let json = serde_json::to_string_pretty(&plan.instructions)
            .map_err(|e| format!("serialize error: {}", e))?;
        std::fs::write(path, json).map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
        println!("Instructions: {}", path.display());
    }
    if show_fingerprint {
        println!("Fingerprint: {}", fingerprint::plan_fingerprint(&plan));
    }
    Ok(())
}

fn cmd_run(file: &Path) -> Result<(), String> {
    let plan = plan_file(file)?;
    let mut driver = LogDriver::new();
    let sent = run_on_driver(&mut driver, &plan.instructions).map_err(|e| e.to_string())?;
    println!("Run complete: {} instruction(s) sent.", sent);
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(types::PlanRequest);
    let json =
        serde_json::to_string_pretty(&schema).map_err(|e| format!("serialize error: {}", e))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1.0"
name: test
liquids: { water: {}, buffer: {} }
operations:
  - id: m
    mix:
      components:
        - { liquid: water, volume: 20 }
        - { liquid: buffer, volume: 5 }
"#;

    fn write_request(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("liquidplan.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_lh024_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("run");
        cmd_init(&sub).unwrap();
        let path = sub.join("liquidplan.yaml");
        assert!(path.exists());
        cmd_validate(&path).unwrap();
    }

    #[test]
    fn test_lh024_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("liquidplan.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_lh024_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_request(dir.path(), "version: \"2.0\"\nname: \"\"\n");
        let err = cmd_validate(&path).unwrap_err();
        assert!(err.contains("validation error"));
    }

    #[test]
    fn test_lh024_plan_writes_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_request(dir.path(), VALID);
        let out = dir.path().join("out");
        let json = dir.path().join("instructions.json");
        cmd_plan(&path, Some(&out), Some(&json), true).unwrap();

        assert!(manifest::load_manifest(&out).unwrap().is_some());
        let exported: Vec<crate::instructions::Instruction> =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert!(!exported.is_empty());
    }

    #[test]
    fn test_lh024_plan_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_request(
            dir.path(),
            "version: \"1.0\"\nname: t\noperations:\n  - id: m\n    mix: { components: [ { liquid: ghost, volume: 5 } ] }\n",
        );
        assert!(cmd_plan(&path, None, None, false).is_err());
    }

    #[test]
    fn test_lh024_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_request(dir.path(), VALID);
        cmd_run(&path).unwrap();
    }

    #[test]
    fn test_lh024_dispatch() {
        dispatch(Commands::Schema).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_request(dir.path(), VALID);
        dispatch(Commands::Validate { file: path }).unwrap();
    }
}
