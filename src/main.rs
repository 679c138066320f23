//! hyp-provision CLI - container environment provisioner
//!
//! Usage: hyp-provision <COMMAND>
//!
//! Commands:
//!   run     Execute the full provisioning sequence (requires root)
//!   plan    Show every action the sequence would take, without mutating anything
//!   verify  Check the post-build invariants of a provisioned environment

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use hyp_provision::{
    verify_environment, BuildLock, Config, HostSystem, PlanSystem, ProvisionPipeline,
    ProvisionReceipt, System,
};

/// hyp-provision - container environment provisioner
#[derive(Parser, Debug)]
#[command(name = "hyp-provision")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format for CI
    #[arg(long, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute the full provisioning sequence (requires root)
    Run {
        /// Path to provision.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Command to exec as the unprivileged identity after a
        /// successful run, e.g. `-- supervisord -n`
        #[arg(last = true)]
        handoff: Vec<String>,
    },

    /// Show every action the sequence would take, without mutating anything
    Plan {
        /// Path to provision.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check the post-build invariants of a provisioned environment
    Verify {
        /// Path to provision.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, handoff } => cmd_run(config.as_deref(), &handoff, cli.json),
        Commands::Plan { config } => cmd_plan(config.as_deref(), cli.json),
        Commands::Verify { config } => cmd_verify(config.as_deref(), cli.json),
    }
}

fn cmd_run(config_path: Option<&std::path::Path>, handoff: &[String], json: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let sys = HostSystem::new();

    if sys.effective_uid() != 0 {
        anyhow::bail!(
            "provisioning requires root privileges; rerun as root (plan and verify do not)"
        );
    }

    let lock_path = BuildLock::path_for(&config.identity.home);
    let _lock = BuildLock::acquire(&lock_path)?;

    let mut receipt = ProvisionReceipt::new(false);
    let pipeline = ProvisionPipeline::new(&sys, &config);

    match pipeline.run(&mut receipt) {
        Ok(ctx) => {
            if json {
                println!("{}", receipt.to_json());
            } else {
                print!("{}", receipt.render_human());
                println!(
                    "✓ environment ready for {} at {}",
                    ctx.identity.display_owner(),
                    ctx.root.display()
                );
            }

            if !handoff.is_empty() {
                return exec_handoff(handoff, &ctx);
            }
            Ok(())
        }
        Err(err) => {
            // Show what completed before the abort, then fail
            if json {
                eprintln!("{}", receipt.to_json());
            } else {
                eprint!("{}", receipt.render_human());
            }
            Err(err.into())
        }
    }
}

/// Replace this process with the handoff command. Runs after the privilege
/// drop, so the command starts as the unprivileged identity with the
/// exported environment. Only returns on failure.
fn exec_handoff(handoff: &[String], ctx: &hyp_provision::BuildContext) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let err = std::process::Command::new(&handoff[0])
        .args(&handoff[1..])
        .current_dir(&ctx.root)
        .envs(ctx.env_pairs())
        .exec();
    Err(anyhow::anyhow!("exec of '{}' failed: {err}", handoff[0]))
}

fn cmd_plan(config_path: Option<&std::path::Path>, json: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let sys = PlanSystem::new();

    let mut receipt = ProvisionReceipt::new(true);
    let pipeline = ProvisionPipeline::new(&sys, &config);
    pipeline.run(&mut receipt)?;

    if json {
        println!("{}", receipt.to_json());
    } else {
        print!("{}", receipt.render_human());
    }
    Ok(())
}

fn cmd_verify(config_path: Option<&std::path::Path>, json: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let violations = verify_environment(&config);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&violations).unwrap_or_default()
        );
    } else if violations.is_empty() {
        println!(
            "✓ environment verified: {} owns {} and all service runtime paths",
            config.identity.user,
            config.identity.home.display()
        );
    } else {
        for violation in &violations {
            println!("✗ [{}] {}", violation.invariant, violation.detail);
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} invariant violation(s)", violations.len());
    }
}
