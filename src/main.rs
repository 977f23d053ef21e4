//! iptacl - iptables ACL rule compiler
//!
//! # Usage
//!
//! ```bash
//! # Show the entry image for a rule without touching the kernel
//! iptacl compile --protocol tcp --port 22 --action ACCEPT --source 10.0.0.0/8
//! iptacl compile --protocol icmp --action DROP --json
//!
//! # Install the rules of an ACL file, wait for Enter, remove them again
//! sudo iptacl apply --file acl.json
//!
//! # Same against an in-memory table
//! iptacl apply --file acl.json --dry-run
//!
//! # Install and leave the rules in place
//! sudo iptacl apply --keep
//! ```

use clap::{ArgAction, Parser, Subcommand};
use iptacl::audit::AuditLog;
use iptacl::config::{self, AclConfig};
use iptacl::core::blob::{BlobLayout, RuleBlob};
use iptacl::core::error::{Error, IptcErrorPattern};
use iptacl::core::memory::MemoryBackend;
use iptacl::core::transaction::TableBackend;
use iptacl::registry::AclRuleManager;
use iptacl::{utils, validators};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, debug, warn};

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "iptacl")]
#[command(version = build::PKG_VERSION)]
#[command(about = "Compile and install iptables ACL rules", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to iptacl.log in the state directory instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a rule entry and print its layout
    Compile {
        /// tcp, udp or icmp
        #[arg(long, default_value = "tcp")]
        protocol: String,
        /// Destination port, or "all"
        #[arg(long, default_value = "all")]
        port: String,
        /// Target name
        #[arg(long, default_value = "ACCEPT")]
        action: String,
        /// Source address, a.b.c.d or a.b.c.d/len
        #[arg(long)]
        source: Option<String>,
        /// Ingress interface
        #[arg(long)]
        iface: Option<String>,
        #[arg(long, default_value = "rule")]
        name: String,
        /// Print JSON instead of a hex dump
        #[arg(long)]
        json: bool,
    },
    /// Install every rule of an ACL file into filter/INPUT
    Apply {
        /// ACL file (default: acl.json in the config directory)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
        /// Use an in-memory table instead of the kernel
        #[arg(long)]
        dry_run: bool,
        /// Leave the rules installed on exit
        #[arg(long)]
        keep: bool,
    },
}

fn main() -> ExitCode {
    let _ = utils::ensure_dirs();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file);
    debug!(
        version = build::PKG_VERSION,
        commit = build::SHORT_COMMIT,
        "iptacl starting"
    );

    let result = match cli.command {
        Commands::Compile {
            protocol,
            port,
            action,
            source,
            iface,
            name,
            json,
        } => {
            let acl = AclConfig {
                name,
                physical_port: iface.unwrap_or_default(),
                action,
                ip_addr: source.unwrap_or_default(),
                protocol,
                port,
            };
            handle_compile(&acl, json)
        }
        Commands::Apply {
            file,
            dry_run,
            keep,
        } => handle_apply(file, dry_run, keep),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, to_file: bool) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    if to_file
        && let Some(mut log_path) = utils::get_state_dir()
    {
        log_path.push("iptacl.log");
        if let Ok(file) = std::fs::File::create(log_path) {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn report_error(e: &Error) {
    eprintln!("✗ {e}");
    if let Some(failure) = e.iptc_failure() {
        let translation = IptcErrorPattern::match_error(&failure.message);
        eprintln!("  {}", translation.user_message);
        for suggestion in translation.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

fn handle_compile(acl: &AclConfig, json: bool) -> Result<(), Error> {
    let (kind, spec) = acl.to_rule_spec()?;
    if let Some(iface) = spec.physical_port.as_deref()
        && !validators::interface_exists(iface)
    {
        warn!("Interface '{iface}' does not exist on this host");
    }

    let blob = RuleBlob::build(kind, &spec)?;
    let layout = BlobLayout::for_kind(kind);

    if json {
        let out = serde_json::json!({
            "name": spec.name,
            "protocol": kind.as_str(),
            "protocol_number": blob.protocol_number(),
            "source": blob.source().to_string(),
            "source_mask": blob.source_mask().to_string(),
            "in_interface": blob.in_interface(),
            "match": blob.match_name(),
            "match_size": blob.match_size(),
            "target": blob.target_name(),
            "target_size": blob.target_size(),
            "target_offset": blob.target_offset(),
            "next_offset": blob.next_offset(),
            "fingerprint": blob.fingerprint(),
            "bytes": blob.as_bytes().iter().map(|b| format!("{b:02x}")).collect::<String>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Rule '{}' ({kind}, protocol {})", spec.name, blob.protocol_number());
    println!("  source:        {}/{}", blob.source(), blob.source_mask());
    let iface = blob.in_interface();
    println!(
        "  in interface:  {}",
        if iface.is_empty() { "any" } else { iface.as_str() }
    );
    println!(
        "  entry:         0..{} ({} bytes)",
        layout.entry, layout.entry
    );
    println!(
        "  match '{}':    {}..{} ({} bytes)",
        blob.match_name(),
        layout.entry,
        layout.target_offset(),
        blob.match_size()
    );
    println!(
        "  target '{}': {}..{} ({} bytes)",
        blob.target_name(),
        blob.target_offset(),
        blob.next_offset(),
        blob.target_size()
    );
    println!("  sha256:        {}", blob.fingerprint());
    println!();
    print!("{}", utils::hex_dump(blob.as_bytes()));
    Ok(())
}

fn handle_apply(file: Option<PathBuf>, dry_run: bool, keep: bool) -> Result<(), Error> {
    let path = file
        .or_else(config::default_acl_path)
        .ok_or_else(|| Error::Validation {
            field: "file".to_string(),
            message: "No ACL file given and no config directory found".to_string(),
        })?;
    let acl = config::load_acl_file(&path)?;

    for rule in &acl.rules {
        let iface = rule.physical_port.trim();
        if !iface.is_empty() && !validators::interface_exists(iface) {
            warn!(rule = %rule.name, "Interface '{iface}' does not exist on this host");
        }
    }

    let audit = AuditLog::new().ok();

    if dry_run {
        println!("Dry run: using an in-memory filter table");
        return run_apply(
            MemoryBackend::with_filter_table(),
            &acl.rules,
            keep,
            audit,
            std::io::stdin().lock(),
        );
    }
    apply_to_kernel(&acl.rules, keep, audit)
}

#[cfg(feature = "libiptc")]
fn apply_to_kernel(rules: &[AclConfig], keep: bool, audit: Option<AuditLog>) -> Result<(), Error> {
    use iptacl::core::libiptc::{IptcBackend, has_table_privileges};

    if !has_table_privileges() {
        println!("Note: not running as root; the kernel will likely refuse the changes.");
    }
    run_apply(IptcBackend, rules, keep, audit, std::io::stdin().lock())
}

#[cfg(not(feature = "libiptc"))]
fn apply_to_kernel(
    _rules: &[AclConfig],
    _keep: bool,
    _audit: Option<AuditLog>,
) -> Result<(), Error> {
    Err(Error::BackendUnavailable(
        "built without the 'libiptc' feature; use --dry-run".to_string(),
    ))
}

/// Installs `rules`, then removes them once a line is read from `confirm`.
///
/// A failed read still removes the rules; dropping the registry would lose
/// the images needed to delete them.
fn run_apply<B: TableBackend>(
    backend: B,
    rules: &[AclConfig],
    keep: bool,
    audit: Option<AuditLog>,
    mut confirm: impl BufRead,
) -> Result<(), Error> {
    let mut registry = AclRuleManager::new(backend);
    if let Some(audit) = audit {
        registry = registry.with_audit(audit);
    }

    let report = registry.add_all(rules);
    for name in &report.installed {
        println!("✓ Installed '{name}'");
    }
    for (name, e) in &report.failed {
        eprint!("Rule '{name}': ");
        report_error(e);
    }

    if keep {
        println!("{} rule(s) left installed.", registry.len());
        return finish(report.failure_count());
    }

    println!("Press Enter to remove the installed rules...");
    let mut line = String::new();
    if let Err(e) = confirm.read_line(&mut line) {
        warn!("Cannot read from stdin ({e}); removing rules now");
    }

    let failed = registry.delete_all();
    for (name, e) in &failed {
        eprint!("Rule '{name}' still installed: ");
        report_error(e);
    }
    if failed.is_empty() {
        println!("✓ All rules removed.");
    }
    finish(report.failure_count() + failed.len())
}

fn finish(failures: usize) -> Result<(), Error> {
    if failures == 0 {
        Ok(())
    } else {
        Err(Error::Validation {
            field: "rules".to_string(),
            message: format!("{failures} rule operation(s) failed"),
        })
    }
}
