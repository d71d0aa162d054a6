use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use log::warn;

use site_provisioner::core::types::{DnsInstruction, ProvisioningSpec};
use site_provisioner::provisioning::{
    CertificateProvisioner, ConvergencePoller, LogProgress, ProgressEvent, ProgressSink,
    ProvisioningReport, ProvisioningState, validation_instructions,
};
use site_provisioner::{
    AwsResourceClient, CancellationToken, ProvisionerConfig, ProvisioningOrchestrator,
    converge_all,
};

/// Converges a static site's bucket, TLS certificate and CDN distribution.
#[derive(Parser, Debug)]
#[command(name = "site-provisioner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// AWS region for the storage bucket (certificates always live in us-east-1)
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or reuse the bucket, certificate and distribution for domains
    Provision {
        /// Domains to provision; several run concurrently
        #[arg(required = true)]
        domains: Vec<String>,

        #[command(flatten)]
        site: SiteArgs,

        /// Return as soon as the distribution exists instead of waiting for deployment
        #[arg(long)]
        no_wait: bool,
    },

    /// Re-upload the site and invalidate the CDN cache
    Refresh {
        domain: String,

        #[command(flatten)]
        site: SiteArgs,

        /// Paths to invalidate (default: /*)
        #[arg(long = "path")]
        paths: Vec<String>,

        /// Wait until the invalidation completes
        #[arg(long)]
        wait: bool,
    },

    /// Show what exists remotely for a domain
    Status {
        domain: String,

        #[arg(long)]
        origin_id: Option<String>,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show pending DNS validation records for a domain
    Validation { domain: String },
}

#[derive(Args, Debug)]
struct SiteArgs {
    /// Bucket name (defaults to the domain)
    #[arg(long)]
    origin_id: Option<String>,

    /// Local build directory to publish
    #[arg(long)]
    site_dir: Option<PathBuf>,

    #[arg(long, default_value = "index.html")]
    index_document: String,

    #[arg(long, default_value = "index.html")]
    error_document: String,
}

impl SiteArgs {
    fn spec(&self, domain: &str) -> anyhow::Result<ProvisioningSpec> {
        let mut spec = ProvisioningSpec::new(domain)
            .with_context(|| format!("invalid domain {domain:?}"))?
            .with_documents(&self.index_document, &self.error_document);
        if let Some(origin_id) = &self.origin_id {
            spec = spec.with_origin_id(origin_id);
        }
        if let Some(site_dir) = &self.site_dir {
            spec = spec.with_site_dir(site_dir.clone());
        }
        Ok(spec)
    }
}

/// Logs every event and prints the manual DNS steps for the operator.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: &ProgressEvent) {
        LogProgress.emit(event);
        match event {
            ProgressEvent::ValidationRecordsRequired {
                certificate_id,
                records,
            } => {
                println!("\nAdd these DNS records to validate {certificate_id}:");
                print_instructions(records);
            }
            ProgressEvent::AliasRequired(record) => {
                println!("\nPoint the domain at the distribution:");
                print_instructions(std::slice::from_ref(record));
            }
            _ => {}
        }
    }
}

fn print_instructions(records: &[DnsInstruction]) {
    for record in records {
        println!("  Type:  {}", record.record_type);
        println!("  Name:  {} ({})", record.relative_name, record.name);
        println!("  Value: {}", record.value);
        println!();
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Cancels `token` on Ctrl-C; in-flight waits stop at their next check.
fn install_interrupt_handler(token: CancellationToken) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!("[cli] cannot watch for Ctrl-C: {err}");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            warn!("[cli] interrupt received; stopping at the next wait");
            token.cancel();
        }
    });
}

fn exit_code(reports: &[ProvisioningReport]) -> ExitCode {
    if reports.iter().any(|r| r.state == ProvisioningState::Failed) {
        ExitCode::from(1)
    } else if reports.iter().any(ProvisioningReport::is_resumable) {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_report(report: &ProvisioningReport) {
    println!("{}: {}", report.domain, report.state);
    if let Some(origin) = &report.origin {
        println!("  origin:       {} ({})", origin.id, origin.website_endpoint);
    }
    if let Some(upload) = &report.upload {
        println!("  uploaded:     {} file(s), {} bytes", upload.files, upload.bytes);
    }
    if let Some(certificate) = &report.certificate {
        println!("  certificate:  {} ({})", certificate.id, certificate.status);
    }
    if let Some(distribution) = &report.distribution {
        println!(
            "  distribution: {} at {} ({})",
            distribution.id, distribution.domain_name, distribution.status
        );
    }
    if let Some(invalidation) = &report.invalidation {
        println!(
            "  invalidation: {} {:?} ({:?})",
            invalidation.id, invalidation.paths, invalidation.status
        );
    }
    for warning in &report.warnings {
        println!("  warning:      {warning}");
    }
    if let Some(err) = &report.error {
        if report.is_resumable() {
            println!("  halted:       {err}; run the same command again to resume");
        } else {
            println!("  error:        {err}");
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ProvisionerConfig::from_env();
    let client = AwsResourceClient::connect(cli.region.as_deref())
        .context("failed to initialise AWS clients")?;
    let progress = ConsoleProgress;
    let token = CancellationToken::new();
    install_interrupt_handler(token.clone());

    match cli.command {
        Commands::Provision {
            domains,
            site,
            no_wait,
        } => {
            if domains.len() > 1 && site.origin_id.is_some() {
                bail!("--origin-id can only be used with a single domain");
            }
            let mut specs = domains
                .iter()
                .map(|domain| site.spec(domain))
                .collect::<anyhow::Result<Vec<_>>>()?;
            // one orchestrator per domain; duplicates would race each other
            specs.sort_by(|a, b| a.domain.cmp(&b.domain));
            specs.dedup_by(|a, b| a.domain == b.domain);
            let config = ProvisionerConfig {
                wait_for_deployment: config.wait_for_deployment && !no_wait,
                ..config
            };

            let reports = if specs.len() == 1 {
                vec![
                    ProvisioningOrchestrator::new(&client, config, &progress)
                        .with_cancellation(token)
                        .converge(&specs[0]),
                ]
            } else {
                converge_all(&client, &config, &specs, &progress, &token)
            };
            for report in &reports {
                print_report(report);
            }
            Ok(exit_code(&reports))
        }

        Commands::Refresh {
            domain,
            site,
            paths,
            wait,
        } => {
            let spec = site.spec(&domain)?;
            let config = ProvisionerConfig {
                wait_for_invalidation: config.wait_for_invalidation || wait,
                ..config
            };
            let report = ProvisioningOrchestrator::new(&client, config, &progress)
                .with_cancellation(token)
                .refresh(&spec, &paths);
            print_report(&report);
            Ok(exit_code(std::slice::from_ref(&report)))
        }

        Commands::Status {
            domain,
            origin_id,
            json,
        } => {
            let mut spec = ProvisioningSpec::new(&domain)
                .with_context(|| format!("invalid domain {domain:?}"))?;
            if let Some(origin_id) = origin_id {
                spec = spec.with_origin_id(origin_id);
            }
            let status = ProvisioningOrchestrator::new(&client, config, &LogProgress)
                .inspect(&spec)
                .context("failed to inspect remote state")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(ExitCode::SUCCESS);
            }
            println!("{}", status.domain);
            match &status.website_endpoint {
                Some(endpoint) => println!("  origin:       {} ({})", status.origin_id, endpoint),
                None => println!("  origin:       {} (missing)", status.origin_id),
            }
            match &status.certificate {
                Some(certificate) => {
                    println!("  certificate:  {} ({})", certificate.id, certificate.status)
                }
                None => println!("  certificate:  none"),
            }
            match &status.distribution {
                Some(distribution) => println!(
                    "  distribution: {} at {} ({})",
                    distribution.id, distribution.domain_name, distribution.status
                ),
                None => println!("  distribution: none"),
            }
            if !status.dns_instructions.is_empty() {
                println!("\nDNS records:");
                print_instructions(&status.dns_instructions);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Validation { domain } => {
            let spec = ProvisioningSpec::new(&domain)
                .with_context(|| format!("invalid domain {domain:?}"))?;
            let poller = ConvergencePoller::new(token);
            let certificates = CertificateProvisioner::new(&client, &poller, &config, &LogProgress);
            match certificates
                .pending_validations(&spec.domain)
                .context("failed to look up certificates")?
            {
                Some(certificate) => {
                    println!("Certificate {} ({})", certificate.id, certificate.status);
                    let records = validation_instructions(&certificate);
                    if records.is_empty() {
                        println!("Validation records are not published yet; try again shortly.");
                    } else {
                        print_instructions(&records);
                    }
                }
                None => println!("No pending certificate for {}", spec.domain),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
