use backup_digest::mailbox::{parse_eml, MailDirSource};
use backup_digest::notify::{ConsoleNotifier, HtmlNotifier, Notifier};
use backup_digest::registry::CsvRegistry;
use backup_digest::sink::{CsvReportSink, ReportSink};
use backup_digest::{Config, Engine, Inspection, Registry};
use chrono::{DateTime, Local};
use clap::{Arg, Command};
use log::LevelFilter;
use std::path::PathBuf;
use std::process;

const DEFAULT_CONFIG_PATH: &str = "/etc/backup-digest.yaml";

fn main() {
    let matches = Command::new("backup-digest")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Daily backup report digest")
        .long_about("backup-digest - Classifies backup notification emails per client:\n\
                    • Registry-driven client matching with brand detectors\n\
                    • OK / NOK / Missing status per registered client\n\
                    • Group reports, multi-channel clients and cloud summaries\n\
                    • CSV audit log and HTML digest with status chart")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and the client registry")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test-email")
                .long("test-email")
                .value_name("FILE")
                .help("Match and classify a single .eml file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("now")
                .long("now")
                .value_name("RFC3339")
                .help("Run as if the current time were this instant")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the digest to this file instead of the configured location")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Digest format (text, json, html)")
                .value_parser(["text", "json", "html"])
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging with per-message decisions")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Initialize logger based on verbose flag
    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if let Some(email_file) = matches.get_one::<String>("test-email") {
        test_email_file(&config, email_file);
        return;
    }

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    let now = match matches.get_one::<String>("now") {
        Some(value) => match DateTime::parse_from_rfc3339(value) {
            Ok(at) => at.with_timezone(&Local),
            Err(e) => {
                eprintln!("❌ Invalid --now value '{value}': {e}");
                process::exit(1);
            }
        },
        None => Local::now(),
    };

    let registry = match Registry::load(&CsvRegistry::new(&config.registry_path)) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("❌ Failed to load client registry: {e}");
            process::exit(1);
        }
    };
    if registry.is_empty() {
        log::warn!("Client registry is empty, every client will be reported as unknown");
    }

    let output = matches.get_one::<String>("output").map(PathBuf::from);
    let format = matches.get_one::<String>("format").map(String::as_str);
    let notifier = match build_notifier(&config, format, output) {
        Ok(notifier) => notifier,
        Err(e) => {
            eprintln!("❌ {e}");
            process::exit(1);
        }
    };

    let engine = Engine::new(&config, &registry);
    let source = MailDirSource::new(&config.mailbox_dir);
    let mut audit = CsvReportSink::new(&config.audit_log_path);
    let mut archive = config.group_archive_path.as_ref().map(CsvReportSink::new);

    log::info!("Starting backup digest run...");
    match engine.run(
        &source,
        &mut audit,
        archive.as_mut().map(|a| a as &mut dyn ReportSink),
        notifier.as_ref(),
        now,
    ) {
        Ok(digest) => log::info!(
            "Digest complete: {} detail lines, {} clients",
            digest.ok.len() + digest.nok.len() + digest.unknown.len(),
            digest.final_lines.len()
        ),
        Err(e) => {
            log::error!("Digest run failed: {e}");
            process::exit(1);
        }
    }
}

fn build_notifier(
    config: &Config,
    format: Option<&str>,
    output: Option<PathBuf>,
) -> anyhow::Result<Box<dyn Notifier>> {
    let notifier: Box<dyn Notifier> = match format {
        Some("json") => Box::new(ConsoleNotifier::json(output)),
        Some("text") => Box::new(ConsoleNotifier::text(output)),
        Some("html") => {
            let path = output
                .or_else(|| config.html_output_path.as_ref().map(PathBuf::from))
                .ok_or_else(|| anyhow::anyhow!("HTML output needs --output or html_output_path"))?;
            Box::new(HtmlNotifier::new(path))
        }
        Some(other) => anyhow::bail!("Unsupported format: {other}. Use text, json or html"),
        None => match (output, config.html_output_path.as_ref()) {
            (Some(path), _) => Box::new(ConsoleNotifier::text(Some(path))),
            (None, Some(path)) => Box::new(HtmlNotifier::new(path)),
            (None, None) => Box::new(ConsoleNotifier::text(None)),
        },
    };
    Ok(notifier)
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config) {
    println!("🔍 Testing configuration...");
    println!();

    if let Err(e) = config.validate() {
        println!("❌ Configuration validation failed:");
        println!("Error: {e}");
        process::exit(1);
    }

    println!("Cutoff hour: {:02}:00", config.cutoff_hour);
    println!("Family detectors: {}", config.family_detectors.len());
    for family in &config.channel_families {
        let channels: Vec<&str> = family.channels.iter().map(|c| c.client.as_str()).collect();
        println!("  {} ({:?}): {}", family.name, family.policy, channels.join(", "));
    }

    match Registry::load(&CsvRegistry::new(&config.registry_path)) {
        Ok(registry) => {
            let exact = registry.rules().iter().filter(|r| r.require_exact).count();
            println!(
                "Registry {}: {} clients ({} in exact-match mode)",
                config.registry_path,
                registry.len(),
                exact
            );
            println!("✅ Configuration validated");
        }
        Err(e) => {
            println!("❌ Failed to load client registry: {e}");
            process::exit(1);
        }
    }
}

fn test_email_file(config: &Config, email_file: &str) {
    println!("🧪 Testing email file: {}", email_file);
    println!();

    let raw = match std::fs::read(email_file) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        Err(e) => {
            eprintln!("❌ Error reading email file: {}", e);
            process::exit(1);
        }
    };

    let registry = match Registry::load(&CsvRegistry::new(&config.registry_path)) {
        Ok(registry) => registry,
        Err(e) => {
            log::warn!("Testing without client registry: {e}");
            Registry::default()
        }
    };

    let message = parse_eml(&raw, email_file, Local::now());
    println!("📧 Email Details:");
    println!("   Sender: {}", message.sender);
    println!("   Subject: {}", message.subject);
    println!("   Date: {}", message.timestamp.format("%d/%m/%Y %H:%M:%S"));
    println!();

    let engine = Engine::new(config, &registry);
    match engine.inspect(&message) {
        Inspection::Group(entries) => {
            println!("📋 Group report: {} clients", entries.len());
            for entry in &entries {
                println!("   {} - {}", entry, entry.detail);
            }
        }
        Inspection::Single {
            matched,
            client,
            status,
        } => {
            if matched.detected {
                println!("   Matched by family detector: {}", matched.client);
            } else if matched.is_unknown() {
                println!("   No registry entry scored above zero");
            } else {
                println!("   Matched by registry score {}: {}", matched.score, matched.client);
            }
            if client != matched.client {
                println!("   Rescued as: {}", client);
            }
            println!();
            let icon = match status.kind {
                backup_digest::StatusKind::Ok => "✅",
                backup_digest::StatusKind::Nok => "❌",
                _ => "⚠️ ",
            };
            println!("{} Result: {} = {}", icon, client, status);
        }
    }
}
