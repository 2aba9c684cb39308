use clap::{Parser, ValueEnum};
use platform_caps::core::cpuid;
use platform_caps::{
    CpuFeatures, Diagnostics, HealthStatus, ParseFeatureError, PlatformInfo, ProbeConfig,
};
use serde::Serialize;
use std::process::ExitCode;
use sysinfo::System;
use tracing::{debug, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Report the CPU features and platform properties this machine exposes.
#[derive(Parser, Debug)]
#[command(name = "platform-caps", author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Only check one feature: exit 0 if present, 1 if absent, 2 if the name
    /// is not a known feature.
    #[arg(long, value_name = "NAME")]
    feature: Option<String>,

    /// Comma separated features to treat as absent (added to PLATFORM_CAPS_DISABLE).
    #[arg(long, value_name = "NAMES")]
    disable: Option<String>,

    /// Probe the processor now instead of using the process-wide cache.
    #[arg(long)]
    fresh: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report {
    cpu_brand: String,
    vendor: Option<String>,
    max_basic_leaf: u32,
    platform: PlatformInfo,
    features: Vec<FeatureEntry>,
    health: String,
}

#[derive(Serialize)]
struct FeatureEntry {
    name: &'static str,
    supported: bool,
}

/// Outcome of `--feature NAME`; the process exit status is [`FeatureCheck::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeatureCheck {
    Present,
    Absent,
    Unknown,
}

impl FeatureCheck {
    fn code(self) -> u8 {
        match self {
            FeatureCheck::Present => 0,
            FeatureCheck::Absent => 1,
            FeatureCheck::Unknown => 2,
        }
    }
}

// Usage errors share the unknown-feature status, like clap's own.
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = probe_config(args, ProbeConfig::from_env())?;
    let features = resolve_features(&config, args.fresh);
    debug!(%features, fresh = args.fresh, "feature set");

    if let Some(name) = &args.feature {
        let check = check_feature(features, name);
        match check {
            FeatureCheck::Unknown => {
                eprintln!("error: {}", ParseFeatureError::UnknownFeature(name.clone()))
            }
            _ => {
                let shown = CpuFeatures::lookup(name)
                    .and_then(CpuFeatures::name_of)
                    .unwrap_or(name.as_str());
                println!("{}: {}", shown, yes_no(check == FeatureCheck::Present));
            }
        }
        return Ok(ExitCode::from(check.code()));
    }

    let report = build_report(features);
    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text(&report),
    }

    Ok(ExitCode::SUCCESS)
}

/// The environment mask plus anything passed with `--disable`.
fn probe_config(args: &Args, env: ProbeConfig) -> Result<ProbeConfig, ParseFeatureError> {
    match &args.disable {
        Some(list) => Ok(env.merge(&ProbeConfig::from_list(list)?)),
        None => Ok(env),
    }
}

fn resolve_features(config: &ProbeConfig, fresh: bool) -> CpuFeatures {
    if fresh {
        config.apply(CpuFeatures::probe())
    } else {
        config.apply(CpuFeatures::host())
    }
}

fn check_feature(features: CpuFeatures, name: &str) -> FeatureCheck {
    match CpuFeatures::lookup(name) {
        Some(flag) if features.contains(flag) => FeatureCheck::Present,
        Some(_) => FeatureCheck::Absent,
        None => FeatureCheck::Unknown,
    }
}

fn build_report(features: CpuFeatures) -> Report {
    let mut sys = System::new();
    sys.refresh_cpu();
    let cpu_brand = sys.global_cpu_info().brand().trim().to_string();

    let health = match Diagnostics::check(features) {
        HealthStatus::Healthy => "healthy".to_string(),
        HealthStatus::Suspicious(msg) => format!("suspicious: {}", msg),
    };

    Report {
        cpu_brand,
        vendor: cpuid::vendor(),
        max_basic_leaf: cpuid::max_basic_leaf(),
        platform: PlatformInfo::current(),
        features: features
            .report()
            .into_iter()
            .map(|(name, supported)| FeatureEntry { name, supported })
            .collect(),
        health,
    }
}

fn print_text(report: &Report) {
    let p = &report.platform;
    println!("=== Platform ===");
    println!("  CPU:            {}", if report.cpu_brand.is_empty() { "unknown" } else { report.cpu_brand.as_str() });
    println!("  Vendor:         {}", report.vendor.as_deref().unwrap_or("n/a"));
    println!("  Max CPUID leaf: {}", report.max_basic_leaf);
    println!("  Arch / OS:      {} / {} ({})", p.arch, p.os, p.family);
    println!("  Pointer width:  {} bits", p.pointer_width);
    println!("  Endian:         {:?}", p.endian);
    match p.l1d_line_size {
        Some(line) => println!("  Cache line:     {} (L1d reports {})", p.cache_line_size, line),
        None => println!("  Cache line:     {}", p.cache_line_size),
    }

    println!("\n=== CPU Features ===");
    for entry in &report.features {
        println!("  {:<12} {}", entry.name, yes_no(entry.supported));
    }

    println!("\nConsistency: {}", report.health);
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
