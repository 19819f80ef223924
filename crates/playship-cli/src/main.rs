use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use playship::engine::{PublishOutcome, Publisher, Reporter};
use playship::outputs::OutputMetadataBuildSystem;
use playship::play_api::{PlayBackend, PlayBackendConfig};
use playship::types::{ReleaseStatus, ResolutionStrategy};
use playship_auth::{ACCESS_TOKEN_ENV, load_service_account, mask_token, resolve_token};
use playship_config::{
    Config, ConfigError, HttpConfig, PublishConfig, ResolvedConfig, find_config,
    load_config_from_file,
};

/// Default location of the Android build's APK outputs
const DEFAULT_OUTPUTS_DIR: &str = "app/build/outputs/apk";
const DEFAULT_STATE_DIR: &str = ".playship";

#[derive(Parser, Debug)]
#[command(name = "playship", version)]
#[command(about = "Transactional publishing of Android builds to Play distribution tracks")]
struct Cli {
    /// Path to playship.toml (default: searched upward from the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Track to publish to (internal, alpha, beta, production or a custom track)
    #[arg(long, global = true)]
    track: Option<String>,

    /// Track whose releases are promoted onto --track
    #[arg(long, global = true)]
    from_track: Option<String>,

    /// Status of the new release: completed, draft, halted or inProgress
    #[arg(long, global = true)]
    release_status: Option<ReleaseStatus>,

    /// Rollout fraction for inProgress releases, in (0, 1)
    #[arg(long, global = true)]
    user_fraction: Option<f64>,

    /// What to do when local version codes are not above the store's: auto, fail or ignore
    #[arg(long, global = true)]
    resolution_strategy: Option<ResolutionStrategy>,

    /// Publish prebuilt files from this directory instead of the build outputs
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    /// Directory holding release notes and release names
    #[arg(long, global = true)]
    resource_dir: Option<PathBuf>,

    /// Application id on the store
    #[arg(long, global = true)]
    package_name: Option<String>,

    /// Service-account key file
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// Store API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Per-request timeout, e.g. 90s or 2m
    #[arg(long, global = true)]
    timeout: Option<String>,

    /// Directory for event logs and receipts (default: .playship)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Root of the build outputs, one subdirectory per variant
    #[arg(long, global = true, default_value = DEFAULT_OUTPUTS_DIR)]
    outputs_dir: PathBuf,

    /// Publish app bundles instead of APKs
    #[arg(long, global = true)]
    bundle: bool,

    /// Run every step, then discard the edit instead of committing it
    #[arg(long, global = true)]
    no_commit: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload the outputs of one or more variants and assign them to the track
    Publish {
        /// Build variant to publish (repeatable; variants run in parallel)
        #[arg(long = "variant", default_value = "release")]
        variants: Vec<String>,
    },
    /// Copy the releases of --from-track onto --track without uploading
    Promote,
    /// Print the effective publishing settings
    Config,
    /// Print configuration and credential diagnostics
    Doctor,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_file = locate_config(&cli)?;
    let base = match &config_file {
        Some(path) => load_config_from_file(path)?,
        None => Config::default(),
    };
    let config = base.merge(&cli_overrides(&cli)?);
    config.validate()?;
    let resolved = config.resolve()?;

    let mut reporter = CliReporter;

    match &cli.cmd {
        Commands::Publish { variants } => {
            let backend = connect(&config, &resolved, &mut reporter)?;
            let build = OutputMetadataBuildSystem::new(&cli.outputs_dir);
            let publisher = Publisher::new(&backend, &build, &resolved)
                .with_retry(config.retry_config())
                .with_state_dir(state_dir(&config));

            let results = match variants.as_slice() {
                [variant] => vec![(variant.clone(), publisher.publish(variant, &mut reporter))],
                _ => publisher.publish_variants(variants, &mut reporter),
            };

            let total = results.len();
            let mut failed = 0;
            for (variant, result) in results {
                match result {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(_) => {
                        failed += 1;
                        println!("variant: {variant}");
                        println!("outcome: failed");
                        println!();
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {total} variant(s) failed to publish");
            }
        }
        Commands::Promote => {
            let backend = connect(&config, &resolved, &mut reporter)?;
            let build = OutputMetadataBuildSystem::new(&cli.outputs_dir);
            let publisher = Publisher::new(&backend, &build, &resolved)
                .with_retry(config.retry_config())
                .with_state_dir(state_dir(&config));
            let outcome = publisher.promote(&mut reporter)?;
            print_outcome(&outcome);
        }
        Commands::Config => {
            print_config(config_file.as_deref(), &config, &resolved)?;
        }
        Commands::Doctor => {
            run_doctor(config_file.as_deref(), &config, &resolved, &cli, &mut reporter);
        }
    }

    Ok(())
}

fn locate_config(cli: &Cli) -> Result<Option<PathBuf>> {
    if let Some(path) = &cli.config {
        if !path.is_file() {
            bail!("config file not found: {}", path.display());
        }
        return Ok(Some(path.clone()));
    }
    let cwd = env::current_dir().context("failed to read the working directory")?;
    Ok(find_config(&cwd))
}

/// Flags given on the command line, as a config layer over the file.
fn cli_overrides(cli: &Cli) -> Result<Config> {
    let timeout = cli.timeout.as_deref().map(parse_duration).transpose()?;
    Ok(Config {
        publish: PublishConfig {
            track: cli.track.clone(),
            from_track: cli.from_track.clone(),
            release_status: cli.release_status,
            user_fraction: cli.user_fraction,
            resolution_strategy: cli.resolution_strategy,
            artifact_dir: cli.artifact_dir.clone(),
            resource_dir: cli.resource_dir.clone(),
            package_name: cli.package_name.clone(),
            service_account_credentials: cli.credentials.clone(),
            default_to_app_bundles: cli.bundle.then_some(true),
            commit: cli.no_commit.then_some(false),
            ..PublishConfig::default()
        },
        retry: None,
        http: HttpConfig {
            api_base: cli.api_base.clone(),
            timeout,
        },
        state_dir: cli.state_dir.clone(),
    })
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn state_dir(config: &Config) -> PathBuf {
    config
        .state_dir()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
}

fn connect(
    config: &Config,
    resolved: &ResolvedConfig,
    reporter: &mut dyn Reporter,
) -> Result<PlayBackend> {
    // A disabled publish never reaches the store, so it needs neither a
    // package name nor credentials.
    if !resolved.enabled {
        return PlayBackend::new(PlayBackendConfig {
            api_base: config.api_base().to_string(),
            package_name: resolved.package_name.clone().unwrap_or_default(),
            token: None,
            timeout: config.http_timeout(),
        });
    }

    let package_name = resolved.require_package_name()?.to_string();
    let token = {
        let account = match &resolved.service_account_credentials {
            Some(path) => Some(load_service_account(
                path,
                resolved.service_account_email.as_deref(),
            )?),
            None => None,
        };
        let auth = resolve_token(account.as_ref());
        if !auth.detected {
            if account.is_none() {
                return Err(ConfigError::MissingCredentials.into());
            }
            bail!(
                "no access token available for the service account; set {ACCESS_TOKEN_ENV} or add access_token to the key file"
            );
        }
        reporter.info(&format!("using access token from {}", auth.source));
        auth.token
    };

    PlayBackend::new(PlayBackendConfig {
        api_base: config.api_base().to_string(),
        package_name,
        token,
        timeout: config.http_timeout(),
    })
}

fn print_outcome(outcome: &PublishOutcome) {
    println!("variant: {}", outcome.variant);
    println!("track:   {}", outcome.track);
    println!("outcome: {}", outcome.kind);
    if let Some(edit) = &outcome.edit_id {
        println!("edit:    {edit}");
    }

    for u in &outcome.uploaded {
        let renumbered = u
            .original_version_code
            .map(|code| format!(" (was {code})"))
            .unwrap_or_default();
        println!(
            "  uploaded {} {}{renumbered}: {}",
            u.kind,
            u.version_code,
            u.path.display()
        );
    }
    if !outcome.dropped.is_empty() {
        println!("  dropped: {:?}", outcome.dropped);
    }
    if let Some(assignment) = &outcome.assignment {
        for release in &assignment.releases {
            let fraction = release
                .user_fraction
                .map(|f| format!(" fraction={f}"))
                .unwrap_or_default();
            println!(
                "  release {:?} {}{fraction}",
                release.version_codes, release.status
            );
        }
    }
    println!();
}

fn print_config(config_file: Option<&Path>, config: &Config, resolved: &ResolvedConfig) -> Result<()> {
    match config_file {
        Some(path) => println!("# config file: {}", path.display()),
        None => println!("# config file: none"),
    }
    println!("# api base: {}", config.api_base());
    println!("# http timeout: {}", humantime::format_duration(config.http_timeout()));
    println!("# state dir: {}", state_dir(config).display());
    println!();
    let rendered =
        toml::to_string_pretty(resolved).context("failed to render publishing settings")?;
    print!("{rendered}");
    Ok(())
}

fn run_doctor(
    config_file: Option<&Path>,
    config: &Config,
    resolved: &ResolvedConfig,
    cli: &Cli,
    reporter: &mut dyn Reporter,
) {
    match config_file {
        Some(path) => println!("config_file: {}", path.display()),
        None => println!("config_file: none"),
    }
    println!("api_base: {}", config.api_base());
    println!(
        "package_name: {}",
        resolved.package_name.as_deref().unwrap_or("<unset>")
    );
    println!("outputs_dir: {}", cli.outputs_dir.display());
    println!("state_dir: {}", state_dir(config).display());

    let account = match &resolved.service_account_credentials {
        Some(path) => {
            match load_service_account(path, resolved.service_account_email.as_deref()) {
                Ok(account) => {
                    println!("credentials: {} ({})", path.display(), account.format);
                    Some(account)
                }
                Err(err) => {
                    reporter.warn(&format!("{err:#}"));
                    println!("credentials: {} (unusable)", path.display());
                    None
                }
            }
        }
        None => {
            println!("credentials: <unset>");
            None
        }
    };

    let auth = resolve_token(account.as_ref());
    println!("token_detected: {}", auth.detected);
    if let Some(token) = &auth.token {
        println!("token: {} (from {})", mask_token(token), auth.source);
    }
}
