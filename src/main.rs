use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::config::{self, Config};
use facegate::constraints::{GeoPoint, VerifyConstraints};
use facegate::storage::fs::DirectoryEntry;
use facegate::storage::FsIdentityRepository;
use facegate::{Evidence, FaceGate, ProfileMetadata, VerificationRequest, VerifyOptions};
use log::{info, warn};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(version, about = "Face descriptor enrollment and verification")]
struct Cli {
    /// Config file (defaults to the system config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face descriptor for an identity
    Enroll {
        #[arg(short, long)]
        user: String,
        /// JSON file holding the descriptor array
        #[arg(short, long)]
        descriptor: PathBuf,
        /// JSON file holding capture metadata
        #[arg(short, long)]
        metadata: Option<PathBuf>,
        /// Raw capture to keep as evidence
        #[arg(short, long)]
        evidence: Option<PathBuf>,
    },
    /// Replace the enrolled descriptor of an identity
    Update {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        descriptor: PathBuf,
        #[arg(short, long)]
        metadata: Option<PathBuf>,
        #[arg(short, long)]
        evidence: Option<PathBuf>,
    },
    /// Remove the enrolled face of an identity
    Remove {
        #[arg(short, long)]
        user: String,
    },
    /// Print the enrolled profile of an identity
    Show {
        #[arg(short, long)]
        user: String,
    },
    /// Verify a probe against every enrolled identity
    Verify {
        /// JSON file holding the verification request
        #[arg(short, long)]
        request: PathBuf,
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Skip the liveness gate
        #[arg(long)]
        no_liveness: bool,
        #[arg(long, requires = "longitude", allow_hyphen_values = true)]
        latitude: Option<f64>,
        #[arg(long, requires = "latitude", allow_hyphen_values = true)]
        longitude: Option<f64>,
        /// Reject outside the identity's shift
        #[arg(long)]
        enforce_schedule: bool,
    },
    /// Match many probes without liveness or audit
    Batch {
        /// JSON file holding an array of descriptors
        #[arg(short, long)]
        probes: PathBuf,
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Print enrollment and verification statistics
    Stats {
        /// Only this identity's verification history
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;

    let repository = Arc::new(FsIdentityRepository::new(&cfg.store_dir));
    let gate = FaceGate::with_fs_repository(&cfg, repository.clone());

    match cli.command {
        Commands::Enroll {
            user,
            descriptor,
            metadata,
            evidence,
        } => enroll(&gate, &repository, &user, &descriptor, metadata.as_deref(), evidence.as_deref()),
        Commands::Update {
            user,
            descriptor,
            metadata,
            evidence,
        } => update(&gate, &user, &descriptor, metadata.as_deref(), evidence.as_deref()),
        Commands::Remove { user } => remove(&gate, &user),
        Commands::Show { user } => show(&gate, &user),
        Commands::Verify {
            request,
            threshold,
            no_liveness,
            latitude,
            longitude,
            enforce_schedule,
        } => {
            let location = latitude
                .zip(longitude)
                .map(|(latitude, longitude)| GeoPoint {
                    latitude,
                    longitude,
                });
            let options = VerifyOptions {
                threshold,
                require_liveness: no_liveness.then_some(false),
                constraints: (location.is_some() || enforce_schedule).then_some(VerifyConstraints {
                    location,
                    enforce_schedule,
                    at: None,
                }),
            };
            verify(&gate, &request, &options)
        }
        Commands::Batch { probes, threshold } => {
            let threshold = threshold.unwrap_or(cfg.matching.similarity_threshold);
            batch(&gate, &probes, threshold)
        }
        Commands::Stats { user } => stats(&gate, user.as_deref()),
        Commands::Config => open_config(config_path),
    }
}

fn enroll(
    gate: &FaceGate,
    repository: &FsIdentityRepository,
    user_id: &str,
    descriptor: &Path,
    metadata: Option<&Path>,
    evidence: Option<&Path>,
) -> Result<()> {
    info!("Enrolling identity: {}", user_id);

    let descriptor: Vec<f64> = read_json(descriptor)?;
    let metadata = read_metadata(metadata)?;
    let evidence = evidence.map(read_evidence).transpose()?;

    let profile = gate
        .register(user_id, descriptor, metadata, evidence.as_ref())
        .context("Failed to register face")?;

    if repository.directory_entry(user_id)?.is_none() {
        warn!("{} was not listed in the identity directory; adding as active", user_id);
        repository.upsert_identity(user_id, DirectoryEntry::active())?;
    }

    info!(
        "✓ Face enrolled for {} (quality {:.3})",
        user_id, profile.quality_score
    );
    Ok(())
}

fn update(
    gate: &FaceGate,
    user_id: &str,
    descriptor: &Path,
    metadata: Option<&Path>,
    evidence: Option<&Path>,
) -> Result<()> {
    info!("Updating identity: {}", user_id);

    let descriptor: Vec<f64> = read_json(descriptor)?;
    let metadata = read_metadata(metadata)?;
    let evidence = evidence.map(read_evidence).transpose()?;

    let profile = gate
        .update(user_id, descriptor, metadata, evidence.as_ref())
        .context("Failed to update face")?;

    info!(
        "✓ Face updated for {} ({} updates so far)",
        user_id, profile.update_count
    );
    Ok(())
}

fn remove(gate: &FaceGate, user_id: &str) -> Result<()> {
    info!("Removing enrolled face for: {}", user_id);

    gate.delete(user_id).context("Failed to remove face")?;

    info!("✓ Face removed for: {}", user_id);
    Ok(())
}

fn show(gate: &FaceGate, user_id: &str) -> Result<()> {
    match gate.profile(user_id)? {
        Some(profile) => {
            // Descriptor values stay out of the output.
            let summary = serde_json::json!({
                "identity_id": profile.identity_id,
                "algorithm_tag": profile.algorithm_tag,
                "model_version": profile.model_version,
                "confidence": profile.confidence,
                "quality_score": profile.quality_score,
                "registered_at": profile.registered_at,
                "updated_at": profile.updated_at,
                "update_count": profile.update_count,
                "raw_evidence_ref": profile.raw_evidence_ref,
                "device_info": profile.device_info,
                "features": profile.features,
                "extra": profile.extra,
            });
            print_json(&summary)
        }
        None => anyhow::bail!("No enrolled face found for: {}. Run 'enroll' first.", user_id),
    }
}

fn verify(gate: &FaceGate, request: &Path, options: &VerifyOptions) -> Result<()> {
    let request: VerificationRequest = read_json(request)?;
    let result = gate.verify(&request, options);
    print_json(&result)?;

    if gate.audit_failures() > 0 {
        warn!("Audit log could not be written; see errors above");
    }

    if result.accepted {
        info!("✓ Verification successful");
        Ok(())
    } else {
        anyhow::bail!(
            "Verification failed: {}",
            result.message.unwrap_or_else(|| "rejected".to_string())
        )
    }
}

fn batch(gate: &FaceGate, probes: &Path, threshold: f64) -> Result<()> {
    let probes: Vec<Vec<f64>> = read_json(probes)?;
    info!(
        "Matching {} probes (threshold: {:.3})",
        probes.len(),
        threshold
    );

    let outcomes = gate
        .batch_verify(&probes, threshold)
        .context("Batch verification failed")?;
    let matched = outcomes.iter().filter(|o| o.matched).count();
    print_json(&outcomes)?;

    info!("{} of {} probes matched", matched, outcomes.len());
    Ok(())
}

fn stats(gate: &FaceGate, user_id: Option<&str>) -> Result<()> {
    match user_id {
        Some(user_id) => print_json(&gate.identity_statistics(user_id)?),
        None => print_json(&gate.statistics()?),
    }
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    if !config_path.exists() {
        config::save_config(&Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn read_metadata(path: Option<&Path>) -> Result<ProfileMetadata> {
    match path {
        Some(path) => read_json(path),
        None => Ok(ProfileMetadata::default()),
    }
}

fn read_evidence(path: &Path) -> Result<Evidence> {
    let bytes = fs::read(path).with_context(|| format!("reading evidence {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_string();
    Ok(Evidence { bytes, extension })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
