use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use zkp_group_membership::{config::Config, types::ProofOutput, MembershipVerifier};

/// Can be overridden via `ZKP_MAX_PROOF_FILE_SIZE`
fn get_max_proof_file_size(default: u64) -> u64 {
    std::env::var("ZKP_MAX_PROOF_FILE_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Can be overridden via `ZKP_MAX_ZK_PROOF_SIZE`
fn get_max_zk_proof_size(default: usize) -> usize {
    std::env::var("ZKP_MAX_ZK_PROOF_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    proof_file: PathBuf,

    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hex root of the group proofs must belong to. Overrides
    /// `proof.expected_root` from the config.
    #[arg(long)]
    expected_root: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    let proof_path: &Path = &args.proof_file;
    if !proof_path.exists() {
        return Err(anyhow::anyhow!(
            "Proof file does not exist: {}",
            proof_path.display()
        ));
    }

    info!("Loading proof from: {}", proof_path.display());
    println!("Loading proof from: {}", proof_path.display());

    let metadata = fs::metadata(proof_path).context("Failed to read proof file metadata")?;
    debug!("Proof file size: {} bytes", metadata.len());

    let max_proof_file_size = get_max_proof_file_size(config.proof.max_file_size);
    if metadata.len() > max_proof_file_size {
        return Err(anyhow::anyhow!(
            "Proof file too large: {} bytes (max {} bytes). Set ZKP_MAX_PROOF_FILE_SIZE to raise the limit.",
            metadata.len(),
            max_proof_file_size
        ));
    }

    let proof_content = fs::read_to_string(proof_path).context("Failed to read proof file")?;
    let proof: ProofOutput =
        serde_json::from_str(&proof_content).context("Failed to parse proof JSON")?;

    proof
        .validate(
            config.proof.timestamp_tolerance_secs,
            config.proof.timestamp_max_age_secs,
        )
        .context("Proof validation failed. The proof structure is invalid or inconsistent.")?;
    info!("Proof structure validation passed");

    println!("Proof details:");
    println!("  Variant: {}", proof.variant);
    println!("  Tree Depth: {}", proof.tree_depth);
    println!("  Merkle Root: {}", proof.merkle_root);
    println!("  Message Digest: {}", proof.message_digest);
    println!("  Timestamp: {}", proof.timestamp);
    println!("  ZK Proof Size: {} bytes", proof.zkp_proof.len());

    let expected_root = args.expected_root.or_else(|| config.proof.expected_root.clone());
    match &expected_root {
        Some(expected) => {
            proof
                .check_root(expected)
                .context("Proof is for a different group")?;
            info!("Merkle root matches the expected group root");
        }
        None => warn!(
            "No expected root configured: the proof is only checked against the root it carries"
        ),
    }

    let mut membership = config.membership();
    membership.variant = proof.variant;
    membership.tree_depth = proof.tree_depth;
    membership.max_proof_size = get_max_zk_proof_size(membership.max_proof_size);

    println!("Generating verifying key...");
    let verifier = MembershipVerifier::initialize(membership)
        .await
        .context("Failed to initialize verifier")?;

    info!("Verifying ZK proof with public input");
    let public_input = proof.public_input_bytes()?;
    let valid = verifier
        .verify(&proof.zkp_proof, &public_input)
        .await
        .context("Proof could not be checked")?;

    if valid {
        info!("Proof verification PASSED");
        println!("\n✓ Proof verification PASSED!");
        if expected_root.is_some() {
            println!("The signer of digest {} holds a key in the", proof.message_digest);
            println!("expected group (root {}), without revealing which member.", proof.merkle_root);
        } else {
            println!("The signer of digest {} holds a key in the group", proof.message_digest);
            println!("committed to by root {}.", proof.merkle_root);
            println!("This root was not pinned: pass --expected-root to check it is your group.");
        }
        Ok(())
    } else {
        error!("Proof verification FAILED");
        println!("\n✗ Proof verification FAILED!");
        Err(anyhow::anyhow!("Proof verification failed"))
    }
}
