use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use zkp_group_membership::{
    config::Config,
    ethereum::{derive_signature, Identifier, SecretKey},
    session::GroupSession,
    types::{IdentifierVariant, ProofOutput},
    MembershipProver,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// One identifier per line: addresses or uncompressed public keys.
    /// Defaults to `roster.default_file` from the config.
    #[arg(short, long)]
    roster: Option<PathBuf>,

    #[arg(short, long, env = "ZKP_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    #[arg(short, long)]
    message: String,

    /// Overrides the configured variant (`public_key` or `address`).
    #[arg(long)]
    variant: Option<IdentifierVariant>,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn load_roster(path: &PathBuf, max_size: u64, variant: IdentifierVariant) -> Result<Vec<Identifier>> {
    let metadata = fs::metadata(path).context("Failed to read roster file metadata")?;
    if metadata.len() > max_size {
        return Err(anyhow::anyhow!(
            "Roster file too large: {} bytes (max {} bytes)",
            metadata.len(),
            max_size
        ));
    }

    let content = fs::read_to_string(path).context("Failed to read roster file")?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            Identifier::parse(line, variant)
                .with_context(|| format!("Invalid {variant} at roster line {}: '{line}'", i + 1))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    let mut membership = config.membership();
    if let Some(variant) = args.variant {
        membership.variant = variant;
    }
    membership
        .check_depth()
        .map_err(anyhow::Error::msg)
        .context("Invalid circuit configuration")?;
    let output_path = args.output.unwrap_or_else(|| config.proof.output_file.clone());

    let roster_path = args
        .roster
        .or_else(|| config.roster.default_file.clone())
        .context("No roster file given and none configured")?;
    println!("Loading roster from: {}", roster_path.display());
    let roster = load_roster(&roster_path, config.roster.max_file_size, membership.variant)?;
    println!("Loaded {} members", roster.len());

    let secret = SecretKey::from_hex(&args.private_key).context("Failed to parse private key")?;
    let prover_identifier = Identifier::derive(&secret, membership.variant)?;
    println!("Prover identifier: {prover_identifier}");

    // Prover first, then the roster.
    let mut members = Vec::with_capacity(roster.len() + 1);
    members.push(prover_identifier);
    members.extend(roster.into_iter().filter(|member| *member != prover_identifier));

    let mut seen = HashSet::with_capacity(members.len());
    if let Some(duplicate) = members.iter().find(|member| !seen.insert(**member)) {
        return Err(anyhow::anyhow!(
            "Duplicate identifier in roster: {duplicate}"
        ));
    }

    println!("Building group tree (depth {})...", membership.tree_depth);
    let group = GroupSession::build(membership.variant, membership.tree_depth, &members)
        .context("Failed to build group")?;
    let index = group.index_of(&prover_identifier)?;
    debug!("Prover leaf index: {index}");

    let session = group
        .extract_witness(index)
        .context("Failed to extract inclusion witness")?;
    println!("Merkle root: {}", hex::encode(zkp_group_membership::field_to_bytes(session.root())));

    let (signature, digest) = derive_signature(&secret, args.message.as_bytes())?;
    info!("Signed message digest {digest}");

    println!("Initializing prover...");
    let prover = MembershipProver::initialize(membership)
        .await
        .context("Failed to initialize prover")?;

    println!("Generating ZK proof (this may take a while)...");
    let proved = session
        .prove(&prover, signature, digest)
        .await
        .context("Failed to create proof")?;
    let proof = proved.into_proof();
    println!("ZK proof generated, size: {} bytes", proof.proof.len());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock unavailable")?
        .as_secs();
    let output = ProofOutput::new(membership.variant, membership.tree_depth, &proof, timestamp);

    println!("Writing proof to: {}", output_path.display());
    let json_output =
        serde_json::to_string_pretty(&output).context("Failed to serialize proof to JSON")?;
    fs::write(&output_path, json_output).context("Failed to write proof file")?;

    println!("Proof successfully generated and saved!");
    println!("Merkle Root: {}", output.merkle_root);
    println!("Message Digest: {}", output.message_digest);

    Ok(())
}
