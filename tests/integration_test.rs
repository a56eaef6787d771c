use ethers::types::U256;
use pasta_curves::group::ff::PrimeField;
use pasta_curves::pallas;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use tempfile::TempDir;
use tokio::sync::OnceCell;
use zkp_group_membership::{
    circuit::ProvingEngine,
    ethereum::{derive_signature, Identifier, SecretKey},
    field_to_bytes,
    session::{GroupSession, SessionState, Verdict},
    types::ProofOutput,
    GroupTree, IdentifierVariant, MembershipCircuit, MembershipConfig, MembershipError,
    MembershipProof, MembershipProver, MembershipVerifier, MessageDigest, PublicInput,
    SignatureInstance, SignatureWitness, CIRCUIT_K,
};

const MEMBER_TAGS: [&str; 4] = ["\u{1F9D9}", "\u{1F977}", "\u{1F9DA}", "\u{1F9DB}"];
const SMALL_DEPTH: usize = 8;

static SMALL_PUBLIC_KEY: OnceCell<(MembershipProver, MembershipVerifier)> = OnceCell::const_new();

fn secret(tag: &str) -> SecretKey {
    SecretKey::from_tag(tag).unwrap()
}

/// Prover first, then the remaining members.
fn build_group(variant: IdentifierVariant, depth: usize) -> (GroupTree, Vec<Identifier>) {
    let members: Vec<Identifier> = MEMBER_TAGS
        .iter()
        .map(|tag| Identifier::derive(&secret(tag), variant).unwrap())
        .collect();
    let tree = GroupTree::from_leaves(depth, members.iter().map(Identifier::to_leaf)).unwrap();
    (tree, members)
}

/// Prover and verifier for public-key groups of depth [`SMALL_DEPTH`], shared
/// across tests.
async fn small_engines() -> &'static (MembershipProver, MembershipVerifier) {
    SMALL_PUBLIC_KEY
        .get_or_init(|| async {
            let config = MembershipConfig::public_key().with_tree_depth(SMALL_DEPTH);
            let prover = MembershipProver::initialize(config).await.unwrap();
            let verifier = MembershipVerifier::initialize(config).await.unwrap();
            (prover, verifier)
        })
        .await
}

/// Honest proof by member `index` of a [`SMALL_DEPTH`] public-key group.
async fn small_proof(index: usize, message: &[u8]) -> MembershipProof {
    let (tree, _) = build_group(IdentifierVariant::PublicKey, SMALL_DEPTH);
    let (signature, digest) = derive_signature(&secret(MEMBER_TAGS[index]), message).unwrap();
    let witness = tree.create_witness(index as u64).unwrap();
    let (prover, _) = small_engines().await;
    prover.prove(&signature, &digest, &witness).await.unwrap()
}

/// A digest whose integer differs from `digest` by the Pallas modulus.
fn twin_digest(digest: &MessageDigest) -> MessageDigest {
    let modulus = U256::from_str_radix(&pallas::Base::MODULUS[2..], 16).unwrap();
    let value = U256::from_big_endian(digest.as_bytes());
    let twin = if value >= modulus {
        value - modulus
    } else {
        value + modulus
    };
    let mut bytes = [0u8; 32];
    twin.to_big_endian(&mut bytes);
    MessageDigest(bytes)
}

#[tokio::test]
async fn test_public_key_membership_end_to_end() {
    let config = MembershipConfig::public_key().with_profiler(true);
    let (tree, members) = build_group(config.variant, config.tree_depth);

    let prover_secret = secret(MEMBER_TAGS[0]);
    let (signature, digest) = derive_signature(&prover_secret, b"harry potter").unwrap();
    let index = tree.index_of(&members[0].to_leaf()).unwrap();
    assert_eq!(index, 0);
    let witness = tree.create_witness(index).unwrap();

    let prover = MembershipProver::initialize(config).await.unwrap();
    let proof = prover.prove(&signature, &digest, &witness).await.unwrap();
    assert_eq!(proof.public_input.root, tree.root());
    assert_eq!(proof.public_input.digest, digest);
    assert_eq!(proof.public_input.r, signature.r);
    assert_eq!(proof.public_input.v, signature.v);

    let verifier = MembershipVerifier::initialize(config).await.unwrap();
    let serialized = proof.public_input.serialize();
    assert!(verifier.verify(&proof.proof, &serialized).await.unwrap());
    // verification is stateless
    assert!(verifier.verify(&proof.proof, &serialized).await.unwrap());
}

#[tokio::test]
async fn test_address_membership_end_to_end() {
    let config = MembershipConfig::address();
    assert_eq!(config.tree_depth, zkp_group_membership::DEFAULT_TREE_DEPTH);
    let (tree, members) = build_group(config.variant, config.tree_depth);

    let signer = secret(MEMBER_TAGS[2]);
    let (signature, digest) = derive_signature(&signer, b"the gathering").unwrap();
    let index = tree.index_of(&members[2].to_leaf()).unwrap();
    let witness = tree.create_witness(index).unwrap();

    let prover = MembershipProver::initialize(config).await.unwrap();
    let proof = prover.prove(&signature, &digest, &witness).await.unwrap();

    let verifier = MembershipVerifier::initialize(config).await.unwrap();
    assert!(verifier
        .verify(&proof.proof, &proof.public_input.serialize())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_tampered_public_input_rejected() {
    let proof = small_proof(1, b"vote: yes").await;
    let (_, verifier) = small_engines().await;
    assert!(verifier
        .verify(&proof.proof, &proof.public_input.serialize())
        .await
        .unwrap());

    let mut other_root = proof.public_input;
    other_root.root += pallas::Base::one();
    assert!(!verifier
        .verify(&proof.proof, &other_root.serialize())
        .await
        .unwrap());

    let (_, other_digest) = derive_signature(&secret(MEMBER_TAGS[1]), b"vote: no").unwrap();
    let mut other_message = proof.public_input;
    other_message.digest = other_digest;
    assert!(!verifier
        .verify(&proof.proof, &other_message.serialize())
        .await
        .unwrap());

    let mut other_nonce = proof.public_input;
    other_nonce.v = if other_nonce.v == 27 { 28 } else { 27 };
    assert!(!verifier
        .verify(&proof.proof, &other_nonce.serialize())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_twin_digest_rejected() {
    let proof = small_proof(2, b"twin").await;
    let (_, verifier) = small_engines().await;

    let mut twin = proof.public_input;
    twin.digest = twin_digest(&proof.public_input.digest);
    assert_ne!(twin.digest, proof.public_input.digest);

    let outcome = verifier.verify(&proof.proof, &twin.serialize()).await;
    assert!(matches!(outcome, Ok(false)));
}

#[tokio::test]
async fn test_proof_without_signing_key_rejected() {
    let variant = IdentifierVariant::PublicKey;
    let (tree, _) = build_group(variant, SMALL_DEPTH);
    let witness = tree.create_witness(0).unwrap();
    let (_, verifier) = small_engines().await;
    let engine = ProvingEngine::setup(variant, SMALL_DEPTH, CIRCUIT_K).unwrap();

    // a published signature by member 0, replayed with a guessed scalar
    let (signature, digest) = derive_signature(&secret(MEMBER_TAGS[0]), b"replayed").unwrap();
    let public_input = PublicInput::new(tree.root(), digest, &signature);
    let instance = SignatureInstance::derive(&signature.r, signature.v, &digest).unwrap();
    let guessed = SignatureWitness::derive(&instance, &[0x11; 32]).unwrap();
    let circuit = MembershipCircuit::new(variant, &witness, guessed);
    assert_forgery_rejected(&engine, verifier, circuit, &public_input).await;

    // an outsider's own signature next to a member's path
    let outsider = SecretKey::random(&mut rand::thread_rng());
    let (signature, digest) = derive_signature(&outsider, b"let me in").unwrap();
    let public_input = PublicInput::new(tree.root(), digest, &signature);
    let instance = SignatureInstance::derive(&signature.r, signature.v, &digest).unwrap();
    let own = SignatureWitness::derive(&instance, &signature.s).unwrap();
    let circuit = MembershipCircuit::new(variant, &witness, own);
    assert_forgery_rejected(&engine, verifier, circuit, &public_input).await;
}

async fn assert_forgery_rejected(
    engine: &ProvingEngine,
    verifier: &MembershipVerifier,
    circuit: MembershipCircuit,
    public_input: &PublicInput,
) {
    let instance = public_input.instance().unwrap();
    let Ok(proof) = engine.create_proof(circuit, &instance) else {
        return;
    };
    let outcome = verifier.verify(&proof, &public_input.serialize()).await;
    assert!(matches!(outcome, Ok(false)), "forged proof accepted: {outcome:?}");
}

#[tokio::test]
async fn test_trailing_bytes_rejected() {
    let proof = small_proof(3, b"trailing").await;
    let (_, verifier) = small_engines().await;
    let serialized = proof.public_input.serialize();

    let mut extended = proof.proof.clone();
    extended.push(0);
    let outcome = verifier.verify(&extended, &serialized).await;
    assert!(matches!(outcome, Err(MembershipError::MalformedInput(_))));

    let mut doubled = proof.proof.clone();
    doubled.extend_from_slice(&proof.proof);
    let outcome = verifier.verify(&doubled, &serialized).await;
    assert!(matches!(outcome, Err(MembershipError::MalformedInput(_))));

    assert!(verifier.verify(&proof.proof, &serialized).await.unwrap());
}

#[tokio::test]
async fn test_proof_for_other_shape_rejected() {
    let config = MembershipConfig::address().with_tree_depth(SMALL_DEPTH);
    let (tree, _) = build_group(config.variant, config.tree_depth);

    let (signature, digest) = derive_signature(&secret(MEMBER_TAGS[3]), b"shape").unwrap();
    let witness = tree.create_witness(3).unwrap();
    let prover = MembershipProver::initialize(config).await.unwrap();
    let proof = prover.prove(&signature, &digest, &witness).await.unwrap();

    let verifier = MembershipVerifier::initialize(config.with_tree_depth(SMALL_DEPTH + 1))
        .await
        .unwrap();
    let outcome = verifier
        .verify(&proof.proof, &proof.public_input.serialize())
        .await;
    assert!(!matches!(outcome, Ok(true)));
}

#[tokio::test]
async fn test_non_member_signer_cannot_prove() {
    let (tree, _) = build_group(IdentifierVariant::PublicKey, SMALL_DEPTH);
    let witness = tree.create_witness(0).unwrap();

    let outsider = SecretKey::random(&mut rand::thread_rng());
    let (signature, digest) = derive_signature(&outsider, b"let me in").unwrap();

    let (prover, _) = small_engines().await;
    let result = prover.prove(&signature, &digest, &witness).await;
    assert!(matches!(result, Err(MembershipError::ProofGeneration(_))));
}

#[tokio::test]
async fn test_signature_over_other_digest_cannot_prove() {
    let config = MembershipConfig::address().with_tree_depth(SMALL_DEPTH);
    let (tree, _) = build_group(config.variant, config.tree_depth);
    let witness = tree.create_witness(0).unwrap();

    let member = secret(MEMBER_TAGS[0]);
    let (signature, _) = derive_signature(&member, b"signed message").unwrap();
    let (_, other_digest) = derive_signature(&member, b"claimed message").unwrap();

    let prover = MembershipProver::initialize(config).await.unwrap();
    let result = prover.prove(&signature, &other_digest, &witness).await;
    assert!(matches!(result, Err(MembershipError::ProofGeneration(_))));
}

#[tokio::test]
async fn test_witness_depth_mismatch() {
    let (tree, _) = build_group(IdentifierVariant::PublicKey, SMALL_DEPTH - 1);
    let witness = tree.create_witness(0).unwrap();
    let (signature, digest) = derive_signature(&secret(MEMBER_TAGS[0]), b"depth").unwrap();

    let (prover, _) = small_engines().await;
    let result = prover.prove(&signature, &digest, &witness).await;
    assert!(matches!(result, Err(MembershipError::ProofGeneration(_))));
}

#[tokio::test]
async fn test_malformed_inputs() {
    let proof = small_proof(0, b"malformed").await;
    let (_, verifier) = small_engines().await;
    let serialized = proof.public_input.serialize();

    let short_input = verifier.verify(&proof.proof, &serialized[..40]).await;
    assert!(matches!(short_input, Err(MembershipError::MalformedInput(_))));

    let empty = verifier.verify(&[], &serialized).await;
    assert!(matches!(empty, Err(MembershipError::MalformedInput(_))));

    // not a valid curve point encoding
    let garbage = verifier.verify(&[0xffu8; 64], &serialized).await;
    assert!(matches!(garbage, Err(MembershipError::MalformedInput(_))));

    let truncated = verifier
        .verify(&proof.proof[..proof.proof.len() / 2], &serialized)
        .await;
    assert!(matches!(truncated, Err(MembershipError::MalformedInput(_))));

    let oversized = vec![0u8; verifier.config().max_proof_size + 1];
    let oversized = verifier.verify(&oversized, &serialized).await;
    assert!(matches!(oversized, Err(MembershipError::MalformedInput(_))));

    let mut bad_indicator = serialized.clone();
    bad_indicator[96] = 29;
    let bad_indicator = verifier.verify(&proof.proof, &bad_indicator).await;
    assert!(matches!(bad_indicator, Err(MembershipError::MalformedInput(_))));

    let mut zero_nonce = proof.public_input;
    zero_nonce.r = [0u8; 32];
    let zero_nonce = verifier.verify(&proof.proof, &zero_nonce.serialize()).await;
    assert!(matches!(zero_nonce, Err(MembershipError::MalformedInput(_))));
}

#[tokio::test]
async fn test_engine_init_rejects_bad_config() {
    let zero_depth = MembershipProver::initialize(MembershipConfig::public_key().with_tree_depth(0)).await;
    assert!(matches!(zero_depth, Err(MembershipError::EngineInit(_))));

    let too_deep =
        MembershipVerifier::initialize(MembershipConfig::address().with_tree_depth(33)).await;
    assert!(matches!(too_deep, Err(MembershipError::EngineInit(_))));

    let too_small = MembershipProver::initialize(MembershipConfig::public_key().with_circuit_k(4)).await;
    assert!(matches!(too_small, Err(MembershipError::EngineInit(_))));
}

#[tokio::test]
async fn test_session_flow() {
    let variant = IdentifierVariant::PublicKey;
    let prover_secret = secret("\u{1F9DE}");
    let prover_id = Identifier::derive(&prover_secret, variant).unwrap();
    let (_, roster) = build_group(variant, SMALL_DEPTH);

    let mut group = GroupSession::build(variant, SMALL_DEPTH, &[prover_id]).unwrap();
    for member in &roster {
        group.insert(member).unwrap();
    }
    assert_eq!(group.state(), SessionState::GroupBuilt);
    let index = group.index_of(&prover_id).unwrap();

    let witnessed = group.extract_witness(index).unwrap();
    let (signature, digest) = derive_signature(&prover_secret, b"session").unwrap();

    let (prover, verifier) = small_engines().await;
    let proved = witnessed.prove(prover, signature, digest).await.unwrap();
    assert_eq!(proved.state(), SessionState::Proved);
    assert_eq!(proved.public_input().digest, digest);

    let verdict = proved.verify(verifier).await.unwrap();
    assert_eq!(verdict, Verdict::Verified);
    assert_eq!(verdict.state(), SessionState::Verified);

    let proof = proved.into_proof();
    assert!(!proof.proof.is_empty());
}

fn binaries() -> Option<(PathBuf, PathBuf)> {
    let prover_path = PathBuf::from("./target/release/prover");
    let verifier_path = PathBuf::from("./target/release/verifier");
    if !prover_path.exists() || !verifier_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return None;
    }
    Some((prover_path, verifier_path))
}

/// Runs the prover binary for member 0 over the other members and returns the
/// proof file.
fn prove_with_binary(prover_path: &Path, dir: &Path) -> PathBuf {
    let roster_file = dir.join("roster.txt");
    let proof_file = dir.join("proof.json");

    let roster: Vec<String> = MEMBER_TAGS[1..]
        .iter()
        .map(|tag| {
            Identifier::derive(&secret(tag), IdentifierVariant::PublicKey)
                .unwrap()
                .to_string()
        })
        .collect();
    fs::write(&roster_file, roster.join("\n")).expect("Failed to write roster file");

    let prover_output = std::process::Command::new(prover_path)
        .arg("--roster")
        .arg(&roster_file)
        .arg("--message")
        .arg("harry potter")
        .arg("--output")
        .arg(&proof_file)
        .env("ZKP_PRIVATE_KEY", secret(MEMBER_TAGS[0]).to_hex())
        .output()
        .expect("Failed to execute prover");
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );
    assert!(proof_file.exists(), "Proof file was not created");
    proof_file
}

fn run_verifier(verifier_path: &Path, proof_file: &Path, expected_root: Option<&str>) -> Output {
    let mut command = std::process::Command::new(verifier_path);
    command.arg("--proof-file").arg(proof_file);
    if let Some(root) = expected_root {
        command.arg("--expected-root").arg(root);
    }
    command.output().expect("Failed to execute verifier")
}

#[test]
fn test_end_to_end_prover_verifier_binaries() {
    let Some((prover_path, verifier_path)) = binaries() else {
        return;
    };

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let proof_file = prove_with_binary(&prover_path, temp_dir.path());

    let verifier_output = run_verifier(&verifier_path, &proof_file, None);
    assert!(
        verifier_output.status.success(),
        "Verifier failed: {}",
        String::from_utf8_lossy(&verifier_output.stderr)
    );
    let stdout = String::from_utf8_lossy(&verifier_output.stdout);
    assert!(stdout.contains("PASSED"));
    assert!(stdout.contains("not pinned"));
}

#[test]
fn test_verifier_binary_pins_expected_root() {
    let Some((prover_path, verifier_path)) = binaries() else {
        return;
    };

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let proof_file = prove_with_binary(&prover_path, temp_dir.path());
    let artifact: ProofOutput =
        serde_json::from_str(&fs::read_to_string(&proof_file).unwrap()).unwrap();

    let pinned = run_verifier(
        &verifier_path,
        &proof_file,
        Some(&format!("0x{}", artifact.merkle_root)),
    );
    assert!(
        pinned.status.success(),
        "Verifier failed: {}",
        String::from_utf8_lossy(&pinned.stderr)
    );
    assert!(String::from_utf8_lossy(&pinned.stdout).contains("expected group"));

    // a group the prover is not part of
    let (other_group, _) = build_group(IdentifierVariant::PublicKey, 4);
    let other_root = hex::encode(field_to_bytes(other_group.root()));
    let mismatch = run_verifier(&verifier_path, &proof_file, Some(&other_root));
    assert!(!mismatch.status.success());
    let stderr = String::from_utf8_lossy(&mismatch.stderr);
    assert!(stderr.contains("different group"), "unexpected stderr: {stderr}");
    assert!(!String::from_utf8_lossy(&mismatch.stdout).contains("PASSED"));
}

#[test]
fn test_prover_rejects_duplicate_roster_entries() {
    let Some((prover_path, _)) = binaries() else {
        return;
    };

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let roster_file = temp_dir.path().join("roster.txt");
    let member = Identifier::derive(&secret(MEMBER_TAGS[1]), IdentifierVariant::Address)
        .unwrap()
        .to_string();
    fs::write(&roster_file, format!("{member}\n{member}\n")).expect("Failed to write roster");

    let output = std::process::Command::new(&prover_path)
        .arg("--roster")
        .arg(&roster_file)
        .arg("--message")
        .arg("dup")
        .arg("--variant")
        .arg("address")
        .arg("--output")
        .arg(temp_dir.path().join("proof.json"))
        .env("ZKP_PRIVATE_KEY", secret(MEMBER_TAGS[0]).to_hex())
        .output()
        .expect("Failed to execute prover");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Duplicate identifier"));
}

#[test]
fn test_group_root_hex_is_stable() {
    let (first, _) = build_group(IdentifierVariant::Address, SMALL_DEPTH);
    let (second, _) = build_group(IdentifierVariant::Address, SMALL_DEPTH);
    assert_eq!(
        hex::encode(field_to_bytes(first.root())),
        hex::encode(field_to_bytes(second.root()))
    );
}
