use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use zkp_group_membership::{
    ethereum::{Identifier, SecretKey},
    types::IdentifierVariant,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate a demo roster of random members", long_about = None)]
struct Args {
    #[arg(short = 'n', long, default_value_t = 1000)]
    count: usize,

    #[arg(long, default_value = "public_key")]
    variant: IdentifierVariant,

    #[arg(short, long, default_value = "roster.txt")]
    output: PathBuf,

    /// Receives `identifier|private_key` lines.
    #[arg(short, long, default_value = "roster_keys.txt")]
    keys_output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!("Generating {} random {} members...", args.count, args.variant);
    let mut rng = rand::thread_rng();
    let members = (0..args.count)
        .map(|_| {
            let secret = SecretKey::random(&mut rng);
            Identifier::derive(&secret, args.variant).map(|id| (id, secret))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let unique: HashSet<_> = members.iter().map(|(id, _)| *id).collect();
    if unique.len() != members.len() {
        return Err(anyhow::anyhow!("Generated duplicate identifiers"));
    }

    println!("Writing roster to {}...", args.output.display());
    let mut roster = File::create(&args.output).context("Failed to create roster file")?;
    let mut keys = File::create(&args.keys_output).context("Failed to create keys file")?;
    for (identifier, secret) in &members {
        writeln!(roster, "{identifier}")?;
        writeln!(keys, "{identifier}|{}", secret.to_hex())?;
    }

    println!("Successfully generated {} members", members.len());
    println!("First 5 members:");
    for (i, (identifier, _)) in members.iter().take(5).enumerate() {
        println!("  {}: {identifier}", i + 1);
    }

    println!("\nPrivate keys saved to: {}", args.keys_output.display());

    Ok(())
}
