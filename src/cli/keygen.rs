use super::passphrase::{generate_mnemonic, save_passphrase_to_file};
use std::io::Write;
use std::path::Path;
use tessera::crypto::NodeKeyring;

/// Generate a node mnemonic and print the operator identity it derives.
///
/// With `--output` the mnemonic is written to that file (mode 0600);
/// otherwise it is printed once on stderr.
pub fn execute(output: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mnemonic = generate_mnemonic()?;
    let (operator_id, public_key) = describe(&mnemonic)?;

    match output {
        Some(path) => {
            let path = Path::new(&path);
            save_passphrase_to_file(&mnemonic, path)?;
            println!("Mnemonic saved to {}", path.display());
        }
        None => {
            eprintln!();
            eprintln!("Node mnemonic (shown once, store it securely):");
            eprintln!();
            eprintln!("  {}", mnemonic);
            eprintln!();
            let _ = std::io::stderr().flush();
        }
    }

    println!("Operator ID: {}", operator_id);
    println!("Public key:  {}", public_key);
    Ok(())
}

/// Hex operator id and public key for `mnemonic`.
fn describe(mnemonic: &str) -> Result<(String, String), Box<dyn std::error::Error>> {
    let keyring = NodeKeyring::from_mnemonic(mnemonic)?;
    let keypair = keyring.attestation_keypair()?;
    Ok((keypair.operator_id().to_hex(), hex::encode(keypair.public_key())))
}
