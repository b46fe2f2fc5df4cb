use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Environment variable holding the node mnemonic.
pub const PASSPHRASE_ENV: &str = "TESSERA_KEY_PASSPHRASE";

/// Where the node mnemonic comes from, checked in order
#[derive(Debug, PartialEq, Eq)]
pub enum PassphraseSource {
    /// From --passphrase-file, or the default file in the data directory
    File(PathBuf),
    /// From TESSERA_KEY_PASSPHRASE (warned as insecure)
    EnvVar,
    /// From stdin prompt (masked input)
    Stdin,
}

/// Generate a 24-word BIP-39 mnemonic (256 bits of entropy).
pub fn generate_mnemonic() -> Result<String, Box<dyn std::error::Error>> {
    use bip39::{Language, Mnemonic};
    use rand::RngCore;

    let mut entropy = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut entropy);

    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| format!("Failed to generate BIP-39 mnemonic: {}", e))?;
    Ok(mnemonic.to_string())
}

/// Read the mnemonic from `source`.
///
/// # Arguments
/// * `source` - The passphrase source to use
/// * `prompt` - Optional prompt message for stdin mode
pub fn read_passphrase(
    source: PassphraseSource,
    prompt: Option<&str>,
) -> Result<String, Box<dyn std::error::Error>> {
    match source {
        PassphraseSource::File(path) => {
            if !path.exists() {
                return Err(format!("Passphrase file not found: {}", path.display()).into());
            }

            let passphrase = fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read passphrase file: {}", e))?
                .trim()
                .to_string();

            if passphrase.is_empty() {
                return Err("Passphrase file is empty".into());
            }

            Ok(passphrase)
        }
        PassphraseSource::EnvVar => {
            eprintln!("WARNING: Reading the node key from {} is insecure", PASSPHRASE_ENV);
            eprintln!("   Consider using --passphrase-file instead");

            let passphrase = std::env::var(PASSPHRASE_ENV)
                .map_err(|_| format!("{} env var not set", PASSPHRASE_ENV))?;
            Ok(passphrase.trim().to_string())
        }
        PassphraseSource::Stdin => {
            let prompt_msg = prompt.unwrap_or("Enter node mnemonic: ");
            let passphrase = rpassword::prompt_password(prompt_msg)
                .map_err(|e| format!("Failed to read passphrase from stdin: {}", e))?;

            if passphrase.trim().is_empty() {
                return Err("Passphrase cannot be empty".into());
            }

            Ok(passphrase.trim().to_string())
        }
    }
}

/// Determine the mnemonic source.
///
/// 1. `--passphrase-file` if given
/// 2. `TESSERA_KEY_PASSPHRASE` if set
/// 3. `default_file` if it exists
/// 4. stdin
pub fn determine_passphrase_source(
    passphrase_file: Option<String>,
    default_file: &Path,
) -> PassphraseSource {
    select_source(
        passphrase_file,
        std::env::var_os(PASSPHRASE_ENV).is_some(),
        default_file,
    )
}

fn select_source(
    passphrase_file: Option<String>,
    env_set: bool,
    default_file: &Path,
) -> PassphraseSource {
    if let Some(file) = passphrase_file {
        PassphraseSource::File(PathBuf::from(file))
    } else if env_set {
        PassphraseSource::EnvVar
    } else if default_file.exists() {
        PassphraseSource::File(default_file.to_path_buf())
    } else {
        PassphraseSource::Stdin
    }
}

/// Save the mnemonic with owner-only permissions (0600).
pub fn save_passphrase_to_file(
    passphrase: &str,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create passphrase directory: {}", e))?;
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| {
            format!(
                "Failed to create passphrase file '{}': {}",
                path.display(),
                e
            )
        })?;

    writeln!(file, "{}", passphrase)
        .map_err(|e| format!("Failed to write passphrase to '{}': {}", path.display(), e))?;

    Ok(())
}
