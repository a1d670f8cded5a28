use super::config::{resolve_paths, WelcomerConfig};
use std::io::{self, Write};
use welcomer::session::{CredentialStore, FileCredentialStore};

/// Delete stored session credentials
///
/// After the network logs the session out, the stored credentials are dead;
/// removing them makes the next `welcomer run` start a fresh pairing. The
/// ledger is left alone, so nobody is greeted twice after re-pairing.
pub fn execute(
    config_path: Option<String>,
    data_dir: Option<String>,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, data_dir) = resolve_paths(config_path, data_dir);
    let config = if config_path.exists() {
        WelcomerConfig::load(&config_path)?
    } else {
        WelcomerConfig::default()
    };

    let credentials_path = config.credentials_path(&data_dir);
    let store = FileCredentialStore::new(&credentials_path);
    if store.load()?.is_none() {
        println!("No stored credentials at {}", credentials_path.display());
        return Ok(());
    }

    println!("⚠️  This removes the session credentials at:");
    println!("   {}", credentials_path.display());
    println!("The next run will require pairing again.");
    println!();

    if !yes && !confirm_action("Type 'RESET' to confirm: ", "RESET")? {
        println!("Aborted.");
        return Ok(());
    }

    store.clear()?;
    println!("✅ Session credentials removed");
    Ok(())
}

/// Check user confirmation input against an expected string
///
/// Trims surrounding whitespace (stdin includes the newline); otherwise
/// exact and case-sensitive.
pub fn parse_confirmation(input: &str, expected: &str) -> bool {
    input.trim() == expected
}

fn confirm_action(prompt: &str, expected: &str) -> Result<bool, Box<dyn std::error::Error>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(parse_confirmation(&input, expected))
}
