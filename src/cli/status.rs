use super::config::{resolve_paths, WelcomerConfig};
use std::path::Path;
use welcomer::dispatch::DedupLedger;
use welcomer::session::{CredentialStore, FileCredentialStore};

/// Show stored session and ledger state
///
/// Reads the credential store and the ledger without modifying either, so
/// it is safe to run next to a live bot.
pub fn execute(
    config_path: Option<String>,
    data_dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, data_dir) = resolve_paths(config_path, data_dir);
    let config = load_config(&config_path)?;

    println!("📊 Welcomer Status");
    println!();
    println!("Config: {}", config_path.display());

    let credentials_path = config.credentials_path(&data_dir);
    let store = FileCredentialStore::new(&credentials_path);
    match store.load()? {
        Some(_) => println!("Session: ✅ credentials stored ({})", credentials_path.display()),
        None => println!("Session: ⏳ not paired (next run starts pairing)"),
    }

    let ledger_path = config.ledger_path(&data_dir);
    println!("Ledger: {}", ledger_path.display());
    println!("Dedup policy: {}", config.dispatch.dedup_policy);

    match DedupLedger::inspect(&ledger_path, config.dispatch.dedup_policy, &config.addresses)? {
        Some(ledger) => {
            println!("Greeted: {}", ledger.len());
            for (group, count) in ledger.group_counts() {
                println!("  {}: {}", group, count);
            }
        }
        None => println!("Greeted: 0 (ledger not created yet)"),
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<WelcomerConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        WelcomerConfig::load(path)
    } else {
        Ok(WelcomerConfig::default())
    }
}
