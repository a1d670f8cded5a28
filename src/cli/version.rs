/// Display version information
pub fn execute() {
    println!("welcomer {}", env!("CARGO_PKG_VERSION"));
    println!("Operator CLI for the Welcomer group welcome bot");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_execute() {
        // Version command should not panic
        execute();
    }
}
