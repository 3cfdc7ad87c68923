//! User credentials file
//!
//! ```text
//! -----BEGIN USER NKEY SEED-----
//! SU...
//! ------END USER NKEY SEED------
//! ```

use super::error::{BrokerError, BrokerResult};
use crate::crypto::nkey::USER_SEED_PREFIX;
use std::path::Path;

const SEED_BEGIN: &str = "-----BEGIN USER NKEY SEED-----";
const SEED_END: &str = "------END USER NKEY SEED------";

/// Render a credentials file for `seed`
pub fn format_credentials(seed: &str) -> String {
    format!(
        "{}\n{}\n{}\n\n*************************************************************\nNKEY Seed printed above can be used to sign and prove identity.\n    NKEYs are sensitive and should be treated as secrets.\n*************************************************************\n",
        SEED_BEGIN, seed, SEED_END
    )
}

/// Extract the user seed from credentials file contents
pub fn parse_credentials(contents: &str) -> BrokerResult<String> {
    let mut lines = contents.lines().map(str::trim);
    while let Some(line) = lines.next() {
        if line == SEED_BEGIN {
            return lines
                .find(|l| !l.is_empty())
                .filter(|l| l.starts_with(USER_SEED_PREFIX))
                .map(str::to_string)
                .ok_or_else(|| BrokerError::AuthConfig("credentials seed block is empty".to_string()));
        }
    }
    Err(BrokerError::AuthConfig("no user seed found in credentials".to_string()))
}

pub fn read_credentials(path: impl AsRef<Path>) -> BrokerResult<String> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| BrokerError::AuthConfig(format!("{}: {}", path.display(), e)))?;
    parse_credentials(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_then_parse() {
        let text = format_credentials("SUAEXAMPLE");
        assert_eq!(parse_credentials(&text).unwrap(), "SUAEXAMPLE");
    }

    #[test]
    fn test_parse_rejects_missing_block() {
        assert!(parse_credentials("nothing here").is_err());
        assert!(parse_credentials(&format!("{}\nnot-a-seed\n{}", SEED_BEGIN, SEED_END)).is_err());
    }

    #[test]
    fn test_read_missing_file() {
        assert!(matches!(
            read_credentials("/definitely/not/here.creds"),
            Err(BrokerError::AuthConfig(_))
        ));
    }
}
