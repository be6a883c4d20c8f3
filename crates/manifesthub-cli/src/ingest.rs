//! Account ingestion file parsing for `account` mode.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Deserialize)]
struct Wrapped {
    payload: String,
}

/// Parses the ingestion file's decrypted text: `{ account_name: [password, ...], ... }`.
/// An empty password list is valid (the account may only carry a refresh token later).
fn parse_accounts(text: &str) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    Ok(serde_json::from_str(text)?)
}

/// Reads the ingestion file at `path`, attempting the RSA-wrapped form first
/// and falling back to raw JSON on any failure (missing key, bad base64,
/// wrong key, malformed JSON after unsealing).
pub fn load_ingestion_file(
    content: &str,
    rsa_private_key: Option<&str>,
) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    if let Some(accounts) = try_unseal(content, rsa_private_key) {
        return Ok(accounts);
    }
    parse_accounts(content)
}

fn try_unseal(content: &str, rsa_private_key: Option<&str>) -> Option<BTreeMap<String, Vec<String>>> {
    let key = rsa_private_key?;
    let wrapped: Wrapped = serde_json::from_str(content).ok()?;
    let plaintext = manifesthub_crypto::unseal_rsa(&wrapped.payload, key).ok()?;
    let text = String::from_utf8(plaintext).ok()?;
    parse_accounts(&text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_json_parses_without_a_key() {
        let accounts = load_ingestion_file(r#"{"player1":["hunter2"]}"#, None).unwrap();
        assert_eq!(accounts["player1"], vec!["hunter2".to_string()]);
    }

    #[test]
    fn empty_password_list_is_valid() {
        let accounts = load_ingestion_file(r#"{"player1":[]}"#, None).unwrap();
        assert!(accounts["player1"].is_empty());
    }

    #[test]
    fn falls_back_to_raw_json_when_unseal_payload_missing() {
        let accounts = load_ingestion_file(r#"{"player1":["pw"]}"#, Some("not a real pem")).unwrap();
        assert_eq!(accounts["player1"], vec!["pw".to_string()]);
    }
}
