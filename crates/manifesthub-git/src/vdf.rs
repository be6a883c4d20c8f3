//! `Key.vdf` codec: parsing via `keyvalues-parser`, rendering via direct
//! template formatting. VDF's recursive key/value grammar is simple enough
//! that hand-formatting keeps the rendered bytes stable across runs, which
//! the archive relies on to detect "no content change" writes.

use keyvalues_parser::{Value, Vdf};
use std::collections::BTreeMap;

/// Parses a `Key.vdf` document into a sorted map of `depot_id -> hex key`.
///
/// Malformed documents — including an empty or missing file — parse to an
/// empty map rather than erroring, matching the archive's policy of
/// treating unreadable tree blobs as "empty document".
pub fn parse(content: &str) -> BTreeMap<u32, String> {
    let mut out = BTreeMap::new();
    let Ok(vdf) = Vdf::parse(content) else {
        return out;
    };
    let Value::Obj(depots) = vdf.value else {
        return out;
    };
    for (depot_id_str, values) in depots.iter() {
        let Ok(depot_id) = depot_id_str.parse::<u32>() else {
            continue;
        };
        for value in values {
            let Value::Obj(fields) = value else { continue };
            let Some(key_values) = fields.get("DecryptionKey") else {
                continue;
            };
            if let Some(Value::Str(hex_key)) = key_values.first() {
                out.insert(depot_id, hex_key.to_string());
            }
        }
    }
    out
}

/// Renders a sorted `depot_id -> hex key` map back into `Key.vdf` text.
pub fn render(depots: &BTreeMap<u32, String>) -> String {
    let mut body = String::new();
    for (depot_id, hex_key) in depots {
        body.push_str(&format!(
            "\t\"{depot_id}\"\n\t{{\n\t\t\"DecryptionKey\"\t\t\"{hex_key}\"\n\t}}\n"
        ));
    }
    format!("\"depots\"\n{{\n{body}}}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_parses_to_empty_map() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn garbage_content_parses_to_empty_map() {
        assert!(parse("not valid vdf {{{").is_empty());
    }

    #[test]
    fn render_then_parse_roundtrips() {
        let mut depots = BTreeMap::new();
        depots.insert(20u32, "aa".repeat(32));
        depots.insert(30u32, "bb".repeat(32));
        let rendered = render(&depots);
        let parsed = parse(&rendered);
        assert_eq!(parsed, depots);
    }

    #[test]
    fn render_is_sorted_by_depot_id() {
        let mut depots = BTreeMap::new();
        depots.insert(300u32, "cc".repeat(32));
        depots.insert(10u32, "dd".repeat(32));
        let rendered = render(&depots);
        let pos_10 = rendered.find("\"10\"").unwrap();
        let pos_300 = rendered.find("\"300\"").unwrap();
        assert!(pos_10 < pos_300);
    }
}
