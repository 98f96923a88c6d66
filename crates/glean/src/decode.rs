//! `glean decode`: show what a reference points at.

use glean_nostr::{EventPointer, Reference};
use miette::{IntoDiagnostic, Result};
use serde_json::json;

pub fn run(input: &str) -> Result<()> {
    let reference = Reference::parse(input).into_diagnostic()?;
    let query_key = reference.query_key();

    let line = match reference {
        Reference::Coordinate(coordinate) => {
            let naddr = coordinate.encode().into_diagnostic()?;
            json!({
                "type": "coordinate",
                "query_key": query_key,
                "kind": coordinate.kind,
                "pubkey": coordinate.pubkey,
                "identifier": coordinate.identifier,
                "relays": coordinate.relays,
                "naddr": naddr,
            })
        }
        Reference::EventId(id) => {
            let nevent = EventPointer {
                id: id.clone(),
                author: None,
                kind: None,
                relays: Vec::new(),
            }
            .encode()
            .into_diagnostic()?;
            json!({
                "type": "event",
                "query_key": query_key,
                "id": id,
                "nevent": nevent,
            })
        }
        Reference::Url(url) => json!({
            "type": "url",
            "query_key": query_key,
            "url": url,
        }),
    };

    println!("{line}");
    Ok(())
}
