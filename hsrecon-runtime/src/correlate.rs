//! Cross-scan correlation
//!
//! Looks up the identifiers found in this scan among the edges left by earlier
//! scans of other services.

use std::collections::BTreeSet;
use tracing::{info, warn};

use hsrecon_core::{AnonymityReport, EvidenceStore, TYPE_EMAIL_ADDRESS};

/// Services other than `findings.hidden_service` sharing one of its email
/// addresses, sorted and deduplicated
pub fn related_onions(store: &EvidenceStore, findings: &AnonymityReport) -> Vec<String> {
    let mut related = BTreeSet::new();

    for address in &findings.email_addresses {
        let edges = match store.relationships_for_identifier(address) {
            Ok(edges) => edges,
            Err(e) => {
                warn!("Correlation lookup for {} failed: {}", address, e);
                continue;
            }
        };

        for edge in edges {
            if edge.kind == TYPE_EMAIL_ADDRESS
                && edge.identifier == *address
                && edge.onion != findings.hidden_service
                && related.insert(edge.onion.clone())
            {
                info!(
                    "{} shares {} with {}",
                    findings.hidden_service, address, edge.onion
                );
            }
        }
    }

    related.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsrecon_core::FROM_MAILTO;

    #[test]
    fn test_other_services_only() {
        let store = EvidenceStore::in_memory().unwrap();
        store
            .upsert_relationship("x.onion", FROM_MAILTO, TYPE_EMAIL_ADDRESS, "a@b.com")
            .unwrap();
        store
            .upsert_relationship("z.onion", FROM_MAILTO, TYPE_EMAIL_ADDRESS, "a@b.com")
            .unwrap();
        store
            .upsert_relationship("y.onion", FROM_MAILTO, TYPE_EMAIL_ADDRESS, "a@b.com")
            .unwrap();
        store
            .upsert_relationship("w.onion", FROM_MAILTO, "pgp-key", "a@b.com")
            .unwrap();

        let mut findings = AnonymityReport::new("x.onion");
        findings.email_addresses = vec!["a@b.com".to_string(), "a@b.com".to_string()];

        assert_eq!(
            related_onions(&store, &findings),
            vec!["y.onion".to_string(), "z.onion".to_string()]
        );
    }

    #[test]
    fn test_no_addresses() {
        let store = EvidenceStore::in_memory().unwrap();
        assert!(related_onions(&store, &AnonymityReport::new("x.onion")).is_empty());
    }
}
