// src/ingest/providers/mod.rs
pub mod emp;
pub mod popstore;
pub mod vinylcastle;

use crate::ingest::normalize::RuleTable;
use crate::ingest::types::SourceNormalizer;

/// Build the normalizer registered for `source`. `rules` replaces the
/// source's default descriptor table when given.
pub fn normalizer_for(
    source: &str,
    currency: &str,
    rules: Option<RuleTable>,
) -> Option<Box<dyn SourceNormalizer>> {
    let n: Box<dyn SourceNormalizer> = match source {
        emp::SOURCE => {
            let mut n = emp::EmpNormalizer::new(currency);
            if let Some(r) = rules {
                n = n.with_rules(r);
            }
            Box::new(n)
        }
        popstore::SOURCE => {
            let mut n = popstore::PopstoreNormalizer::new(currency);
            if let Some(r) = rules {
                n = n.with_rules(r);
            }
            Box::new(n)
        }
        vinylcastle::SOURCE => {
            let mut n = vinylcastle::VinylCastleNormalizer::new(currency);
            if let Some(r) = rules {
                n = n.with_rules(r);
            }
            Box::new(n)
        }
        _ => return None,
    };
    Some(n)
}
