use crate::models::TicketKind;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of ticket ids. Implementations must be safe to call from any thread.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self, kind: TicketKind) -> String;
}

/// `<PREFIX>-<sequence>-<64 hex chars>[-<node>]`.
///
/// The random part carries 256 bits from the thread-local CSPRNG; the
/// sequence and node suffix only make ids easier to trace in logs.
pub struct TicketIdGenerator {
    sequence: AtomicU64,
    suffix: Option<String>,
}

impl TicketIdGenerator {
    pub fn new(suffix: Option<String>) -> Self {
        Self {
            sequence: AtomicU64::new(1),
            suffix,
        }
    }
}

impl Default for TicketIdGenerator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl IdGenerator for TicketIdGenerator {
    fn next_id(&self, kind: TicketKind) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let random = generate_random_token();
        match &self.suffix {
            Some(suffix) => format!("{}-{}-{}-{}", kind.prefix(), sequence, random, suffix),
            None => format!("{}-{}-{}", kind.prefix(), sequence, random),
        }
    }
}

fn generate_random_token() -> String {
    let random_bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(random_bytes)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_format() {
        let generator = TicketIdGenerator::new(Some("node-a".to_string()));
        let id = generator.next_id(TicketKind::Service);

        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "ST");
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2].len(), 64);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id.ends_with("-node-a"));

        let tgt = generator.next_id(TicketKind::TicketGranting);
        assert!(tgt.starts_with("TGT-2-"));
    }

    #[test]
    fn test_ids_are_unique() {
        let generator = TicketIdGenerator::default();
        let ids: HashSet<String> = (0..1000)
            .map(|_| generator.next_id(TicketKind::Service))
            .collect();
        assert_eq!(ids.len(), 1000);
    }
}
