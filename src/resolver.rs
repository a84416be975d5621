//! Block reference resolution.

use tracing::trace;

use crate::chain::ChainReader;
use crate::config::CanonicalPolicy;
use crate::error::ApiError;
use crate::state::StateSnapshot;
use crate::types::{BlockNumber, BlockReference, SealedHeader};

/// Resolves a reference to a header.
///
/// `latest` and `pending` both resolve to the current head; numbers and
/// `earliest` are canonical lookups; hashes match any known block unless the
/// reference requires a canonical one and `policy` enforces it.
pub fn resolve_header(
    chain: &dyn ChainReader,
    reference: &BlockReference,
    policy: CanonicalPolicy,
) -> Result<SealedHeader, ApiError> {
    let header = match *reference {
        BlockReference::Number(BlockNumber::Latest | BlockNumber::Pending) => Some(chain.current_header()),
        BlockReference::Number(BlockNumber::Earliest) => chain.header_by_number(0),
        BlockReference::Number(BlockNumber::Number(number)) => chain.header_by_number(number),
        BlockReference::Hash {
            hash,
            require_canonical,
        } => {
            let header = chain.header_by_hash(hash).ok_or(ApiError::NotFound(*reference))?;
            if require_canonical && policy == CanonicalPolicy::Enforce {
                ensure_canonical(chain, &header)?;
            }
            Some(header)
        }
    };
    header.ok_or(ApiError::NotFound(*reference))
}

/// Resolves a reference to its header and a private copy of the post-state.
pub fn resolve_state(
    chain: &dyn ChainReader,
    reference: &BlockReference,
    policy: CanonicalPolicy,
) -> Result<(SealedHeader, StateSnapshot), ApiError> {
    let header = resolve_header(chain, reference, policy)?;
    let state = chain
        .state_at(header.hash())
        .ok_or(ApiError::StateUnavailable(header.hash()))?;
    trace!(%reference, number = header.number(), hash = %header.hash(), "Resolved block reference");
    Ok((header, state))
}

fn ensure_canonical(chain: &dyn ChainReader, header: &SealedHeader) -> Result<(), ApiError> {
    let hash = header.hash();
    match chain.canonical_hash(header.number()) {
        Some(canonical) if canonical == hash => Ok(()),
        _ => Err(ApiError::NonCanonical(hash)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::types::Block;
    use alloy_consensus::Header;
    use alloy_primitives::B256;

    struct Fixture {
        chain: MemoryChain,
        genesis: B256,
        canonical: B256,
        side: B256,
    }

    fn fixture() -> Fixture {
        let chain = MemoryChain::new(
            1,
            Header {
                gas_limit: 30_000_000,
                ..Default::default()
            },
            StateSnapshot::new(),
        );
        let genesis = chain.current_header();
        let insert = |extra: u8, canonical: bool| {
            let mut header = genesis.child();
            header.extra_data = vec![extra].into();
            let block = Block {
                header: SealedHeader::seal(header),
                transactions: Vec::new(),
            };
            chain
                .insert_block(block, Vec::new(), StateSnapshot::new(), canonical)
                .unwrap()
        };
        let canonical = insert(1, true);
        let side = insert(2, false);
        Fixture {
            genesis: genesis.hash(),
            canonical,
            side,
            chain,
        }
    }

    #[test]
    fn test_tags_resolve_to_head() {
        let f = fixture();
        for reference in [BlockReference::latest(), BlockReference::pending()] {
            let header = resolve_header(&f.chain, &reference, CanonicalPolicy::Enforce).unwrap();
            assert_eq!(header.hash(), f.canonical);
        }
        let earliest = BlockReference::Number(BlockNumber::Earliest);
        let header = resolve_header(&f.chain, &earliest, CanonicalPolicy::Enforce).unwrap();
        assert_eq!(header.hash(), f.genesis);
    }

    #[test]
    fn test_missing_number_and_hash() {
        let f = fixture();
        let reference = BlockReference::number(99);
        assert_eq!(
            resolve_header(&f.chain, &reference, CanonicalPolicy::Enforce),
            Err(ApiError::NotFound(reference))
        );
        let reference = BlockReference::hash(B256::repeat_byte(3));
        assert_eq!(
            resolve_state(&f.chain, &reference, CanonicalPolicy::Enforce).map(|(h, _)| h),
            Err(ApiError::NotFound(reference))
        );
    }

    #[test]
    fn test_canonical_enforcement() {
        let f = fixture();
        let reference = BlockReference::canonical_hash(f.side);
        assert_eq!(
            resolve_header(&f.chain, &reference, CanonicalPolicy::Enforce),
            Err(ApiError::NonCanonical(f.side))
        );
        let header = resolve_header(&f.chain, &reference, CanonicalPolicy::Ignore).unwrap();
        assert_eq!(header.hash(), f.side);

        // Without the flag a side block is always accepted.
        let header =
            resolve_header(&f.chain, &BlockReference::hash(f.side), CanonicalPolicy::Enforce).unwrap();
        assert_eq!(header.hash(), f.side);

        let header = resolve_header(
            &f.chain,
            &BlockReference::canonical_hash(f.canonical),
            CanonicalPolicy::Enforce,
        )
        .unwrap();
        assert_eq!(header.hash(), f.canonical);
    }
}
