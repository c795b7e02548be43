pub type BF = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

/// Identifies one peer session towards the shared piece storage, so a
/// session can skip the haves it advertised itself.
pub type SessionId = u64;
