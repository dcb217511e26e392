use crate::token::Token;

/// Maps keys (and target replica labels) to ring positions.
///
/// Implementations must be seed-free: two processes sharing a ring
/// configuration have to agree on every placement.
pub trait Partitioner: Send + Sync + 'static {
    type TokenType: Token;

    fn partition(&self, key: &[u8]) -> Self::TokenType;

    /// Short name for logs and reports.
    fn name(&self) -> &'static str;
}
