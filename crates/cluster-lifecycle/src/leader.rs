//! Leadership gate for the monitoring sweep

/// Answers whether this process currently holds leadership
pub trait LeaderGate: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Single-replica deployments and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLeader;

impl LeaderGate for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}
