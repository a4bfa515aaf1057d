//! # Access Control Gate
//!
//! Role checks run before any state validation. The agent is fixed at
//! engine construction; buyer and seller are fixed per escrow at deposit.

use trustmesh_core::Address;

use crate::error::EscrowError;
use crate::escrow::Escrow;

/// A party's relationship to an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Deposited the funds.
    Buyer,
    /// Receives funds on release and links the shipment.
    Seller,
    /// Arbitrates release, refund, and extension.
    Agent,
}

impl Role {
    /// Return the canonical string name of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks callers against the roles an operation requires.
#[derive(Debug, Clone)]
pub struct AccessGate {
    agent: Address,
}

impl AccessGate {
    /// A gate for the given agent identity.
    pub fn new(agent: Address) -> Self {
        Self { agent }
    }

    /// The configured agent.
    pub fn agent(&self) -> &Address {
        &self.agent
    }

    /// Require `caller` to be the agent.
    pub fn require_agent(&self, caller: &Address) -> Result<(), EscrowError> {
        if caller != &self.agent {
            tracing::debug!(%caller, required = %Role::Agent, "access denied");
            return Err(EscrowError::NotAgent {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    /// Require `caller` to be the escrow's buyer.
    pub fn require_buyer(&self, escrow: &Escrow, caller: &Address) -> Result<(), EscrowError> {
        if caller != &escrow.buyer {
            self.log_denied(escrow, caller, Role::Buyer);
            return Err(EscrowError::NotBuyer {
                escrow_id: escrow.id,
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    /// Require `caller` to be the escrow's seller.
    pub fn require_seller(&self, escrow: &Escrow, caller: &Address) -> Result<(), EscrowError> {
        if caller != &escrow.seller {
            self.log_denied(escrow, caller, Role::Seller);
            return Err(EscrowError::NotSeller {
                escrow_id: escrow.id,
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    fn log_denied(&self, escrow: &Escrow, caller: &Address, required: Role) {
        let held: Vec<&str> = self
            .roles_of(escrow, caller)
            .iter()
            .map(Role::as_str)
            .collect();
        tracing::debug!(
            escrow_id = %escrow.id,
            %caller,
            %required,
            held = %held.join(","),
            "access denied"
        );
    }

    /// Every role `caller` holds with respect to `escrow`.
    pub fn roles_of(&self, escrow: &Escrow, caller: &Address) -> Vec<Role> {
        let mut roles = Vec::new();
        if caller == &escrow.buyer {
            roles.push(Role::Buyer);
        }
        if caller == &escrow.seller {
            roles.push(Role::Seller);
        }
        if caller == &self.agent {
            roles.push(Role::Agent);
        }
        roles
    }
}
