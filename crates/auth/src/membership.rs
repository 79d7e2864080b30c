//! Membership records and their pure state transitions.
//!
//! A membership binds one user to one tenant. Status only moves
//! `Invited → Active`; a usable membership holds at least one role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::{DomainError, DomainResult, TenantId, UserId};

use crate::roles::{RoleName, RoleSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipType {
    Owner,
    Member,
}

impl MembershipType {
    pub fn as_str(self) -> &'static str {
        match self {
            MembershipType::Owner => "owner",
            MembershipType::Member => "member",
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw {
            "owner" => Ok(MembershipType::Owner),
            "member" => Ok(MembershipType::Member),
            other => Err(DomainError::validation(format!("unknown membership type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Invited,
    Active,
}

impl MembershipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MembershipStatus::Invited => "invited",
            MembershipStatus::Active => "active",
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw {
            "invited" => Ok(MembershipStatus::Invited),
            "active" => Ok(MembershipStatus::Active),
            other => Err(DomainError::validation(format!("unknown membership status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub membership_type: MembershipType,
    pub status: MembershipStatus,
    pub roles: RoleSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of accepting an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Activated,
    /// Replay against an already active membership; nothing changed.
    AlreadyActive,
}

impl Membership {
    fn build(
        tenant_id: TenantId,
        user_id: UserId,
        membership_type: MembershipType,
        status: MembershipStatus,
        roles: RoleSet,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if roles.is_empty() {
            return Err(DomainError::validation("membership requires at least one role"));
        }
        Ok(Self {
            tenant_id,
            user_id,
            membership_type,
            status,
            roles,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn invited(
        tenant_id: TenantId,
        user_id: UserId,
        membership_type: MembershipType,
        roles: RoleSet,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::build(tenant_id, user_id, membership_type, MembershipStatus::Invited, roles, now)
    }

    pub fn active(
        tenant_id: TenantId,
        user_id: UserId,
        membership_type: MembershipType,
        roles: RoleSet,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::build(tenant_id, user_id, membership_type, MembershipStatus::Active, roles, now)
    }

    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }

    pub fn is_owner(&self) -> bool {
        self.membership_type == MembershipType::Owner
    }

    /// Replace the terms of a pending invitation. Returns whether anything
    /// changed; an active membership is changed through a patch instead.
    pub fn reinvite(
        &mut self,
        membership_type: MembershipType,
        roles: RoleSet,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        if self.status != MembershipStatus::Invited {
            return Err(DomainError::MembershipExists);
        }
        if roles.is_empty() {
            return Err(DomainError::validation("membership requires at least one role"));
        }
        if self.membership_type == membership_type && self.roles == roles {
            return Ok(false);
        }
        self.membership_type = membership_type;
        self.roles = roles;
        self.updated_at = now;
        Ok(true)
    }

    /// `Invited → Active`. Idempotent on an active membership.
    pub fn accept(&mut self, now: DateTime<Utc>) -> AcceptOutcome {
        match self.status {
            MembershipStatus::Active => AcceptOutcome::AlreadyActive,
            MembershipStatus::Invited => {
                self.status = MembershipStatus::Active;
                self.updated_at = now;
                AcceptOutcome::Activated
            }
        }
    }
}

/// Patch over a membership's roles and type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MembershipPatch {
    #[serde(default)]
    pub add_roles: RoleSet,
    #[serde(default)]
    pub remove_roles: RoleSet,
    #[serde(default)]
    pub membership_type: Option<MembershipType>,
}

impl MembershipPatch {
    pub fn is_empty(&self) -> bool {
        self.add_roles.is_empty() && self.remove_roles.is_empty() && self.membership_type.is_none()
    }

    /// Roles named by the patch, all of which need delegation rights.
    pub fn touched_roles(&self) -> RoleSet {
        self.add_roles.union(&self.remove_roles).cloned().collect()
    }

    /// Produce the patched record.
    ///
    /// `tenant_owners` is the number of owner memberships currently in the
    /// tenant; demoting the last one is rejected.
    pub fn apply(
        &self,
        current: &Membership,
        tenant_owners: usize,
        now: DateTime<Utc>,
    ) -> DomainResult<Membership> {
        if self.is_empty() {
            return Err(DomainError::validation("empty membership patch"));
        }
        if let Some(role) = self.add_roles.intersection(&self.remove_roles).next() {
            return Err(DomainError::validation(format!(
                "role '{role}' is both added and removed"
            )));
        }

        let mut next = current.clone();
        next.roles.extend(self.add_roles.iter().cloned());
        next.roles.retain(|r: &RoleName| !self.remove_roles.contains(r));
        if next.roles.is_empty() {
            return Err(DomainError::validation("membership requires at least one role"));
        }

        if let Some(membership_type) = self.membership_type {
            let demotes_owner =
                current.is_owner() && membership_type == MembershipType::Member;
            if demotes_owner && tenant_owners <= 1 {
                return Err(DomainError::validation("tenant must keep at least one owner"));
            }
            next.membership_type = membership_type;
        }

        next.updated_at = now;
        Ok(next)
    }
}
