//! Resolution of the account type an operation acts upon.
//!
//! User operations come in two parallel permission families: one for regular
//! accounts and one for service accounts. The family the actor holds, the type
//! requested in the operation and the type of the existing record must agree;
//! any disagreement is rejected rather than resolved in favour of one side.

use keyward_core::{DomainError, DomainResult};

use crate::enforcer::EffectiveGrant;
use crate::permissions::Permission;
use crate::user::AccountType;

/// Regular and service variants of one operation.
#[derive(Debug, Clone, Copy)]
pub struct PermissionFamily {
    pub regular: &'static [Permission],
    pub service: &'static [Permission],
    /// Widens the actor's own account type when acting on itself.
    pub self_scoped: Option<&'static Permission>,
}

pub const USERS_READ: PermissionFamily = PermissionFamily {
    regular: &[Permission::UsersFullControl, Permission::UsersRead],
    service: &[Permission::UsersFullControlService, Permission::UsersReadService],
    self_scoped: Some(&Permission::UsersReadSelf),
};

pub const USERS_WRITE: PermissionFamily = PermissionFamily {
    regular: &[Permission::UsersFullControl, Permission::UsersWrite],
    service: &[Permission::UsersFullControlService, Permission::UsersWriteService],
    self_scoped: Some(&Permission::UsersWriteSelf),
};

pub const USERS_CREATE: PermissionFamily = PermissionFamily {
    regular: &[Permission::UsersFullControl, Permission::UsersWrite],
    service: &[Permission::UsersFullControlService, Permission::UsersWriteService],
    self_scoped: None,
};

/// The actor side of the decision.
#[derive(Debug, Clone, Copy)]
pub struct Acting<'a> {
    pub grant: &'a EffectiveGrant,
    pub account_type: AccountType,
    /// Actor is the target of the operation.
    pub is_self: bool,
}

/// Decide which account type the operation acts upon.
///
/// - Neither family granted: `Forbidden`.
/// - Exactly one family granted: that type, which must agree with `requested`
///   and `existing` when they are known.
/// - Both granted: the type is taken from `requested`/`existing`, which must
///   agree with each other; `Regular` when neither is known.
pub fn resolve_account_type(
    acting: Acting<'_>,
    family: &PermissionFamily,
    requested: Option<AccountType>,
    existing: Option<AccountType>,
) -> DomainResult<AccountType> {
    let self_granted = acting.is_self
        && family
            .self_scoped
            .is_some_and(|p| acting.grant.is_any_granted(std::slice::from_ref(p)));

    let regular = acting.grant.is_any_granted(family.regular)
        || (self_granted && acting.account_type == AccountType::Regular);
    let service = acting.grant.is_any_granted(family.service)
        || (self_granted && acting.account_type == AccountType::Service);

    let granted = match (regular, service) {
        (true, false) => Some(AccountType::Regular),
        (false, true) => Some(AccountType::Service),
        (true, true) => None,
        (false, false) => return Err(DomainError::forbidden("no account permission granted")),
    };

    let mut resolved: Option<AccountType> = None;
    for candidate in [granted, requested, existing].into_iter().flatten() {
        match resolved {
            Some(current) if current != candidate => {
                return Err(DomainError::forbidden(format!(
                    "account type conflict: {current} vs {candidate}"
                )));
            }
            _ => resolved = Some(candidate),
        }
    }
    Ok(resolved.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{Enforcer, RoleCatalogue, RoleName};

    fn grant(names: &[&'static str]) -> EffectiveGrant {
        let enforcer = Enforcer::new(Arc::new(RoleCatalogue::builtin().unwrap()));
        let names: Vec<RoleName> = names.iter().copied().map(RoleName::from_static).collect();
        enforcer.resolve(&names)
    }

    fn acting(grant: &EffectiveGrant, is_self: bool) -> Acting<'_> {
        Acting {
            grant,
            account_type: AccountType::Regular,
            is_self,
        }
    }

    #[test]
    fn neither_family_is_forbidden() {
        let g = grant(&["service"]);
        let err = resolve_account_type(acting(&g, false), &USERS_WRITE, None, None).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn self_variant_widens_only_for_self() {
        let g = grant(&["regular"]);
        assert_eq!(
            resolve_account_type(acting(&g, true), &USERS_WRITE, None, Some(AccountType::Regular))
                .unwrap(),
            AccountType::Regular
        );
        assert!(
            resolve_account_type(acting(&g, false), &USERS_WRITE, None, Some(AccountType::Regular))
                .is_err()
        );
    }

    #[test]
    fn single_family_must_match_resource() {
        let g = grant(&["regular"]);
        // Regular actor acting on itself, but the record is a service account.
        let err = resolve_account_type(acting(&g, true), &USERS_WRITE, None, Some(AccountType::Service))
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn both_families_follow_resource() {
        let g = grant(&["admin"]);
        assert_eq!(
            resolve_account_type(acting(&g, false), &USERS_WRITE, None, Some(AccountType::Service))
                .unwrap(),
            AccountType::Service
        );
        assert_eq!(
            resolve_account_type(acting(&g, false), &USERS_CREATE, None, None).unwrap(),
            AccountType::Regular
        );
    }

    #[test]
    fn requested_and_existing_disagreeing_is_forbidden() {
        let g = grant(&["admin"]);
        let err = resolve_account_type(
            acting(&g, false),
            &USERS_WRITE,
            Some(AccountType::Regular),
            Some(AccountType::Service),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }
}
