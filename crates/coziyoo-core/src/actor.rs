//! Per-request actor resolution.
//!
//! Every route declares `{realm, allowed roles}`. For `both`-capability app
//! users the effective role comes from the `x-actor-role` header, validated
//! against the capability; single-capability users fall back to their only
//! role when the header is absent.

use crate::error::{CoreError, ErrorCode};
use crate::identity::AuthContext;
use crate::types::{ActorRole, AdminRole, Realm, UserCapability};
use uuid::Uuid;

/// The resolved caller for one request.
#[derive(Debug, Clone)]
pub enum Actor {
    App {
        user_id: Uuid,
        session_id: Uuid,
        capability: UserCapability,
        role: ActorRole,
    },
    Admin {
        admin_id: Uuid,
        session_id: Uuid,
        role: AdminRole,
    },
}

impl Actor {
    pub fn realm(&self) -> Realm {
        match self {
            Self::App { .. } => Realm::App,
            Self::Admin { .. } => Realm::Admin,
        }
    }

    pub fn subject_id(&self) -> Uuid {
        match self {
            Self::App { user_id, .. } => *user_id,
            Self::Admin { admin_id, .. } => *admin_id,
        }
    }

    pub fn app_role(&self) -> Option<ActorRole> {
        match self {
            Self::App { role, .. } => Some(*role),
            Self::Admin { .. } => None,
        }
    }

    pub fn admin_id(&self) -> Result<Uuid, CoreError> {
        match self {
            Self::Admin { admin_id, .. } => Ok(*admin_id),
            Self::App { .. } => Err(CoreError::domain(
                ErrorCode::RoleNotAllowed,
                "admin realm required",
            )),
        }
    }
}

/// Pick the effective role for an app caller.
pub fn resolve_actor_role(
    capability: UserCapability,
    requested: Option<ActorRole>,
) -> Result<ActorRole, CoreError> {
    match requested {
        Some(role) if capability.allows(role) => Ok(role),
        Some(role) => Err(CoreError::domain(
            ErrorCode::RoleNotAllowed,
            format!("account cannot act as '{}'", role.as_str()),
        )),
        None => match capability {
            UserCapability::Buyer => Ok(ActorRole::Buyer),
            UserCapability::Seller => Ok(ActorRole::Seller),
            // Ambiguity default: both-users act as buyers unless they say otherwise.
            UserCapability::Both => Ok(ActorRole::Buyer),
        },
    }
}

pub fn build_app_actor(
    ctx: &AuthContext,
    requested_role: Option<ActorRole>,
) -> Result<Actor, CoreError> {
    if ctx.realm != Realm::App {
        return Err(CoreError::domain(
            ErrorCode::AuthRealmMismatch,
            "app realm required",
        ));
    }
    let capability = UserCapability::parse(&ctx.role)?;
    let role = resolve_actor_role(capability, requested_role)?;
    Ok(Actor::App {
        user_id: ctx.user_id,
        session_id: ctx.session_id,
        capability,
        role,
    })
}

pub fn build_admin_actor(ctx: &AuthContext) -> Result<Actor, CoreError> {
    if ctx.realm != Realm::Admin {
        return Err(CoreError::domain(
            ErrorCode::AuthRealmMismatch,
            "admin realm required",
        ));
    }
    Ok(Actor::Admin {
        admin_id: ctx.user_id,
        session_id: ctx.session_id,
        role: AdminRole::parse(&ctx.role)?,
    })
}

pub fn require_role(actor: &Actor, allowed: &[ActorRole]) -> Result<(), CoreError> {
    match actor.app_role() {
        Some(role) if allowed.contains(&role) => Ok(()),
        _ => Err(CoreError::domain(
            ErrorCode::RoleNotAllowed,
            "this endpoint is not available to the active role",
        )),
    }
}

pub fn require_super_admin(actor: &Actor) -> Result<(), CoreError> {
    match actor {
        Actor::Admin {
            role: AdminRole::SuperAdmin,
            ..
        } => Ok(()),
        _ => Err(CoreError::domain(
            ErrorCode::RoleNotAllowed,
            "super admin role required",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_user_selects_role_via_header() {
        assert_eq!(
            resolve_actor_role(UserCapability::Both, Some(ActorRole::Seller)).unwrap(),
            ActorRole::Seller
        );
        assert_eq!(
            resolve_actor_role(UserCapability::Both, None).unwrap(),
            ActorRole::Buyer
        );
    }

    #[test]
    fn capability_mismatch_is_role_not_allowed() {
        let err = resolve_actor_role(UserCapability::Buyer, Some(ActorRole::Seller)).unwrap_err();
        assert_eq!(err.code().as_str(), "ROLE_NOT_ALLOWED");
    }

    #[test]
    fn single_capability_defaults_without_header() {
        assert_eq!(
            resolve_actor_role(UserCapability::Seller, None).unwrap(),
            ActorRole::Seller
        );
    }

    #[test]
    fn role_gate_rejects_admin_actor() {
        let actor = Actor::Admin {
            admin_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            role: AdminRole::Admin,
        };
        let err = require_role(&actor, &[ActorRole::Buyer]).unwrap_err();
        assert_eq!(err.code().as_str(), "ROLE_NOT_ALLOWED");
    }
}
