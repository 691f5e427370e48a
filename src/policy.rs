//! Roles, actors and the authorization questions the coordinator asks.
//!
//! Numeric user-type ids are resolved into [`Role`] once, from configuration,
//! and the resulting [`AccessPolicy`] is handed to the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RoleConfig;
use crate::error::{DispatchError, Result};
use crate::state_machine::{Job, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Worker,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Customer => write!(f, "customer"),
            Role::Worker => write!(f, "worker"),
            Role::Admin => write!(f, "admin"),
            Role::SuperAdmin => write!(f, "super-admin"),
        }
    }
}

/// An already-authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn customer(id: u64) -> Self {
        Self::new(UserId(id), Role::Customer)
    }

    pub fn worker(id: u64) -> Self {
        Self::new(UserId(id), Role::Worker)
    }

    pub fn admin(id: u64) -> Self {
        Self::new(UserId(id), Role::Admin)
    }

    pub fn is_elevated(&self) -> bool {
        self.role.is_elevated()
    }

    pub(crate) fn deny(&self, operation: &'static str) -> DispatchError {
        DispatchError::Unauthorized {
            actor: self.id,
            role: self.role,
            operation,
        }
    }
}

/// Capability object built from the role table at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    roles: RoleConfig,
}

impl AccessPolicy {
    pub fn new(roles: RoleConfig) -> Self {
        Self { roles }
    }

    /// Map the numeric user type carried by the auth layer to a role.
    pub fn resolve(&self, user_type: u32) -> Option<Role> {
        let r = &self.roles;
        if user_type == r.super_admin_role_id {
            Some(Role::SuperAdmin)
        } else if user_type == r.admin_role_id {
            Some(Role::Admin)
        } else if user_type == r.worker_role_id {
            Some(Role::Worker)
        } else if user_type == r.customer_role_id {
            Some(Role::Customer)
        } else {
            None
        }
    }

    /// Build an actor from an authenticated user id and its numeric type.
    pub fn actor(&self, id: UserId, user_type: u32) -> Option<Actor> {
        self.resolve(user_type).map(|role| Actor::new(id, role))
    }

    pub fn can_create(&self, actor: &Actor) -> bool {
        actor.role == Role::Customer || actor.is_elevated()
    }

    pub fn can_accept(&self, actor: &Actor) -> bool {
        actor.role == Role::Worker
    }

    /// Customers look at their own jobs through the history view instead.
    pub fn can_list_jobs(&self, actor: &Actor) -> bool {
        actor.role == Role::Worker || actor.is_elevated()
    }

    /// User ids are only unique within a role, so the role is checked too.
    pub fn is_assignee(&self, actor: &Actor, job: &Job) -> bool {
        actor.role == Role::Worker && job.assigned_worker == Some(actor.id)
    }

    pub fn is_owner(&self, actor: &Actor, job: &Job) -> bool {
        actor.role == Role::Customer && job.customer == actor.id
    }

    /// Starting and ending work: the assigned worker or an administrator.
    pub fn can_work_on(&self, actor: &Actor, job: &Job) -> bool {
        actor.is_elevated() || self.is_assignee(actor, job)
    }

    pub fn can_cancel(&self, actor: &Actor, job: &Job) -> bool {
        actor.is_elevated() || self.is_assignee(actor, job) || self.is_owner(actor, job)
    }

    pub fn can_reopen(&self, actor: &Actor, job: &Job) -> bool {
        actor.is_elevated() || self.is_owner(actor, job)
    }

    /// Editing job details: the owning customer or an administrator.
    pub fn can_edit(&self, actor: &Actor, job: &Job) -> bool {
        actor.is_elevated() || self.is_owner(actor, job)
    }

    /// History of `user` is visible to that user and to administrators.
    pub fn can_view_history(&self, actor: &Actor, user: UserId) -> bool {
        actor.is_elevated() || actor.id == user
    }

    pub fn require(&self, allowed: bool, actor: &Actor, operation: &'static str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(actor.deny(operation))
        }
    }
}
