use usergate_common::models::auth::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ReadSelf,
    ListAll,
    ReadById,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::ReadSelf,
        Action::ListAll,
        Action::ReadById,
        Action::Create,
        Action::Update,
        Action::Delete,
    ];

    /// Lowest role an actor must hold for this action
    pub fn required_role(&self) -> Role {
        match self {
            Action::ReadSelf | Action::ListAll | Action::ReadById => Role::User,
            Action::Create | Action::Update | Action::Delete => Role::Admin,
        }
    }

    fn touches_target(&self) -> bool {
        matches!(self, Action::Update | Action::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Inactive,
    InsufficientRole,
    ProtectedTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// The acting identity as far as the policy is concerned
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub roles: &'a [Role],
    pub is_active: bool,
}

/// Decide whether `actor` may perform `action`.
///
/// Reads are open to every active user, writes need `admin` or above, and a
/// `super_admin` can never be modified or removed through the API.
///
/// `target` carries the roles of the record being acted on once it has been
/// looked up; pass `None` for the pre-lookup check.
pub fn authorize(actor: Subject<'_>, action: Action, target: Option<&[Role]>) -> Decision {
    if !actor.is_active {
        return Decision::Deny(DenyReason::Inactive);
    }
    let holds_required = match Role::highest(actor.roles) {
        Some(highest) => highest >= action.required_role(),
        None => false,
    };
    if !holds_required {
        return Decision::Deny(DenyReason::InsufficientRole);
    }
    if action.touches_target() && target.is_some_and(|roles| roles.contains(&Role::SuperAdmin)) {
        return Decision::Deny(DenyReason::ProtectedTarget);
    }
    Decision::Allow
}

/// Downgrade `super_admin` to `admin` in a requested role set, keeping the
/// first occurrence of each role.
pub fn normalize_requested_roles(roles: &[Role]) -> Vec<Role> {
    let mut normalized: Vec<Role> = Vec::with_capacity(roles.len());
    for role in roles {
        let role = match role {
            Role::SuperAdmin => Role::Admin,
            other => *other,
        };
        if !normalized.contains(&role) {
            normalized.push(role);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(roles: &[Role]) -> Subject<'_> {
        Subject {
            roles,
            is_active: true,
        }
    }

    // Every subset of the six roles
    fn role_sets() -> Vec<Vec<Role>> {
        (0u32..(1 << Role::ALL.len()))
            .map(|mask| {
                Role::ALL
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, r)| *r)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_reads_open_to_any_active_user() {
        for role in Role::ALL {
            for action in [Action::ReadSelf, Action::ListAll, Action::ReadById] {
                assert_eq!(authorize(subject(&[role]), action, None), Decision::Allow);
            }
        }
    }

    #[test]
    fn test_writes_need_admin() {
        for action in [Action::Create, Action::Update, Action::Delete] {
            for role in [Role::User, Role::SuperUser, Role::Teacher, Role::Moderator] {
                assert_eq!(
                    authorize(subject(&[role]), action, None),
                    Decision::Deny(DenyReason::InsufficientRole)
                );
            }
            assert!(authorize(subject(&[Role::Admin]), action, None).is_allowed());
            assert!(authorize(subject(&[Role::SuperAdmin]), action, None).is_allowed());
        }
    }

    #[test]
    fn test_mixed_roles_use_highest() {
        assert!(authorize(subject(&[Role::User, Role::Admin]), Action::Delete, None).is_allowed());
    }

    #[test]
    fn test_no_roles_denied() {
        assert_eq!(
            authorize(subject(&[]), Action::ReadSelf, None),
            Decision::Deny(DenyReason::InsufficientRole)
        );
    }

    #[test]
    fn test_inactive_actor_denied_everything() {
        let actor = Subject {
            roles: &[Role::SuperAdmin],
            is_active: false,
        };
        for action in Action::ALL {
            assert_eq!(
                authorize(actor, action, None),
                Decision::Deny(DenyReason::Inactive)
            );
        }
    }

    #[test]
    fn test_super_admin_target_always_protected() {
        for actor_roles in role_sets() {
            for target_roles in role_sets()
                .into_iter()
                .filter(|r| r.contains(&Role::SuperAdmin))
            {
                for action in [Action::Update, Action::Delete] {
                    let decision = authorize(subject(&actor_roles), action, Some(target_roles.as_slice()));
                    assert!(
                        !decision.is_allowed(),
                        "{:?} on {:?} by {:?} must be denied",
                        action,
                        target_roles,
                        actor_roles
                    );
                }
            }
        }
    }

    #[test]
    fn test_admin_may_modify_non_super_admin() {
        let target = [Role::Admin, Role::Teacher];
        assert!(authorize(subject(&[Role::Admin]), Action::Update, Some(&target[..])).is_allowed());
        assert!(authorize(subject(&[Role::Admin]), Action::Delete, Some(&target[..])).is_allowed());
    }

    #[test]
    fn test_reading_super_admin_is_allowed() {
        let target = [Role::SuperAdmin];
        assert!(authorize(subject(&[Role::User]), Action::ReadById, Some(&target[..])).is_allowed());
    }

    #[test]
    fn test_decisions_are_total() {
        // Exactly one outcome per triple, and it is stable across calls
        for actor_roles in role_sets() {
            for is_active in [true, false] {
                let actor = Subject {
                    roles: &actor_roles,
                    is_active,
                };
                for action in Action::ALL {
                    for target in [None, Some(&[Role::User][..]), Some(&[Role::SuperAdmin][..])] {
                        let first = authorize(actor, action, target);
                        assert_eq!(first, authorize(actor, action, target));
                    }
                }
            }
        }
    }

    #[test]
    fn test_normalize_downgrades_super_admin() {
        assert_eq!(normalize_requested_roles(&[Role::SuperAdmin]), vec![Role::Admin]);
        assert_eq!(
            normalize_requested_roles(&[Role::User, Role::SuperAdmin, Role::Admin]),
            vec![Role::User, Role::Admin]
        );
        assert_eq!(
            normalize_requested_roles(&[Role::Teacher, Role::Teacher]),
            vec![Role::Teacher]
        );
        assert!(normalize_requested_roles(&[]).is_empty());
    }
}
