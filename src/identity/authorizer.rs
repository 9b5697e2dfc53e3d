use crate::error::{AppError, AppResult};

use super::principal::Principal;
use super::user::{Role, User};

pub fn has_role(user: &User, role: Role) -> bool {
    user.role == role
}

/// Permission gate. Only SUPER_ADMIN holds permissions; the per-role permission
/// table of the dashboard was never wired up, so no other role is consulted.
pub fn has_permission(user: &User, _permission: &str) -> bool {
    user.role == Role::SuperAdmin
}

pub fn ensure_super_admin(principal: &Principal) -> AppResult<()> {
    if principal.role == Role::SuperAdmin {
        Ok(())
    } else {
        Err(AppError::permission_denied("You do not have permission to perform this action"))
    }
}

/// Only a document's author may mutate it.
pub fn ensure_author(actor_id: &str, author_id: &str) -> AppResult<()> {
    if actor_id == author_id {
        Ok(())
    } else {
        Err(AppError::permission_denied("Only the author can modify this document"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::user::Profile;

    fn user(role: Role) -> User {
        let now = chrono::Utc::now();
        User {
            id: "u".into(),
            email: "u@x.com".into(),
            name: "U".into(),
            role,
            active: true,
            profile: Profile::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn only_super_admin_has_permissions() {
        assert!(has_permission(&user(Role::SuperAdmin), "documents.delete"));
        assert!(!has_permission(&user(Role::Admin), "documents.delete"));
        assert!(!has_permission(&user(Role::Moderator), "documents.delete"));
        assert!(!has_permission(&user(Role::User), "documents.read"));
    }

    #[test]
    fn role_check_is_exact() {
        assert!(has_role(&user(Role::Admin), Role::Admin));
        assert!(!has_role(&user(Role::SuperAdmin), Role::Admin));
    }

    #[test]
    fn author_guard() {
        assert!(ensure_author("a", "a").is_ok());
        assert_eq!(ensure_author("b", "a").unwrap_err().http_status(), 403);
    }

    #[test]
    fn super_admin_guard() {
        let p = Principal { subject: "s".into(), email: "s@x.com".into(), role: Role::Admin };
        assert!(matches!(ensure_super_admin(&p), Err(AppError::PermissionDenied { .. })));
        let p = Principal { role: Role::SuperAdmin, ..p };
        assert!(ensure_super_admin(&p).is_ok());
    }
}
