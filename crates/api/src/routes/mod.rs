//! HTTP route handlers.

pub mod alerts;
pub mod health;
pub mod locations;
pub mod perimeters;
pub mod realtime;

use uuid::Uuid;

use crate::error::ApiError;
use domain::models::Identity;

/// Tracked person a request acts on: the one named in the request, or the
/// caller's own. Only supervisors and admins may act on someone else.
pub(crate) fn subject_person(caller: &Identity, requested: Option<Uuid>) -> Result<Uuid, ApiError> {
    let Some(requested) = requested else {
        return Ok(caller.require_tracked_person()?);
    };
    authorize_person(caller, requested)?;
    Ok(requested)
}

pub(crate) fn authorize_person(caller: &Identity, tracked_person_id: Uuid) -> Result<(), ApiError> {
    if caller.tracked_person_id == Some(tracked_person_id) || caller.role.manages_alerts() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "Not allowed to act on this tracked person".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::Role;

    #[test]
    fn test_subject_defaults_to_own_tracked_person() {
        let own = Uuid::new_v4();
        let agent = Identity::new(Uuid::new_v4(), Role::Agent).with_tracked_person(own);
        assert_eq!(subject_person(&agent, None).unwrap(), own);
        assert_eq!(subject_person(&agent, Some(own)).unwrap(), own);
    }

    #[test]
    fn test_agent_cannot_act_for_someone_else() {
        let agent = Identity::new(Uuid::new_v4(), Role::Agent).with_tracked_person(Uuid::new_v4());
        assert!(matches!(
            subject_person(&agent, Some(Uuid::new_v4())),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn test_supervisor_may_name_any_person_but_has_no_default() {
        let supervisor = Identity::new(Uuid::new_v4(), Role::Supervisor);
        let other = Uuid::new_v4();
        assert_eq!(subject_person(&supervisor, Some(other)).unwrap(), other);
        assert!(matches!(
            subject_person(&supervisor, None),
            Err(ApiError::Validation(_))
        ));
    }
}
