use std::collections::HashSet;

use ulid::Ulid;

use crate::model::{Resource, Staff};

use super::error::EngineError;

/// Validate a staff assignment for a booking on `resource`.
///
/// Checks run in order: a staffed resource must get a staff member, the
/// staff member must belong to the resource's tenant, and must be on the
/// resource's assignment roster. A resource that does not require staff
/// still validates any staff member it is handed.
pub(crate) fn validate_assignment(
    resource: &Resource,
    assigned: &HashSet<Ulid>,
    staff: Option<&Staff>,
) -> Result<(), EngineError> {
    let Some(staff) = staff else {
        if resource.requires_staff {
            return Err(EngineError::StaffRequired);
        }
        return Ok(());
    };

    if staff.tenant_id != resource.tenant_id {
        return Err(EngineError::StaffCompanyMismatch);
    }
    if !assigned.contains(&staff.id) {
        return Err(EngineError::StaffNotAssignedToResource);
    }
    Ok(())
}
