use ulid::Ulid;

/// Outcome of the three exclusion checks inside the overlap index.
/// Converted losslessly into `EngineError` at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    UserResourceOverlap,
    StaffOverlap,
    CapacityExceeded,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidTimeRange,
    AmbiguousRuleSpecification,
    StaffRequired,
    StaffCompanyMismatch,
    StaffNotAssignedToResource,
    UserResourceOverlap,
    StaffOverlap,
    CapacityExceeded,
    WindowOverlap(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// True for infrastructure failures callers should retry
    /// transparently; validation outcomes are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl From<ConflictKind> for EngineError {
    fn from(kind: ConflictKind) -> Self {
        match kind {
            ConflictKind::UserResourceOverlap => EngineError::UserResourceOverlap,
            ConflictKind::StaffOverlap => EngineError::StaffOverlap,
            ConflictKind::CapacityExceeded => EngineError::CapacityExceeded,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTimeRange => write!(f, "time range start must be before end"),
            EngineError::AmbiguousRuleSpecification => {
                write!(f, "rule must have exactly one of weekday (0-6) or specific date")
            }
            EngineError::StaffRequired => write!(f, "resource requires a staff member"),
            EngineError::StaffCompanyMismatch => {
                write!(f, "staff member belongs to a different tenant than the resource")
            }
            EngineError::StaffNotAssignedToResource => {
                write!(f, "staff member is not assigned to the resource")
            }
            EngineError::UserResourceOverlap => {
                write!(f, "user already has an overlapping booking on this resource")
            }
            EngineError::StaffOverlap => {
                write!(f, "staff member already has an overlapping booking")
            }
            EngineError::CapacityExceeded => {
                write!(f, "capacity exhausted over the requested range")
            }
            EngineError::WindowOverlap(id) => {
                write!(f, "capacity window overlaps existing window: {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
