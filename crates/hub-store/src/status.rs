//! Record status bitfield.

/// The lifecycle status of one StoreKey.
///
/// Statuses are bitfields: the low byte carries the `CLEAN`/`DIRTY`
/// modifier bits, the high bits carry the state family (`EMPTY`, `READY`,
/// `DESTROYED`, `BUSY`, `ERROR`). Compare against the named constants or
/// use the predicates.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u32);

impl Status {
    pub const CLEAN: Status = Status(0x0001);
    pub const DIRTY: Status = Status(0x0002);

    pub const EMPTY: Status = Status(0x0100);
    pub const ERROR: Status = Status(0x1000);

    pub const READY: Status = Status(0x0200);
    pub const READY_CLEAN: Status = Status(0x0201);
    pub const READY_DIRTY: Status = Status(0x0202);
    pub const READY_NEW: Status = Status(0x0203);

    pub const DESTROYED: Status = Status(0x0400);
    pub const DESTROYED_CLEAN: Status = Status(0x0401);
    pub const DESTROYED_DIRTY: Status = Status(0x0402);

    pub const BUSY: Status = Status(0x0800);
    pub const BUSY_LOADING: Status = Status(0x0804);
    pub const BUSY_CREATING: Status = Status(0x0808);
    pub const BUSY_COMMITTING: Status = Status(0x0810);
    pub const BUSY_REFRESH_CLEAN: Status = Status(0x0821);
    pub const BUSY_REFRESH_DIRTY: Status = Status(0x0822);
    pub const BUSY_DESTROYING: Status = Status(0x0840);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: Status) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn is_empty(self) -> bool {
        self == Status::EMPTY
    }

    pub fn is_error(self) -> bool {
        self.contains(Status::ERROR)
    }

    pub fn is_ready(self) -> bool {
        self.contains(Status::READY)
    }

    pub fn is_destroyed(self) -> bool {
        self.contains(Status::DESTROYED)
    }

    pub fn is_busy(self) -> bool {
        self.contains(Status::BUSY)
    }

    pub fn is_dirty(self) -> bool {
        self.contains(Status::DIRTY)
    }

    /// True for the statuses the commit pipeline picks up.
    pub fn needs_commit(self) -> bool {
        matches!(
            self,
            Status::READY_NEW | Status::READY_DIRTY | Status::DESTROYED_DIRTY
        )
    }

    fn name(self) -> &'static str {
        match self {
            Status::EMPTY => "EMPTY",
            Status::ERROR => "ERROR",
            Status::READY => "READY",
            Status::READY_CLEAN => "READY_CLEAN",
            Status::READY_DIRTY => "READY_DIRTY",
            Status::READY_NEW => "READY_NEW",
            Status::DESTROYED => "DESTROYED",
            Status::DESTROYED_CLEAN => "DESTROYED_CLEAN",
            Status::DESTROYED_DIRTY => "DESTROYED_DIRTY",
            Status::BUSY => "BUSY",
            Status::BUSY_LOADING => "BUSY_LOADING",
            Status::BUSY_CREATING => "BUSY_CREATING",
            Status::BUSY_COMMITTING => "BUSY_COMMITTING",
            Status::BUSY_REFRESH_CLEAN => "BUSY_REFRESH_CLEAN",
            Status::BUSY_REFRESH_DIRTY => "BUSY_REFRESH_DIRTY",
            Status::BUSY_DESTROYING => "BUSY_DESTROYING",
            _ => "STATUS",
        }
    }
}

impl std::fmt::Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#06x})", self.name(), self.0)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
