use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Closed interval `[start, end]` with a known end. Reservations are spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Closed-interval overlap: touching endpoints count.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }

    pub fn window(&self) -> Window {
        Window::bounded(self.start, self.end)
    }
}

/// Closed interval that may be open-ended. `end == None` extends to +∞.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Option<Ms>,
}

impl Window {
    pub fn new(start: Ms, end: Option<Ms>) -> Self {
        Self { start, end }
    }

    pub fn bounded(start: Ms, end: Ms) -> Self {
        Self { start, end: Some(end) }
    }

    pub fn open(start: Ms) -> Self {
        Self { start, end: None }
    }

    pub fn is_open_ended(&self) -> bool {
        self.end.is_none()
    }

    /// `a.start <= b.end && b.start <= a.end`, with a missing end treated as +∞.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.end.is_none_or(|end| other.start <= end) && other.end.is_none_or(|end| self.start <= end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && self.end.is_none_or(|end| t <= end)
    }
}

impl From<Span> for Window {
    fn from(span: Span) -> Self {
        span.window()
    }
}

// ── Statuses ─────────────────────────────────────────────────────

/// Cached availability of a resource. Always derived from its claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Available,
    Reserved,
    UnderService,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Available => "AVAILABLE",
            ResourceStatus::Reserved => "RESERVED",
            ResourceStatus::UnderService => "UNDER_SERVICE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Approved => "APPROVED",
            ReservationStatus::Rejected => "REJECTED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Service window progress. Declaration order is the only legal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Reported,
    InProgress,
    Completed,
}

impl ServiceStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, ServiceStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Reported => "REPORTED",
            ServiceStatus::InProgress => "IN_PROGRESS",
            ServiceStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Claims ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimKind {
    Reservation,
    ServiceWindow,
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimKind::Reservation => f.write_str("reservation"),
            ClaimKind::ServiceWindow => f.write_str("service window"),
        }
    }
}

/// The first active claim found overlapping a candidate interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ClaimKind,
    pub id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub requester_id: Ulid,
    pub purpose: String,
    pub status: ReservationStatus,
    pub approver_id: Option<Ulid>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// True when this reservation occupies its resource at `now`.
    pub fn occupies(&self, now: Ms) -> bool {
        self.status == ReservationStatus::Approved && self.span.contains_instant(now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceWindow {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub window: Window,
    pub reporter_id: Ulid,
    pub description: String,
    pub status: ServiceStatus,
    pub created_at: Ms,
}

impl ServiceWindow {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// In progress, or reported with a start that has already passed.
    pub fn is_effective(&self, now: Ms) -> bool {
        match self.status {
            ServiceStatus::InProgress => true,
            ServiceStatus::Reported => self.window.start <= now,
            ServiceStatus::Completed => false,
        }
    }

    /// True when this window takes its resource out of service at `now`.
    pub fn occupies(&self, now: Ms) -> bool {
        self.is_effective(now) && self.window.contains_instant(now)
    }
}

// ── Per-resource state ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Materialized view over the claims below; written only by status refresh.
    pub status: ResourceStatus,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    /// Sorted by `window.start`.
    pub windows: Vec<ServiceWindow>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: Option<String>, status: ResourceStatus) -> Self {
        Self {
            id,
            name,
            status,
            reservations: Vec::new(),
            windows: Vec::new(),
        }
    }

    pub fn claim_count(&self) -> usize {
        self.reservations.len() + self.windows.len()
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Insert maintaining sort order by window.start.
    pub fn insert_window(&mut self, window: ServiceWindow) {
        let pos = self
            .windows
            .binary_search_by_key(&window.window.start, |w| w.window.start)
            .unwrap_or_else(|e| e);
        self.windows.insert(pos, window);
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<ServiceWindow> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    pub fn window(&self, id: Ulid) -> Option<&ServiceWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn window_mut(&mut self, id: Ulid) -> Option<&mut ServiceWindow> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    /// Reservations (any status) whose span overlaps the query.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping_reservations(&self, query: &Window) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| query.end.is_none_or(|end| r.span.start <= end));
        let start = query.start;
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end >= start)
    }

    /// Service windows (any status) whose window overlaps the query.
    pub fn overlapping_windows(&self, query: &Window) -> impl Iterator<Item = &ServiceWindow> {
        let right_bound = self
            .windows
            .partition_point(|w| query.end.is_none_or(|end| w.window.start <= end));
        let start = query.start;
        self.windows[..right_bound]
            .iter()
            .filter(move |w| w.window.end.is_none_or(|end| end >= start))
    }
}

/// WAL record format. Replaying these in order rebuilds every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: Option<String>,
        status: ResourceStatus,
    },
    ResourceDeleted {
        id: Ulid,
    },
    ResourceStatusSet {
        id: Ulid,
        status: ResourceStatus,
    },
    ReservationPlaced {
        reservation: Reservation,
    },
    ReservationStatusSet {
        id: Ulid,
        resource_id: Ulid,
        status: ReservationStatus,
        approver_id: Option<Ulid>,
    },
    ReservationRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    ServiceWindowOpened {
        window: ServiceWindow,
    },
    ServiceWindowEdited {
        id: Ulid,
        resource_id: Ulid,
        window: Window,
        description: String,
    },
    ServiceWindowStatusSet {
        id: Ulid,
        resource_id: Ulid,
        status: ServiceStatus,
    },
    ServiceWindowRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
}

// ── Status-change notifications ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Reservation,
    ServiceWindow,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    Reservation(ReservationStatus),
    Service(ServiceStatus),
    Resource(ResourceStatus),
}

/// Delivered to the event sink on every state change.
/// `old_status` is `None` on creation, `new_status` is `None` on removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub entity_id: Ulid,
    pub kind: EntityKind,
    pub resource_id: Ulid,
    pub old_status: Option<StatusValue>,
    pub new_status: Option<StatusValue>,
    pub at: Ms,
}

impl StatusChange {
    pub fn reservation(
        r: &Reservation,
        old: Option<ReservationStatus>,
        new: Option<ReservationStatus>,
        at: Ms,
    ) -> Self {
        Self {
            entity_id: r.id,
            kind: EntityKind::Reservation,
            resource_id: r.resource_id,
            old_status: old.map(StatusValue::Reservation),
            new_status: new.map(StatusValue::Reservation),
            at,
        }
    }

    pub fn service_window(
        w: &ServiceWindow,
        old: Option<ServiceStatus>,
        new: Option<ServiceStatus>,
        at: Ms,
    ) -> Self {
        Self {
            entity_id: w.id,
            kind: EntityKind::ServiceWindow,
            resource_id: w.resource_id,
            old_status: old.map(StatusValue::Service),
            new_status: new.map(StatusValue::Service),
            at,
        }
    }

    /// Registration (`old` is `None`) or removal (`new` is `None`) of a resource.
    pub fn resource_lifecycle(
        id: Ulid,
        old: Option<ResourceStatus>,
        new: Option<ResourceStatus>,
        at: Ms,
    ) -> Self {
        Self {
            entity_id: id,
            kind: EntityKind::Resource,
            resource_id: id,
            old_status: old.map(StatusValue::Resource),
            new_status: new.map(StatusValue::Resource),
            at,
        }
    }

    /// The resource is gone and its channel can be dropped.
    pub fn is_resource_removal(&self) -> bool {
        self.kind == EntityKind::Resource && self.new_status.is_none()
    }

    pub fn resource(id: Ulid, old: ResourceStatus, new: ResourceStatus, at: Ms) -> Self {
        Self {
            entity_id: id,
            kind: EntityKind::Resource,
            resource_id: id,
            old_status: Some(StatusValue::Resource(old)),
            new_status: Some(StatusValue::Resource(new)),
            at,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub resource_id: Option<Ulid>,
    pub requester_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.resource_id.is_none_or(|id| id == r.resource_id)
            && self.requester_id.is_none_or(|id| id == r.requester_id)
            && self.status.is_none_or(|s| s == r.status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceWindowFilter {
    pub resource_id: Option<Ulid>,
    pub status: Option<ServiceStatus>,
}

impl ServiceWindowFilter {
    pub fn matches(&self, w: &ServiceWindow) -> bool {
        self.resource_id.is_none_or(|id| id == w.resource_id) && self.status.is_none_or(|s| s == w.status)
    }
}
