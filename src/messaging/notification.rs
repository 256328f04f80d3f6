// Transport notifications - sequencer → UI/monitor thread
// Small Copy values so they can travel through a lock-free ring buffer

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Start,
    Stop,
    Pause,
    /// Bounded play ran out of events
    AutoStop,
    CountInStart,
    CountInEnd,
    Beat,
    /// First beat of a measure (sent after the matching Beat)
    Measure,
    Seek,
    RepeatLoop,
    TempoScale,
    TracksChanged,
}

/// A transport event stamped with the tick at which it happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub tick: u64,
}

impl Notification {
    pub fn new(kind: NotificationKind, tick: u64) -> Self {
        Self { kind, tick }
    }

    /// Start, stop, pause and their automatic variants
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            NotificationKind::Start
                | NotificationKind::Stop
                | NotificationKind::Pause
                | NotificationKind::AutoStop
                | NotificationKind::CountInStart
                | NotificationKind::CountInEnd
        )
    }
}
