// Sequencer - transport state machine driving a multi-track score
// All mutation goes through one lock; readers can use the lock-free SharedTransportState

use super::converter::{TimeConverter, MAX_TICK};
use super::driver::{Clock, SystemClock, TickFlow, TickTarget};
use super::metronome::{click_type_for_beat, Click, Metronome, MetronomeScheduler, MetronomeSink};
use super::multitrack::MultiTrack;
use super::notes::{ActiveNote, NoteTracker};
use super::processor::Processor;
use super::tempo::TempoMap;
use super::timeline::{MetronomeMode, MusicalTime, TimeSignature, TimeSignatureMap};
use super::track::{PortId, Track, TrackId};
use super::track_state::TrackState;
use super::transport::{
    CountIn, PlayMode, RepeatWindow, SharedTransportState, TimeShiftMode, TransportState,
};
use crate::config::SequencerConfig;
use crate::error::{SequencerError, SequencerResult};
use crate::messaging::channels::{
    create_notification_channel, CommandConsumer, NotificationConsumer, NotificationProducer,
};
use crate::messaging::command::Command;
use crate::messaging::notification::{Notification, NotificationKind};
use crate::midi::event::TimedEvent;
use crate::midi::sink::{Delivery, EventSink};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// MIDI sequencer.
///
/// Owns the score (tracks, tempo and signature maps) and the transport. Every
/// control call and every tick take the same lock, so a call that returns has
/// fully taken effect: after [`Sequencer::stop`] returns no further event is
/// delivered.
pub struct Sequencer {
    core: Mutex<SequencerCore>,
    shared: Arc<SharedTransportState>,
    clock: Arc<dyn Clock>,
}

struct SequencerCore {
    config: SequencerConfig,
    converter: TimeConverter,
    tracks: MultiTrack,

    state: TransportState,
    play_mode: PlayMode,
    repeat: RepeatWindow,
    count_in: CountIn,

    /// Last processed position
    cur_tick: u64,
    /// Events at `cur_tick` were already delivered
    cur_tick_consumed: bool,

    /// Score ms = clock ms - sys_time_offset + dev_time_offset
    sys_time_offset: f64,
    dev_time_offset: f64,

    beats: MetronomeScheduler,
    metronome: Metronome,
    notes: NoteTracker,
    outputs: BTreeMap<PortId, Box<dyn EventSink>>,
    missing_ports: HashSet<PortId>,
    notifier: Option<NotificationProducer>,
}

impl Sequencer {
    /// Empty score at the configured resolution, 120 BPM 4/4, system clock
    pub fn new(config: SequencerConfig) -> SequencerResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Same as [`Sequencer::new`] with an explicit time source
    pub fn with_clock(config: SequencerConfig, clock: Arc<dyn Clock>) -> SequencerResult<Self> {
        config.validate()?;
        let mut converter = TimeConverter::with_defaults(config.resolution)?;
        converter.set_metronome_mode(config.metronome_mode);
        let mut tracks = MultiTrack::new();
        tracks.set_time_shift_mode(config.time_shift_mode);

        let core = SequencerCore {
            play_mode: config.play_mode,
            count_in: CountIn::new(false, config.count_in_beats),
            config,
            converter,
            tracks,
            state: TransportState::Stopped,
            repeat: RepeatWindow::default(),
            cur_tick: 0,
            cur_tick_consumed: false,
            sys_time_offset: 0.0,
            dev_time_offset: 0.0,
            beats: MetronomeScheduler::new(),
            metronome: Metronome::new(),
            notes: NoteTracker::new(),
            outputs: BTreeMap::new(),
            missing_ports: HashSet::new(),
            notifier: None,
        };

        let sequencer = Self {
            core: Mutex::new(core),
            shared: SharedTransportState::new(),
            clock,
        };
        sequencer.core.lock().publish(&sequencer.shared);
        Ok(sequencer)
    }

    /// Lock-free view of the transport for reader threads
    pub fn shared_state(&self) -> Arc<SharedTransportState> {
        Arc::clone(&self.shared)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn config(&self) -> SequencerConfig {
        self.core.lock().config.clone()
    }

    /// Replace the whole score. Stops playback and rewinds to zero.
    pub fn load_score(
        &self,
        tempo_map: TempoMap,
        signatures: TimeSignatureMap,
        tracks: MultiTrack,
    ) -> SequencerResult<()> {
        let mut core = self.core.lock();
        let mut converter = TimeConverter::new(tempo_map, signatures)?;
        if converter.resolution() != core.config.resolution {
            return Err(SequencerError::Config(format!(
                "Score resolution {} differs from configured {}",
                converter.resolution(),
                core.config.resolution
            )));
        }
        converter.set_tempo_scale(core.converter.tempo_scale())?;
        converter.set_metronome_mode(core.converter.metronome_mode());

        let now = self.clock.now_ms();
        core.halt(TransportState::Stopped);
        core.converter = converter;
        core.tracks = tracks;
        core.repeat = RepeatWindow::default();
        core.seek(0, now);
        core.publish(&self.shared);
        core.notify(NotificationKind::TracksChanged);
        log::info!(
            "Score loaded: {} tracks, end at tick {}",
            core.tracks.num_tracks(),
            core.tracks.end_time()
        );
        Ok(())
    }

    /// Replace the tempo map (same resolution). Position is kept in ticks.
    pub fn set_tempo_map(&self, tempo_map: TempoMap) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.converter.set_tempo_map(tempo_map)?;
        core.rebase(self.clock.now_ms());
        core.publish(&self.shared);
        Ok(())
    }

    /// Replace the time-signature map (same resolution)
    pub fn set_time_signatures(&self, signatures: TimeSignatureMap) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.converter.set_signatures(signatures)?;
        let tick = core.beat_resync_tick();
        core.reset_beats(tick);
        core.publish(&self.shared);
        Ok(())
    }

    // ---- Transport ----

    /// Stopped/Paused → Playing. From Stopped with count-in enabled, the
    /// pre-roll runs first.
    pub fn start(&self) {
        let mut core = self.core.lock();
        core.start(self.clock.now_ms());
        core.publish(&self.shared);
    }

    /// Any state → Stopped. Keeps the position.
    pub fn stop(&self) {
        let mut core = self.core.lock();
        if core.state != TransportState::Stopped {
            core.halt(TransportState::Stopped);
            core.notify(NotificationKind::Stop);
            log::info!("Sequencer stopped at tick {}", core.cur_tick);
        }
        core.publish(&self.shared);
    }

    /// Playing → Paused
    pub fn pause(&self) {
        let mut core = self.core.lock();
        if core.state.is_playing() {
            core.halt(TransportState::Paused);
            core.notify(NotificationKind::Pause);
            log::info!("Sequencer paused at tick {}", core.cur_tick);
        }
        core.publish(&self.shared);
    }

    /// Start, first jumping into the repeat window if looping and outside it
    pub fn play(&self) {
        let mut core = self.core.lock();
        core.play(self.clock.now_ms());
        core.publish(&self.shared);
    }

    /// Playing → Paused, otherwise [`Sequencer::play`]
    pub fn toggle_play(&self) {
        let mut core = self.core.lock();
        let now = self.clock.now_ms();
        if core.state.is_playing() {
            core.halt(TransportState::Paused);
            core.notify(NotificationKind::Pause);
        } else {
            core.play(now);
        }
        core.publish(&self.shared);
    }

    pub fn get_state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn is_playing(&self) -> bool {
        self.get_state().is_playing()
    }

    // ---- Tick processing ----

    /// Run one tick at the clock's current time
    pub fn update_status(&self) -> TickFlow {
        self.tick_proc(self.clock.now_ms())
    }

    /// Run one tick at an explicit clock time
    pub fn tick_proc(&self, sys_time_ms: f64) -> TickFlow {
        let mut core = self.core.lock();
        let flow = core.process(sys_time_ms);
        core.publish(&self.shared);
        flow
    }

    // ---- Seeking ----

    pub fn go_to_zero(&self) {
        // Tick 0 is always in bounds
        let _ = self.go_to_time(0);
    }

    /// Jump to `tick`. Events between the old and new position are skipped.
    /// Without strict bounds, targets past [`MAX_TICK`] land on it.
    pub fn go_to_time(&self, tick: u64) -> SequencerResult<()> {
        let mut core = self.core.lock();
        let tick = core.check_seek(tick)?;
        core.seek(tick, self.clock.now_ms());
        core.publish(&self.shared);
        Ok(())
    }

    /// Jump to a scaled millisecond position
    pub fn go_to_time_ms(&self, ms: f64) -> SequencerResult<()> {
        let mut core = self.core.lock();
        let tick = core.converter.ms_to_tick(ms);
        let tick = core.check_seek(tick)?;
        core.seek(tick, self.clock.now_ms());
        core.publish(&self.shared);
        Ok(())
    }

    /// Jump to the start of `beat` in `measure` (both 0-based)
    pub fn go_to_measure(&self, measure: u32, beat: u32) -> SequencerResult<()> {
        let mut core = self.core.lock();
        let tick = core.converter.measure_to_tick(measure, beat, 0);
        let tick = core.check_seek(tick)?;
        core.seek(tick, self.clock.now_ms());
        core.publish(&self.shared);
        Ok(())
    }

    // ---- Position queries ----

    /// Last processed tick
    pub fn get_current_midi_clock_time(&self) -> u64 {
        self.shared.tick()
    }

    /// Live score position in scaled ms
    pub fn get_current_time_ms(&self) -> f64 {
        let core = self.core.lock();
        if core.state.is_playing() && !core.count_in.pending {
            core.score_ms(self.clock.now_ms())
        } else {
            core.converter.tick_to_ms(core.cur_tick)
        }
    }

    pub fn get_current_measure(&self) -> u32 {
        self.shared.measure()
    }

    pub fn get_current_beat(&self) -> u32 {
        self.shared.beat()
    }

    pub fn get_current_beat_offset(&self) -> u64 {
        self.shared.beat_offset()
    }

    pub fn get_current_position(&self) -> MusicalTime {
        MusicalTime::new(
            self.shared.measure(),
            self.shared.beat(),
            self.shared.beat_offset(),
        )
    }

    /// Measures needed to hold the whole score
    pub fn get_num_measures(&self) -> u32 {
        let core = self.core.lock();
        let end = core.converter.tick_to_measure(core.tracks.end_time());
        if end.beat == 0 && end.offset == 0 {
            end.measure
        } else {
            end.measure + 1
        }
    }

    pub fn get_end_time(&self) -> u64 {
        self.core.lock().tracks.end_time()
    }

    /// Set the loader's end of score
    pub fn set_end_time(&self, tick: u64) {
        self.core.lock().tracks.set_end_time(tick);
    }

    pub fn get_time_signature_at(&self, tick: u64) -> TimeSignature {
        self.core.lock().converter.signature_at(tick)
    }

    // ---- Look-ahead ----

    /// Earliest pending event over all tracks (tick is shifted). No cursor moves.
    pub fn get_next_event(&self) -> Option<(TrackId, TimedEvent)> {
        let core = self.core.lock();
        core.tracks
            .peek_next()
            .map(|(id, tick, ev)| (id, TimedEvent::new(tick, ev.event)))
    }

    pub fn get_next_event_time(&self) -> Option<u64> {
        self.core.lock().tracks.next_due().map(|(_, tick)| tick)
    }

    /// Scaled score ms of the next pending event
    pub fn get_next_event_time_ms(&self) -> Option<f64> {
        let core = self.core.lock();
        core.tracks
            .next_due()
            .map(|(_, tick)| core.converter.tick_to_ms(tick))
    }

    // ---- Conversions ----

    pub fn tick_to_ms(&self, tick: u64) -> f64 {
        self.core.lock().converter.tick_to_ms(tick)
    }

    pub fn ms_to_tick(&self, ms: f64) -> u64 {
        self.core.lock().converter.ms_to_tick(ms)
    }

    pub fn measure_to_tick(&self, measure: u32, beat: u32, offset: u64) -> u64 {
        self.core.lock().converter.measure_to_tick(measure, beat, offset)
    }

    pub fn tick_to_measure(&self, tick: u64) -> MusicalTime {
        self.core.lock().converter.tick_to_measure(tick)
    }

    // ---- Tempo ----

    /// BPM from the tempo map at the current position
    pub fn get_tempo_without_scale(&self) -> f64 {
        let core = self.core.lock();
        core.converter.tempo_without_scale(core.cur_tick)
    }

    /// Effective BPM at the current position
    pub fn get_tempo_with_scale(&self) -> f64 {
        let core = self.core.lock();
        core.converter.tempo_with_scale(core.cur_tick)
    }

    pub fn get_tempo_scale(&self) -> f64 {
        self.shared.tempo_scale()
    }

    /// Positive multiplier (1.0 = as written). Takes effect immediately.
    pub fn set_tempo_scale(&self, scale: f64) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.converter.set_tempo_scale(scale)?;
        core.rebase(self.clock.now_ms());
        core.notify(NotificationKind::TempoScale);
        log::debug!("Tempo scale set to {}", scale);
        core.publish(&self.shared);
        Ok(())
    }

    // ---- Modes ----

    /// Loop over [start, end) ticks. The window must be non-empty and end
    /// inside the score.
    pub fn set_repeat_play(&self, start: u64, end: u64, enabled: bool) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.set_repeat(start, end, enabled)
    }

    /// Loop over whole measures [start, end)
    pub fn set_repeat_play_measures(&self, start: u32, end: u32, enabled: bool) -> SequencerResult<()> {
        let mut core = self.core.lock();
        let start_tick = core.converter.measure_to_tick(start, 0, 0);
        let end_tick = core.converter.measure_to_tick(end, 0, 0);
        core.set_repeat(start_tick, end_tick, enabled)
    }

    pub fn get_repeat_play(&self) -> RepeatWindow {
        self.core.lock().repeat
    }

    /// Count-in for the next start from Stopped
    pub fn set_count_in(&self, enabled: bool, beats: u32) {
        let mut core = self.core.lock();
        core.count_in.enabled = enabled;
        core.count_in.beats = beats;
    }

    pub fn get_count_in(&self) -> (bool, u32) {
        let core = self.core.lock();
        (core.count_in.enabled, core.count_in.beats)
    }

    /// True while the pre-roll is running
    pub fn get_count_in_pending(&self) -> bool {
        self.shared.count_in_pending()
    }

    pub fn set_time_shift_mode(&self, mode: TimeShiftMode) {
        let mut core = self.core.lock();
        if core.tracks.time_shift_mode() == mode {
            return;
        }
        core.release_all_notes();
        core.tracks.set_time_shift_mode(mode);
        core.resync_cursors();
        log::debug!("Time shift mode: {:?}", mode);
    }

    pub fn get_time_shift_mode(&self) -> TimeShiftMode {
        self.core.lock().tracks.time_shift_mode()
    }

    /// Shift added to every track in [`TimeShiftMode::Global`]
    pub fn set_global_time_shift(&self, ticks: i64) {
        let mut core = self.core.lock();
        core.release_all_notes();
        core.tracks.set_global_time_shift(ticks);
        core.resync_cursors();
    }

    pub fn get_global_time_shift(&self) -> i64 {
        self.core.lock().tracks.global_time_shift()
    }

    /// Bounded play past the end of the score moves back to the end
    pub fn set_play_mode(&self, mode: PlayMode) {
        let mut core = self.core.lock();
        core.play_mode = mode;
        let end = core.tracks.end_time();
        if mode == PlayMode::Bounded && core.tracks.next_due().is_none() && core.cur_tick > end {
            core.seek(end, self.clock.now_ms());
        }
        core.publish(&self.shared);
    }

    pub fn get_play_mode(&self) -> PlayMode {
        self.core.lock().play_mode
    }

    // ---- Outputs ----

    /// Bind a sink to an output port (replaces any previous sink)
    pub fn set_output(&self, port: PortId, sink: Box<dyn EventSink>) {
        let mut core = self.core.lock();
        core.missing_ports.remove(&port);
        core.outputs.insert(port, sink);
    }

    pub fn remove_output(&self, port: PortId) -> Option<Box<dyn EventSink>> {
        self.core.lock().outputs.remove(&port)
    }

    pub fn set_metronome(&self, sink: Box<dyn MetronomeSink>) {
        self.core.lock().metronome.set_sink(sink);
    }

    pub fn set_metronome_enabled(&self, enabled: bool) {
        self.core.lock().metronome.set_enabled(enabled);
    }

    pub fn is_metronome_enabled(&self) -> bool {
        self.core.lock().metronome.is_enabled()
    }

    /// How beats are derived from time signatures
    pub fn set_metronome_mode(&self, mode: MetronomeMode) {
        let mut core = self.core.lock();
        core.converter.set_metronome_mode(mode);
        let tick = core.beat_resync_tick();
        core.reset_beats(tick);
        core.publish(&self.shared);
    }

    /// Open a notification channel, replacing any previous one
    pub fn enable_notifications(&self) -> NotificationConsumer {
        let mut core = self.core.lock();
        let (producer, consumer) = create_notification_channel(core.config.notification_capacity);
        core.notifier = Some(producer);
        consumer
    }

    pub fn disable_notifications(&self) {
        self.core.lock().notifier = None;
    }

    // ---- Tracks ----

    pub fn get_num_tracks(&self) -> usize {
        self.core.lock().tracks.num_tracks()
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.core.lock().tracks.track_ids()
    }

    /// Add an empty track at `position`
    pub fn insert_track(&self, position: usize) -> SequencerResult<TrackId> {
        let mut core = self.core.lock();
        let id = core.tracks.insert_track(position)?;
        core.notify(NotificationKind::TracksChanged);
        log::debug!("Track {} inserted at {}", id, position);
        Ok(id)
    }

    /// Remove a track. Its sounding notes are released first.
    pub fn delete_track(&self, id: TrackId) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.tracks.get_track(id)?;
        core.release_track_notes(id);
        core.tracks.delete_track(id)?;
        core.notify(NotificationKind::TracksChanged);
        log::debug!("Track {} deleted", id);
        Ok(())
    }

    /// Move a track to index `to`
    pub fn move_track(&self, id: TrackId, to: usize) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.tracks.move_track(id, to)?;
        core.notify(NotificationKind::TracksChanged);
        log::debug!("Track {} moved to {}", id, to);
        Ok(())
    }

    /// Run `f` on a track under the sequencer lock (e.g. to add events)
    pub fn with_track<R>(&self, id: TrackId, f: impl FnOnce(&Track) -> R) -> SequencerResult<R> {
        let core = self.core.lock();
        Ok(f(core.tracks.get_track(id)?))
    }

    /// Edit a track in place. Afterwards its cursor points at the first
    /// event not yet due, so events inserted in the past are never played.
    pub fn edit_track<R>(&self, id: TrackId, f: impl FnOnce(&mut Track) -> R) -> SequencerResult<R> {
        let mut core = self.core.lock();
        let result = f(core.tracks.get_track_mut(id)?);
        core.resync_track(id);
        Ok(result)
    }

    /// Add events to a track (kept in tick order)
    pub fn add_events<I>(&self, id: TrackId, events: I) -> SequencerResult<()>
    where
        I: IntoIterator<Item = TimedEvent>,
    {
        let mut core = self.core.lock();
        core.tracks.add_events(id, events)?;
        core.resync_track(id);
        Ok(())
    }

    /// Program, pitch bend and controllers the track has set up to the
    /// playback position
    pub fn get_track_state(&self, id: TrackId) -> SequencerResult<TrackState> {
        Ok(self.core.lock().tracks.get_track(id)?.state().clone())
    }

    /// Whether the track has notes sounding
    pub fn get_track_notes_on(&self, id: TrackId) -> SequencerResult<bool> {
        let core = self.core.lock();
        core.tracks.get_track(id)?;
        Ok(core.notes.track_has_notes(id))
    }

    /// Send the track's state to its port on `channel`, e.g. after a jump or
    /// an unmute. Goes through the track's processor. Returns the number of
    /// messages delivered.
    pub fn catch_up_track(&self, id: TrackId, channel: u8) -> SequencerResult<usize> {
        let mut core = self.core.lock();
        let index = core.tracks.index_of(id).ok_or(SequencerError::UnknownTrack(id))?;
        let track = core.tracks.get_track(id)?;
        let (port, events) = (track.out_port(), track.state().to_events(channel));
        let tick = core.cur_tick;
        let time_ms = core.converter.tick_to_ms(tick);

        let mut sent = 0;
        for event in events {
            let processed = match core.tracks.track_at_mut(index).and_then(|t| t.processor_mut()) {
                Some(processor) => processor.process(event),
                None => Some(event),
            };
            if let Some(event) = processed {
                core.send(Delivery {
                    track: id,
                    port,
                    tick,
                    time_ms,
                    event,
                });
                sent += 1;
            }
        }
        log::debug!("Track {} caught up with {} messages", id, sent);
        Ok(sent)
    }

    pub fn get_track_out_port(&self, id: TrackId) -> SequencerResult<PortId> {
        self.core.lock().tracks.track_out_port(id)
    }

    pub fn set_track_out_port(&self, id: TrackId, port: PortId) -> SequencerResult<()> {
        let mut core = self.core.lock();
        if core.tracks.track_out_port(id)? != port {
            core.release_track_notes(id);
        }
        core.tracks.set_track_out_port(id, port)
    }

    /// Attach a processor (`None` to detach); returns the previous one
    pub fn set_track_processor(
        &self,
        id: TrackId,
        processor: Option<Processor>,
    ) -> SequencerResult<Option<Processor>> {
        let mut core = self.core.lock();
        core.tracks.get_track(id)?;
        core.release_track_notes(id);
        core.tracks.set_track_processor(id, processor)
    }

    pub fn get_track_time_shift(&self, id: TrackId) -> SequencerResult<i64> {
        self.core.lock().tracks.track_time_shift(id)
    }

    /// Delay (positive) or advance (negative) a track by `ticks`
    pub fn set_track_time_shift(&self, id: TrackId, ticks: i64) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.tracks.get_track(id)?;
        core.release_track_notes(id);
        core.tracks.set_track_time_shift(id, ticks)?;
        core.resync_track(id);
        Ok(())
    }

    pub fn set_track_muted(&self, id: TrackId, muted: bool) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.tracks.set_track_muted(id, muted)?;
        if muted {
            core.release_track_notes(id);
        }
        Ok(())
    }

    pub fn set_track_solo(&self, id: TrackId, solo: bool) -> SequencerResult<()> {
        let mut core = self.core.lock();
        core.tracks.set_track_solo(id, solo)?;
        if solo {
            // Everything not soloed falls silent
            let silenced: Vec<TrackId> = core
                .tracks
                .tracks()
                .filter(|t| !t.is_solo())
                .map(|t| t.id())
                .collect();
            for track in silenced {
                core.release_track_notes(track);
            }
        }
        Ok(())
    }

    // ---- Commands ----

    /// Apply one control command
    pub fn execute(&self, command: Command) -> SequencerResult<()> {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Pause => self.pause(),
            Command::Play => self.play(),
            Command::TogglePlay => self.toggle_play(),
            Command::GoToZero => self.go_to_zero(),
            Command::GoToTime(tick) => self.go_to_time(tick)?,
            Command::GoToTimeMs(ms) => self.go_to_time_ms(ms)?,
            Command::GoToMeasure { measure, beat } => self.go_to_measure(measure, beat)?,
            Command::SetTempoScale(scale) => self.set_tempo_scale(scale)?,
            Command::SetRepeatPlay {
                start,
                end,
                enabled,
            } => self.set_repeat_play(start, end, enabled)?,
            Command::SetRepeatPlayMeasures {
                start,
                end,
                enabled,
            } => self.set_repeat_play_measures(start, end, enabled)?,
            Command::SetCountIn { enabled, beats } => self.set_count_in(enabled, beats),
            Command::SetTimeShiftMode(mode) => self.set_time_shift_mode(mode),
            Command::SetGlobalTimeShift(ticks) => self.set_global_time_shift(ticks),
            Command::SetPlayMode(mode) => self.set_play_mode(mode),
            Command::SetMetronomeEnabled(enabled) => self.set_metronome_enabled(enabled),
            Command::SetMetronomeMode(mode) => self.set_metronome_mode(mode),
            Command::SetTrackOutPort { track, port } => self.set_track_out_port(track, port)?,
            Command::SetTrackTransform { track, transform } => {
                self.set_track_processor(track, transform.map(Processor::Transform))?;
            }
            Command::SetTrackTimeShift { track, ticks } => self.set_track_time_shift(track, ticks)?,
            Command::SetTrackMuted { track, muted } => self.set_track_muted(track, muted)?,
            Command::SetTrackSolo { track, solo } => self.set_track_solo(track, solo)?,
            Command::InsertTrack { position } => {
                self.insert_track(position)?;
            }
            Command::DeleteTrack(track) => self.delete_track(track)?,
            Command::MoveTrack { track, to } => self.move_track(track, to)?,
        }
        Ok(())
    }

    /// Drain a command channel. Failed commands are logged and skipped.
    /// Returns the number of commands applied successfully.
    pub fn process_commands(&self, consumer: &mut CommandConsumer) -> usize {
        let mut applied = 0;
        while let Some(command) = consumer.try_pop() {
            match self.execute(command) {
                Ok(()) => applied += 1,
                Err(e) => log::warn!("Command {:?} failed: {}", command, e),
            }
        }
        applied
    }
}

impl TickTarget for Sequencer {
    fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    fn on_tick(&self) -> TickFlow {
        self.update_status()
    }

    fn next_due_ms(&self) -> Option<f64> {
        self.core.lock().next_due_sys_ms()
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("state", &self.shared.state())
            .field("tick", &self.shared.tick())
            .finish()
    }
}

impl SequencerCore {
    fn score_ms(&self, sys_time_ms: f64) -> f64 {
        sys_time_ms - self.sys_time_offset + self.dev_time_offset
    }

    fn publish(&self, shared: &SharedTransportState) {
        let pos = self.converter.tick_to_measure(self.cur_tick);
        shared.publish_position(
            self.cur_tick,
            self.converter.tick_to_ms(self.cur_tick),
            pos.measure,
            pos.beat,
            pos.offset,
        );
        shared.set_state(self.state);
        shared.set_count_in_pending(self.count_in.pending);
        shared.set_tempo_scale(self.converter.tempo_scale());
    }

    fn notify(&mut self, kind: NotificationKind) {
        let tick = self.cur_tick;
        if let Some(notifier) = self.notifier.as_mut() {
            if notifier.try_push(Notification::new(kind, tick)).is_err() {
                log::warn!("Notification buffer full, {:?} dropped", kind);
            }
        }
    }

    fn send(&mut self, delivery: Delivery) {
        match self.outputs.get_mut(&delivery.port) {
            Some(sink) => sink.deliver(&delivery),
            None => {
                if self.missing_ports.insert(delivery.port) {
                    log::warn!("No output bound to port {}, events dropped", delivery.port);
                }
            }
        }
    }

    fn send_note_offs(&mut self, notes: Vec<ActiveNote>) {
        let tick = self.cur_tick;
        let time_ms = self.converter.tick_to_ms(tick);
        for note in notes {
            self.send(Delivery {
                track: note.track,
                port: note.port,
                tick,
                time_ms,
                event: note.note_off(),
            });
        }
    }

    fn release_all_notes(&mut self) {
        let notes = self.notes.release_all();
        self.send_note_offs(notes);
    }

    fn release_track_notes(&mut self, track: TrackId) {
        let notes = self.notes.release_track(track);
        self.send_note_offs(notes);
    }

    /// Put the clock offsets so that `cur_tick` is now
    fn rebase(&mut self, now: f64) {
        self.dev_time_offset = self.converter.tick_to_ms(self.cur_tick);
        self.sys_time_offset = now;
    }

    fn reset_beats(&mut self, tick: u64) {
        self.beats.reset(tick, &self.converter);
    }

    /// First tick whose beat is still to be clicked
    fn beat_resync_tick(&self) -> u64 {
        if self.beats.next_beat() > self.cur_tick {
            self.cur_tick.saturating_add(1)
        } else {
            self.cur_tick
        }
    }

    /// Re-point a cursor after an edit or a shift change. Events at an
    /// unfinished `cur_tick` that already went out are not sent again.
    fn resync_track(&mut self, id: TrackId) {
        let Some(index) = self.tracks.index_of(id) else {
            return;
        };
        if self.cur_tick_consumed {
            self.tracks.seek_track(index, self.cur_tick.saturating_add(1));
        } else {
            self.tracks.resume_track(index, self.cur_tick);
        }
    }

    fn resync_cursors(&mut self) {
        if self.cur_tick_consumed {
            self.tracks.seek_all(self.cur_tick.saturating_add(1));
        } else {
            self.tracks.resume_all(self.cur_tick);
        }
    }

    /// Seek target after bounds checking
    fn check_seek(&self, tick: u64) -> SequencerResult<u64> {
        let end = self.tracks.end_time();
        if self.config.strict_seek_bounds && tick > end {
            return Err(SequencerError::InvalidSeekTarget { target: tick, end });
        }
        Ok(tick.min(MAX_TICK))
    }

    /// Jump without emitting anything in between
    fn seek(&mut self, tick: u64, now: f64) {
        self.release_all_notes();
        self.tracks.seek_all(tick);
        self.cur_tick = tick;
        self.cur_tick_consumed = false;
        self.rebase(now);
        self.reset_beats(tick);
        self.notify(NotificationKind::Seek);
        log::debug!("Seek to tick {}", tick);
    }

    fn set_repeat(&mut self, start: u64, end: u64, enabled: bool) -> SequencerResult<()> {
        if start >= end || end > self.tracks.end_time() {
            return Err(SequencerError::InvalidRepeatWindow { start, end });
        }
        self.repeat = RepeatWindow::new(start, end, enabled);
        log::debug!("Repeat window [{}, {}) enabled: {}", start, end, enabled);
        Ok(())
    }

    fn start(&mut self, now: f64) {
        if self.state.is_playing() {
            return;
        }
        let from_stop = self.state == TransportState::Stopped;
        self.state = TransportState::Playing;
        self.rebase(now);
        let beat_from = self.beat_resync_tick();
        self.reset_beats(beat_from);

        if from_stop && self.count_in.applies() {
            self.count_in.pending = true;
            self.count_in.start_ms = now;
            self.count_in.beat_ms = self.converter.beats_duration_ms(self.cur_tick, 1);
            self.count_in.clicks_sent = 0;
            self.notify(NotificationKind::CountInStart);
            log::info!(
                "Sequencer started at tick {} with {} beats count-in",
                self.cur_tick,
                self.count_in.beats
            );
        } else {
            self.notify(NotificationKind::Start);
            log::info!("Sequencer started at tick {}", self.cur_tick);
        }
    }

    fn play(&mut self, now: f64) {
        if self.state.is_playing() {
            return;
        }
        if self.repeat.is_active() && !self.repeat.contains(self.cur_tick) {
            let start = self.repeat.start;
            self.seek(start, now);
        }
        self.start(now);
    }

    /// Leave Playing for `state`, releasing sounding notes
    fn halt(&mut self, state: TransportState) {
        self.release_all_notes();
        self.count_in.pending = false;
        self.state = state;
    }

    /// Pre-roll phase. Returns true once the score should start.
    fn run_count_in(&mut self, sys_time: f64) -> bool {
        let beats_per_measure = self
            .converter
            .signature_at(self.cur_tick)
            .beats_per_measure(self.converter.resolution(), self.converter.metronome_mode())
            as u32;
        while self.count_in.clicks_sent < self.count_in.beats
            && self.count_in.click_ms(self.count_in.clicks_sent) <= sys_time
        {
            let index = self.count_in.clicks_sent;
            let beat = index % beats_per_measure;
            let click = Click {
                tick: self.cur_tick,
                time_ms: self.converter.tick_to_ms(self.cur_tick),
                measure: index / beats_per_measure,
                beat,
                click_type: click_type_for_beat(beat),
                count_in: true,
            };
            self.metronome.trigger_click(&click);
            self.count_in.clicks_sent += 1;
        }

        let end = self.count_in.end_ms();
        if sys_time < end {
            return false;
        }
        self.count_in.pending = false;
        self.sys_time_offset = end;
        self.dev_time_offset = self.converter.tick_to_ms(self.cur_tick);
        self.notify(NotificationKind::CountInEnd);
        self.notify(NotificationKind::Start);
        log::info!("Count-in finished, playing from tick {}", self.cur_tick);
        true
    }

    /// Repeat end that applies to the current position
    fn active_repeat_end(&self) -> Option<u64> {
        (self.repeat.is_active() && self.cur_tick < self.repeat.end).then_some(self.repeat.end)
    }

    fn loop_back(&mut self, sys_time: f64) {
        let (start, end) = (self.repeat.start, self.repeat.end);
        let end_ms = self.converter.tick_to_ms(end);
        let loop_ms = end_ms - self.converter.tick_to_ms(start);
        let mut overshoot = (self.score_ms(sys_time) - end_ms).max(0.0);
        if loop_ms > 0.0 {
            overshoot %= loop_ms;
        }

        self.release_all_notes();
        self.tracks.seek_all(start);
        self.cur_tick = start;
        self.cur_tick_consumed = false;
        self.dev_time_offset = self.converter.tick_to_ms(start);
        self.sys_time_offset = sys_time - overshoot;
        self.reset_beats(start);
        self.notify(NotificationKind::RepeatLoop);
        log::debug!("Repeat loop back to tick {} (overshoot {:.3} ms)", start, overshoot);
    }

    fn emit_beat(&mut self) {
        let click = self.beats.take_beat(&self.converter);
        self.cur_tick = click.tick;
        self.metronome.trigger_click(&click);
        self.notify(NotificationKind::Beat);
        if click.beat == 0 {
            self.notify(NotificationKind::Measure);
        }
    }

    /// Deliver the pending event of the track at `index`
    fn deliver_next(&mut self, index: usize) {
        let audible = self.tracks.is_audible(index);
        let Some(track) = self.tracks.track_at(index) else {
            log::warn!("Track index {} vanished during tick, skipped", index);
            return;
        };
        let shift = self.tracks.effective_shift(track);
        let Some((tick, event)) = track.peek(shift).map(|(t, e)| (t, e.event)) else {
            return;
        };
        let (id, port) = (track.id(), track.out_port());

        self.tracks.advance_track(index);
        self.cur_tick = tick;
        if !audible {
            return;
        }

        let processed = match self.tracks.track_at_mut(index).and_then(|t| t.processor_mut()) {
            Some(processor) => processor.process(event),
            None => Some(event),
        };
        let Some(event) = processed else {
            return;
        };

        self.notes.observe(id, port, &event);
        let time_ms = self.converter.tick_to_ms(tick);
        self.send(Delivery {
            track: id,
            port,
            tick,
            time_ms,
            event,
        });
    }

    /// One tick of playback at clock time `sys_time`
    fn process(&mut self, sys_time: f64) -> TickFlow {
        if !self.state.is_playing() {
            return TickFlow::Idle;
        }
        if sys_time < self.sys_time_offset && !self.count_in.pending {
            log::warn!(
                "System time went backwards ({} < {}), rebasing",
                sys_time,
                self.sys_time_offset
            );
            self.sys_time_offset = sys_time;
        }
        if self.count_in.pending && !self.run_count_in(sys_time) {
            return TickFlow::Running;
        }

        let mut budget = self.config.max_events_per_tick;
        let mut capped = false;
        let mut target;
        loop {
            target = self.converter.ms_to_tick(self.score_ms(sys_time));
            let repeat_end = self.active_repeat_end();
            let limit = match repeat_end {
                Some(end) => target.min(end - 1),
                None => target,
            };
            let beat = self.beats.due(limit);
            let event = self.tracks.next_due().filter(|&(_, tick)| tick <= limit);

            if beat.is_none() && event.is_none() {
                match repeat_end {
                    Some(end) if target >= end && budget > 0 => {
                        self.loop_back(sys_time);
                        budget -= 1;
                        continue;
                    }
                    _ => break,
                }
            }
            if budget == 0 {
                capped = true;
                log::warn!(
                    "More than {} items due in one tick, rest deferred",
                    self.config.max_events_per_tick
                );
                break;
            }
            budget -= 1;

            match (beat, event) {
                (Some(b), Some((_, e))) if b <= e => self.emit_beat(),
                (Some(_), None) => self.emit_beat(),
                (_, Some((index, _))) => self.deliver_next(index),
                (None, None) => break,
            }
        }

        if capped {
            self.cur_tick_consumed = false;
            return TickFlow::Running;
        }

        let limit = match self.active_repeat_end() {
            Some(end) => target.min(end - 1),
            None => target,
        };
        self.cur_tick = self.cur_tick.max(limit);
        self.cur_tick_consumed = true;

        // Auto-stop once the score is exhausted
        let end = self.tracks.end_time();
        if self.play_mode == PlayMode::Bounded
            && self.active_repeat_end().is_none()
            && self.tracks.next_due().is_none()
            && self.cur_tick >= end
        {
            self.cur_tick = end;
            self.release_all_notes();
            self.count_in.pending = false;
            self.state = TransportState::Stopped;
            self.notify(NotificationKind::AutoStop);
            log::info!("End of score reached, sequencer stopped at tick {}", end);
            return TickFlow::Finished;
        }
        TickFlow::Running
    }

    /// Clock time of the next event, beat, repeat end or count-in click
    fn next_due_sys_ms(&self) -> Option<f64> {
        if !self.state.is_playing() {
            return None;
        }
        if self.count_in.pending {
            let next = if self.count_in.clicks_sent < self.count_in.beats {
                self.count_in.click_ms(self.count_in.clicks_sent)
            } else {
                self.count_in.end_ms()
            };
            return Some(next);
        }
        let mut next = self.beats.next_beat();
        if let Some((_, tick)) = self.tracks.next_due() {
            next = next.min(tick);
        }
        if let Some(end) = self.active_repeat_end() {
            next = next.min(end);
        }
        let score_ms = self.converter.tick_to_ms(next);
        Some(score_ms - self.dev_time_offset + self.sys_time_offset)
    }
}
