// Integration test: real-time playback on the threaded tick driver
//
// Uses the system clock, so timings are only checked loosely.

use mymusic_sequencer::midi::event::TimedEvent;
use mymusic_sequencer::midi::sink::RingBufferSink;
use mymusic_sequencer::sequencer::driver::{ThreadTickDriver, TickDriver, TickTarget};
use mymusic_sequencer::sequencer::multitrack::MultiTrack;
use mymusic_sequencer::sequencer::tempo::TempoMap;
use mymusic_sequencer::sequencer::timeline::{TimeSignature, TimeSignatureMap};
use mymusic_sequencer::sequencer::transport::TransportState;
use mymusic_sequencer::{Sequencer, SequencerConfig};
use ringbuf::traits::Consumer;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Sixteenth notes at 240 BPM: one event every 62.5 ms, last one at 937.5 ms
fn fast_score() -> (TempoMap, TimeSignatureMap, MultiTrack) {
    let mut tracks = MultiTrack::new();
    let track = tracks.push_track();
    tracks
        .add_events(
            track,
            (0..16u64).map(|i| TimedEvent::note_on(i * 120, 0, 60 + i as u8, 100)),
        )
        .unwrap();
    (
        TempoMap::constant(480, 250_000).unwrap(),
        TimeSignatureMap::constant(480, TimeSignature::four_four()).unwrap(),
        tracks,
    )
}

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn test_threaded_playback_to_auto_stop() {
    let config = SequencerConfig {
        tick_interval_ms: 2.0,
        ..SequencerConfig::default()
    };
    let mut driver = ThreadTickDriver::from_config(&config);
    assert_eq!(driver.interval_ms(), 2.0);
    let seq = Arc::new(Sequencer::new(config).unwrap());
    let (tempo, signatures, tracks) = fast_score();
    seq.load_score(tempo, signatures, tracks).unwrap();

    let (sink, mut output) = RingBufferSink::with_capacity(64);
    seq.set_output(0, Box::new(sink));

    let target: Arc<dyn TickTarget> = seq.clone();
    driver.start(Arc::downgrade(&target));

    let started = Instant::now();
    seq.start();
    let stopped = wait_for(Duration::from_secs(5), || {
        seq.get_state() == TransportState::Stopped
    });
    let elapsed = started.elapsed();
    driver.stop();

    assert!(stopped, "score never finished");
    assert!(elapsed >= Duration::from_millis(900), "finished too early: {:?}", elapsed);

    let notes: Vec<u8> = output.pop_iter().filter_map(|d| d.event.note()).collect();
    let expected: Vec<u8> = (60..76).collect();
    assert_eq!(&notes[..16], &expected[..]);
}

#[test]
fn test_stop_while_driver_running() {
    let seq = Arc::new(Sequencer::new(SequencerConfig::default()).unwrap());
    let (tempo, signatures, tracks) = fast_score();
    seq.load_score(tempo, signatures, tracks).unwrap();

    let (sink, mut output) = RingBufferSink::with_capacity(64);
    seq.set_output(0, Box::new(sink));

    let target: Arc<dyn TickTarget> = seq.clone();
    let mut driver = ThreadTickDriver::new(1.0);
    driver.start(Arc::downgrade(&target));

    seq.start();
    thread::sleep(Duration::from_millis(60));
    seq.stop();
    let count = output.pop_iter().count();
    assert!(count > 0);

    // Driver keeps ticking, transport stays silent
    thread::sleep(Duration::from_millis(100));
    assert!(driver.is_running());
    assert_eq!(output.pop_iter().count(), 0);
    driver.stop();
}

#[test]
fn test_driver_exits_with_sequencer() {
    let seq = Arc::new(Sequencer::new(SequencerConfig::default()).unwrap());
    let target: Arc<dyn TickTarget> = seq.clone();
    let mut driver = ThreadTickDriver::new(1.0);
    driver.start(Arc::downgrade(&target));
    assert!(driver.is_running());

    drop(target);
    drop(seq);
    assert!(wait_for(Duration::from_secs(2), || !driver.is_running()));
}
