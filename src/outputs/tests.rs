use std::time::Duration;

use super::*;
use crate::audio::AudioFormat;
use crate::config::OutputConfig;

/// Steady tone source; infinite unless a sample budget is given.
struct ToneSource {
    value: Sample,
    format: AudioFormat,
    budget: Option<usize>,
}

impl ToneSource {
    fn new(value: Sample, format: AudioFormat) -> Self {
        Self {
            value,
            format,
            budget: None,
        }
    }

    fn finite(value: Sample, format: AudioFormat, budget: usize) -> Self {
        Self {
            value,
            format,
            budget: Some(budget),
        }
    }
}

impl AudioSource for ToneSource {
    fn read(&mut self, out: &mut [Sample], fmt: &mut AudioFormat) -> SourceRead {
        *fmt = self.format;
        let n = match &mut self.budget {
            Some(left) => {
                if *left == 0 {
                    return SourceRead::Ended;
                }
                let n = out.len().min(*left);
                *left -= n;
                n
            }
            None => out.len(),
        };
        out[..n].fill(self.value);
        SourceRead::Samples(n)
    }
}

fn null_config(samplerate: u32) -> OutputConfig {
    OutputConfig {
        module: "null".to_string(),
        samplerate,
        channels: 2,
        volume: VOLUME_MAX,
    }
}

#[test]
fn compose_is_scaled_product() {
    assert_eq!(compose(VOLUME_MAX, VOLUME_MAX), VOLUME_MAX);
    assert_eq!(compose(0, VOLUME_MAX), 0);
    assert_eq!(compose(VOLUME_MAX, 0), 0);
    assert_eq!(compose(VOLUME_MAX / 2, VOLUME_MAX), VOLUME_MAX / 2);
    assert_eq!(compose(VOLUME_MAX / 2, VOLUME_MAX / 2), VOLUME_MAX / 4);
}

#[test]
fn unknown_module_rejected() {
    let cfg = OutputConfig {
        module: "bogus".to_string(),
        ..null_config(44100)
    };
    assert!(matches!(
        Outputs::open(&cfg),
        Err(OutputError::UnknownModule(_))
    ));
}

#[test]
fn registry_lists_null_module() {
    assert!(modules().iter().any(|(id, _, _)| *id == "null"));
}

#[test]
fn stream_lifecycle_and_played_status() {
    let outputs = Outputs::open(&null_config(44100)).unwrap();
    let handle = outputs.open_handle("test").unwrap();

    let source = shared_source(ToneSource::new(1000, AudioFormat::new(44100, 2)));
    let id = handle
        .add_stream(Some("tone"), AudioFormat::new(44100, 2), 0, false, source)
        .unwrap();

    assert_eq!(handle.stream_status(&id, StreamKey::Played), 0);
    handle.play_stream(&id).unwrap();
    std::thread::sleep(Duration::from_millis(150));

    let played = handle.stream_status(&id, StreamKey::Played);
    assert!(played > 0, "no audio accounted after 150ms");

    handle.pause_stream(&id).unwrap();
    let at_pause = handle.stream_status(&id, StreamKey::Played);
    std::thread::sleep(Duration::from_millis(100));
    let after = handle.stream_status(&id, StreamKey::Played);
    // One period may still drain after the pause
    assert!(after - at_pause <= 50, "stream kept playing after pause");

    handle.remove_stream(&id);
    assert_eq!(handle.stream_status(&id, StreamKey::Played), 0);
    outputs.close();
}

#[test]
fn volumes_are_remembered_per_stream() {
    let outputs = Outputs::open(&null_config(44100)).unwrap();
    let handle = outputs.open_handle("test").unwrap();

    let id = handle
        .add_stream(
            None,
            AudioFormat::new(44100, 2),
            0,
            false,
            shared_source(ToneSource::new(1, AudioFormat::new(44100, 2))),
        )
        .unwrap();

    handle.set_volume_stream(&id, 12345).unwrap();
    assert_eq!(handle.volume_stream(&id), 12345);

    handle.set_volume(40000);
    assert_eq!(handle.volume(), 40000);
    assert_eq!(handle.volume_stream(&id), 12345);
    outputs.close();
}

#[test]
fn reload_recreates_playing_streams() {
    let outputs = Outputs::open(&null_config(44100)).unwrap();
    let handle = outputs.open_handle("test").unwrap();
    let fmt = AudioFormat::new(44100, 2);

    let a = handle
        .add_stream(Some("a"), fmt, 0, false, shared_source(ToneSource::new(100, fmt)))
        .unwrap();
    let b = handle
        .add_stream(Some("b"), fmt, 0, false, shared_source(ToneSource::new(200, fmt)))
        .unwrap();

    handle.play_stream(&a).unwrap();
    handle.play_stream(&b).unwrap();
    handle.set_volume_stream(&a, 30000).unwrap();
    handle.set_volume_stream(&b, 40000).unwrap();

    // Device rate change forces a close + reopen of the module
    outputs.set_config(&null_config(48000)).unwrap();
    assert_eq!(outputs.config().samplerate, 48000);

    // Volumes survived
    assert_eq!(handle.volume_stream(&a), 30000);
    assert_eq!(handle.volume_stream(&b), 40000);

    // Both streams resumed playing on the new device
    let before_a = handle.stream_status(&a, StreamKey::Played);
    let before_b = handle.stream_status(&b, StreamKey::Played);
    std::thread::sleep(Duration::from_millis(150));
    assert!(handle.stream_status(&a, StreamKey::Played) > before_a);
    assert!(handle.stream_status(&b, StreamKey::Played) > before_b);

    outputs.close();
}

#[test]
fn same_config_does_not_reload() {
    let outputs = Outputs::open(&null_config(44100)).unwrap();
    let handle = outputs.open_handle("test").unwrap();
    let fmt = AudioFormat::new(44100, 2);

    let id = handle
        .add_stream(None, fmt, 0, false, shared_source(ToneSource::new(5, fmt)))
        .unwrap();
    handle.play_stream(&id).unwrap();
    std::thread::sleep(Duration::from_millis(80));
    let played = handle.stream_status(&id, StreamKey::Played);

    // Volume-only change keeps the device and its position
    outputs
        .set_config(&OutputConfig {
            volume: 30000,
            ..null_config(44100)
        })
        .unwrap();
    assert!(handle.stream_status(&id, StreamKey::Played) >= played);
    assert_eq!(outputs.volume(), 30000);

    outputs.close();
}

#[test]
fn cached_stream_plays_and_ends() {
    let outputs = Outputs::open(&null_config(44100)).unwrap();
    let handle = outputs.open_handle("test").unwrap();
    let fmt = AudioFormat::new(44100, 2);

    // Roughly 50 ms of audio, then EOF
    let source = shared_source(ToneSource::finite(9, fmt, 4410));
    let id = handle.add_stream(None, fmt, 0, true, source).unwrap();
    handle.play_stream(&id).unwrap();

    std::thread::sleep(Duration::from_millis(250));
    let played = handle.stream_status(&id, StreamKey::Played);
    assert!(played > 0, "cached stream never played");

    // Finished stream stops accumulating
    let settled = handle.stream_status(&id, StreamKey::Played);
    std::thread::sleep(Duration::from_millis(100));
    assert!(handle.stream_status(&id, StreamKey::Played) - settled <= 50);

    handle.remove_stream(&id);
    outputs.close();
}

#[test]
fn rate_mismatch_stream_still_plays() {
    let outputs = Outputs::open(&null_config(48000)).unwrap();
    let handle = outputs.open_handle("test").unwrap();

    // 44.1 kHz mono source into a 48 kHz stereo device
    let src_fmt = AudioFormat::new(44100, 1);
    let id = handle
        .add_stream(
            None,
            src_fmt,
            0,
            false,
            shared_source(ToneSource::new(777, src_fmt)),
        )
        .unwrap();
    handle.play_stream(&id).unwrap();

    std::thread::sleep(Duration::from_millis(150));
    assert!(handle.stream_status(&id, StreamKey::Played) > 0);
    outputs.close();
}

#[test]
fn handle_close_removes_streams() {
    let outputs = Outputs::open(&null_config(44100)).unwrap();
    let handle = outputs.open_handle("test").unwrap();
    let fmt = AudioFormat::new(44100, 2);
    let id = handle
        .add_stream(None, fmt, 0, false, shared_source(ToneSource::new(5, fmt)))
        .unwrap();

    handle.close();
    assert!(handle.play_stream(&id).is_err());
    outputs.close();
}
