use super::*;
use syncroom_client::relay::{RelayPipeline, drive};

#[test]
fn file_sink_writes_fragments_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.webm");
    let mut sink = FileSink::new(&path);
    let mut pipeline = RelayPipeline::new();

    let actions = pipeline.stream_started("audio/webm;codecs=opus");
    drive(&mut pipeline, &mut sink, actions);
    for chunk in [b"ab".to_vec(), b"cd".to_vec(), b"e".to_vec()] {
        let actions = pipeline.chunk_arrived(chunk);
        drive(&mut pipeline, &mut sink, actions);
    }
    assert_eq!(sink.written(), 5);

    let actions = pipeline.reset();
    drive(&mut pipeline, &mut sink, actions);
    assert_eq!(std::fs::read(&path).unwrap(), b"abcde");
}

#[test]
fn file_sink_append_without_buffer_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = FileSink::new(dir.path().join("out.bin"));
    assert!(sink.append(b"x").is_err());
}

#[test]
fn file_sink_unwritable_path_faults_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = FileSink::new(dir.path().join("missing").join("out.bin"));
    let mut pipeline = RelayPipeline::new();

    let actions = pipeline.stream_started("audio/ogg");
    drive(&mut pipeline, &mut sink, actions);
    assert_eq!(pipeline.state(), &syncroom_client::relay::PipelineState::Faulted);
}

#[test]
fn console_player_pause_freezes_cursor() {
    let mut player = ConsolePlayer::new();
    assert!(player.is_paused());
    player.seek(10.0);
    assert!((player.position() - 10.0).abs() < f64::EPSILON);

    player.play().unwrap();
    assert!(!player.is_paused());
    assert!(player.position() >= 10.0);

    player.pause();
    let frozen = player.position();
    assert!(player.is_paused());
    assert!((player.position() - frozen).abs() < f64::EPSILON);
}
