mod common;

use atlasd::error::{AudioError, PipelineError, TransientRecognitionError};
use atlasd::pipeline::PipelineEvent;
use atlasd::transcription::{EngineEvent, EngineKind, TranscriptFragment};
use atlasd::vad::VadEvent;
use common::{EngineProbe, PipelineBuilder};
use shared::ListeningMode;
use std::sync::atomic::Ordering;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_start_enters_passive_wake_on_primary() {
    let mut f = PipelineBuilder::new().build();

    assert_ok!(f.orchestrator.initialize().await);
    assert_eq!(f.orchestrator.mode(), ListeningMode::Idle);

    assert_ok!(f.orchestrator.start().await);
    let status = f.orchestrator.status();
    assert_eq!(status.mode, ListeningMode::PassiveWake);
    assert_eq!(status.engine, Some(EngineKind::PrimaryOnDevice));
    assert!(status.vad_available);
    assert!(status.microphone_open);
    assert!(!status.listening_for_command());
    assert_eq!(f.mic.opened(), 1);
    assert_eq!(f.primary.starts(), 1);
    assert_eq!(f.fallback.inits(), 0);
}

#[tokio::test]
async fn test_start_before_initialize_is_rejected() {
    let mut f = PipelineBuilder::new().build();
    let err = f.orchestrator.start().await.unwrap_err();
    assert_eq!(err, PipelineError::NotInitialized);
    assert_eq!(f.orchestrator.mode(), ListeningMode::Idle);
}

#[tokio::test]
async fn test_fragments_are_dropped_while_idle() {
    let mut f = PipelineBuilder::new().build();
    let mut activation = f.orchestrator.subscribe_activation();
    f.orchestrator.initialize().await.unwrap();

    f.primary.final_result("hey atlas");
    f.orchestrator.process_pending().await;

    assert_eq!(f.orchestrator.mode(), ListeningMode::Idle);
    assert!(activation.try_recv().is_none());
}

#[tokio::test]
async fn test_wake_phrase_then_single_final_command() {
    let mut f = PipelineBuilder::new().build();
    let mut activation = f.orchestrator.subscribe_activation();
    let mut commands = f.orchestrator.subscribe_commands();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.primary.interim("what's the weather");
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);
    assert!(activation.try_recv().is_none());

    f.primary.interim("Hey, Atlas!");
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.mode(), ListeningMode::ActiveCommand);
    assert_eq!(activation.try_recv(), Some(()));

    f.primary.interim("open net");
    f.primary.interim("open netflix");
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.mode(), ListeningMode::ActiveCommand);
    assert!(commands.try_recv().is_none());

    f.primary.final_result("open netflix");
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);
    assert_eq!(commands.try_recv().as_deref(), Some("open netflix"));
    assert!(commands.try_recv().is_none());

    // Back in passive mode: text without the wake phrase goes nowhere.
    f.primary.final_result("open netflix");
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);
    assert!(commands.try_recv().is_none());
}

#[tokio::test]
async fn test_wake_phrase_matches_as_substring() {
    let mut f = PipelineBuilder::new().build();
    let mut activation = f.orchestrator.subscribe_activation();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.primary.final_result("heyatlas open");
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.mode(), ListeningMode::ActiveCommand);
    assert_eq!(activation.try_recv(), Some(()));

    assert!(f.orchestrator.stop_command_listening());
    f.primary.final_result("the atlases are on the shelf");
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.mode(), ListeningMode::ActiveCommand);
    assert_eq!(activation.try_recv(), Some(()));
}

#[tokio::test]
async fn test_explicit_command_window() {
    let mut f = PipelineBuilder::new().build();
    assert!(!f.orchestrator.start_command_listening());

    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    assert!(f.orchestrator.start_command_listening());
    assert_eq!(f.orchestrator.mode(), ListeningMode::ActiveCommand);
    assert!(f.orchestrator.status().listening_for_command());

    assert!(f.orchestrator.stop_command_listening());
    assert!(!f.orchestrator.stop_command_listening());
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);
}

#[tokio::test]
async fn test_fallback_selected_when_primary_unavailable() {
    let mut f = PipelineBuilder::new().primary_fails("model not found").build();

    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    assert_eq!(
        f.orchestrator.active_engine(),
        Some(EngineKind::FallbackPlatform)
    );
    assert_eq!(f.fallback.starts(), 1);
    assert_eq!(f.primary.starts(), 0);
}

#[tokio::test]
async fn test_both_engines_unavailable() {
    let mut f = PipelineBuilder::new()
        .primary_fails("model not found")
        .fallback_fails("no api key")
        .build();

    let err = f.orchestrator.initialize().await.unwrap_err();
    match &err {
        PipelineError::InitFailed { primary, fallback } => {
            assert!(primary.to_string().contains("model not found"));
            assert!(fallback.to_string().contains("no api key"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.user_message().contains("Voice recognition is unavailable"));

    assert_eq!(f.orchestrator.mode(), ListeningMode::Idle);
    assert!(!f.orchestrator.is_initialized());
    assert!(!f.orchestrator.status().microphone_open);
    assert_eq!(f.mic.closed(), 1);
}

#[tokio::test]
async fn test_microphone_denied_surfaces_permission_message() {
    let mut f = PipelineBuilder::new()
        .microphone_error(AudioError::PermissionDenied("EACCES".into()))
        .build();

    let err = assert_err!(f.orchestrator.initialize().await);
    assert!(matches!(err, PipelineError::Audio(AudioError::PermissionDenied(_))));
    assert!(err.user_message().contains("microphone permissions"));
    assert_eq!(f.primary.inits(), 0);
    assert_eq!(f.orchestrator.mode(), ListeningMode::Idle);
}

#[tokio::test]
async fn test_vad_failure_is_not_fatal() {
    let mut f = PipelineBuilder::new().without_vad().build();
    let mut activation = f.orchestrator.subscribe_activation();

    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();
    assert!(!f.orchestrator.status().vad_available);
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);

    f.primary.final_result("hey atlas");
    f.orchestrator.process_pending().await;
    assert_eq!(activation.try_recv(), Some(()));
}

#[tokio::test]
async fn test_vad_start_failure_is_reported_in_status() {
    let mut f = PipelineBuilder::new().vad_start_fails().build();
    let mut activation = f.orchestrator.subscribe_activation();

    f.orchestrator.initialize().await.unwrap();
    assert!(f.orchestrator.status().vad_available);

    f.orchestrator.start().await.unwrap();
    assert!(!f.orchestrator.status().vad_available);
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);

    f.primary.final_result("hey atlas");
    f.orchestrator.process_pending().await;
    assert_eq!(activation.try_recv(), Some(()));
}

#[tokio::test]
async fn test_vad_events_are_advisory() {
    let mut f = PipelineBuilder::new().build();
    let mut activation = f.orchestrator.subscribe_activation();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.vad.emit(VadEvent::SpeechStart);
    f.orchestrator.process_pending().await;
    assert!(f.orchestrator.status().speech_active);

    f.vad.emit(VadEvent::SpeechEnd(vec![0.0; 1600]));
    f.orchestrator.process_pending().await;
    assert!(!f.orchestrator.status().speech_active);

    // Fragments reach wake detection whether or not VAD heard anything.
    f.primary.final_result("atlas");
    f.orchestrator.process_pending().await;
    assert_eq!(activation.try_recv(), Some(()));
}

#[tokio::test]
async fn test_stop_keeps_engines_and_microphone() {
    let mut f = PipelineBuilder::new().build();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();
    f.orchestrator.start_command_listening();

    f.orchestrator.stop();
    assert_eq!(f.orchestrator.mode(), ListeningMode::Idle);
    assert!(f.orchestrator.status().microphone_open);
    assert_eq!(f.mic.closed(), 0);
    assert!(EngineProbe::count(&f.primary.stops) >= 1);

    f.orchestrator.start().await.unwrap();
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);
    assert_eq!(f.primary.inits(), 1);
    assert_eq!(f.primary.starts(), 2);
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let mut f = PipelineBuilder::new().build();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.orchestrator.destroy();
    f.orchestrator.destroy();

    assert_eq!(f.orchestrator.mode(), ListeningMode::Idle);
    assert!(!f.orchestrator.is_initialized());
    assert_eq!(f.mic.closed(), 1);
    assert_eq!(f.primary.shutdowns(), 1);
    assert_eq!(f.fallback.shutdowns(), 0);
    assert_eq!(f.vad.destroyed.load(Ordering::SeqCst), 2);

    // A destroyed pipeline can be brought back up.
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();
    assert_eq!(f.mic.opened(), 2);
    assert_eq!(f.primary.inits(), 2);
}

#[tokio::test]
async fn test_stale_and_foreign_fragments_are_dropped() {
    let mut f = PipelineBuilder::new().build();
    let mut activation = f.orchestrator.subscribe_activation();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.primary.interim("play something");
    f.orchestrator.process_pending().await;

    let fragment = |sequence| TranscriptFragment {
        text: "hey atlas".to_string(),
        is_final: true,
        sequence,
    };

    // Replayed sequence number from the active engine.
    f.orchestrator
        .handle_event(PipelineEvent::Engine(EngineEvent::Fragment {
            kind: EngineKind::PrimaryOnDevice,
            fragment: fragment(0),
        }))
        .await;
    assert!(activation.try_recv().is_none());

    // Engine that is not the active one.
    f.orchestrator
        .handle_event(PipelineEvent::Engine(EngineEvent::Fragment {
            kind: EngineKind::FallbackPlatform,
            fragment: fragment(7),
        }))
        .await;
    assert!(activation.try_recv().is_none());
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);
}

#[tokio::test(start_paused = true)]
async fn test_ended_session_is_restarted() {
    let mut f = PipelineBuilder::new().build();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.primary.end_session(TransientRecognitionError::SessionEnded);
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);

    let event = f.orchestrator.next_event().await;
    assert_eq!(event, Some(PipelineEvent::RestartDue));
    f.orchestrator.handle_event(PipelineEvent::RestartDue).await;

    assert_eq!(f.primary.starts(), 2);
    assert_eq!(
        f.orchestrator.active_engine(),
        Some(EngineKind::PrimaryOnDevice)
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_errors_fail_over_to_fallback() {
    let mut f = PipelineBuilder::new().max_restart_attempts(1).build();
    let mut activation = f.orchestrator.subscribe_activation();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.primary
        .end_session(TransientRecognitionError::Decoder("whisper failed".into()));
    f.orchestrator.process_pending().await;
    assert_eq!(f.orchestrator.next_event().await, Some(PipelineEvent::RestartDue));
    f.orchestrator.handle_event(PipelineEvent::RestartDue).await;
    assert_eq!(f.primary.starts(), 2);

    f.primary
        .end_session(TransientRecognitionError::Decoder("whisper failed".into()));
    f.orchestrator.process_pending().await;

    assert_eq!(
        f.orchestrator.active_engine(),
        Some(EngineKind::FallbackPlatform)
    );
    assert_eq!(f.fallback.starts(), 1);
    assert_eq!(f.orchestrator.mode(), ListeningMode::PassiveWake);

    // The primary's late output no longer counts.
    f.primary.final_result("hey atlas");
    f.orchestrator.process_pending().await;
    assert!(activation.try_recv().is_none());

    f.fallback.final_result("hey atlas");
    f.orchestrator.process_pending().await;
    assert_eq!(activation.try_recv(), Some(()));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_fallback_stops_listening() {
    let mut f = PipelineBuilder::new()
        .primary_fails("model not found")
        .max_restart_attempts(0)
        .build();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.fallback
        .end_session(TransientRecognitionError::Network("connection reset".into()));
    f.orchestrator.process_pending().await;

    assert_eq!(f.orchestrator.mode(), ListeningMode::Idle);
    // Still initialized, so a later start can try again.
    assert!(f.orchestrator.is_initialized());
}

#[tokio::test]
async fn test_fragment_resets_error_count() {
    let mut f = PipelineBuilder::new().max_restart_attempts(1).build();
    f.orchestrator.initialize().await.unwrap();
    f.orchestrator.start().await.unwrap();

    f.primary
        .end_session(TransientRecognitionError::Network("timeout".into()));
    f.orchestrator.process_pending().await;
    f.orchestrator.handle_event(PipelineEvent::RestartDue).await;

    f.primary.interim("hello");
    f.orchestrator.process_pending().await;

    f.primary
        .end_session(TransientRecognitionError::Network("timeout".into()));
    f.orchestrator.process_pending().await;

    assert_eq!(
        f.orchestrator.active_engine(),
        Some(EngineKind::PrimaryOnDevice)
    );
    assert_eq!(f.fallback.inits(), 0);
}
