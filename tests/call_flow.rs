//! Solo-call end-to-end scenarios: a simple reply, a barge-in, and a
//! barge-in short enough that the partial reply is dropped.

mod common;

use common::*;

use dialflow::core::call_state::CallState;
use dialflow::core::conversation::{MessageContent, Role};
use dialflow::core::llm::LlmEvent;
use dialflow::core::registry::SessionRegistry;
use dialflow::core::session::SessionRole;

fn text_of(content: &MessageContent) -> &str {
    match content {
        MessageContent::Text(text) => text,
        MessageContent::Parts(_) => panic!("expected text content"),
    }
}

#[tokio::test]
async fn simple_reply_runs_full_state_cycle() {
    let llm = MockLlm::single_reply("Hello! How can I help you today?");
    let registry = SessionRegistry::new(test_context(llm.clone()));
    let handles = spawn_session(&registry, "S1", SessionRole::Solo).await;
    let session = &handles.session;

    assert_eq!(session.state(), CallState::Listening);

    session.on_transcript("Hi there", None).await;

    assert!(
        wait_until(|| session.state() == CallState::Listening
            && session.with_conversation(|c| c.len()) == 2)
            .await,
        "session did not settle back to LISTENING"
    );

    // State sequence IDLE -> LISTENING -> THINKING -> SPEAKING -> LISTENING
    let states: Vec<CallState> = session
        .state_machine()
        .history()
        .iter()
        .map(|t| t.to)
        .collect();
    assert_eq!(
        states,
        vec![
            CallState::Listening,
            CallState::Thinking,
            CallState::Speaking,
            CallState::Listening,
        ]
    );

    // Conversation = [user, assistant]
    let snapshot = session.with_conversation(|c| c.snapshot());
    assert_eq!(snapshot[0].role, Role::User);
    assert_eq!(text_of(&snapshot[0].content), "Hi there");
    assert_eq!(snapshot[1].role, Role::Assistant);
    assert_eq!(text_of(&snapshot[1].content), "Hello! How can I help you today?");

    // At least one outbound media frame was uplinked while speaking
    assert!(handles.sink.media_count() >= 1);

    // The final transition was driven by the drain signal, not the watchdog
    let last = session.state_machine().history().last().cloned().unwrap();
    assert_eq!(last.reason, "drained");

    // Gate invariant: closed again after the reply
    assert!(!session.gate().is_enabled());
}

#[tokio::test]
async fn barge_in_interrupts_and_annotates() {
    let llm = MockLlm::new(vec![
        // First generation: starts speaking, then stalls so the barge-in
        // lands mid-reply
        vec![
            Step::Event(LlmEvent::Start),
            Step::Event(LlmEvent::TextDelta {
                id: "0".to_string(),
                text: "Sure, let me check the calendar for".to_string(),
            }),
            Step::Wait(5_000),
            Step::Event(LlmEvent::Finish {
                reason: "stop".to_string(),
            }),
        ],
        // Second generation answers the interrupting utterance
        vec![
            Step::Event(LlmEvent::Start),
            Step::Event(LlmEvent::TextDelta {
                id: "0".to_string(),
                text: "Okay, stopping now.".to_string(),
            }),
            Step::Event(LlmEvent::Finish {
                reason: "stop".to_string(),
            }),
        ],
    ]);
    let registry = SessionRegistry::new(test_context(llm.clone()));
    let handles = spawn_session(&registry, "S1", SessionRole::Solo).await;
    let session = &handles.session;

    session.on_transcript("what does tomorrow look like", None).await;
    assert!(
        wait_until(|| session.state() == CallState::Speaking).await,
        "never reached SPEAKING"
    );

    session.on_transcript("stop", None).await;

    assert!(
        wait_until(|| llm.call_count() == 2
            && session.state() == CallState::Listening
            && session.with_conversation(|c| c.len()) >= 4)
            .await,
        "barge-in did not trigger a second generation"
    );

    // Exactly one clear sequence of three frames was uplinked
    assert_eq!(handles.sink.clear_count(), 3);

    // The partial reply was long enough to keep, annotated
    let snapshot = session.with_conversation(|c| c.snapshot());
    let interrupted: Vec<_> = snapshot
        .iter()
        .filter(|m| {
            m.role == Role::Assistant
                && matches!(&m.content, MessageContent::Text(t) if t.ends_with(" [interrupted]"))
        })
        .collect();
    assert_eq!(interrupted.len(), 1);
    assert_eq!(
        text_of(&interrupted[0].content),
        "Sure, let me check the calendar for [interrupted]"
    );

    // The interruption path ran: INTERRUPTED appears in the history
    let states: Vec<CallState> = session
        .state_machine()
        .history()
        .iter()
        .map(|t| t.to)
        .collect();
    assert!(states.contains(&CallState::Interrupted));

    // The TTS queue was cleared once
    assert_eq!(handles.tts_clears.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn short_barge_in_drops_partial_reply() {
    let llm = MockLlm::new(vec![
        vec![
            Step::Event(LlmEvent::Start),
            Step::Event(LlmEvent::TextDelta {
                id: "0".to_string(),
                text: "Sure,".to_string(),
            }),
            Step::Wait(5_000),
            Step::Event(LlmEvent::Finish {
                reason: "stop".to_string(),
            }),
        ],
        vec![
            Step::Event(LlmEvent::Start),
            Step::Event(LlmEvent::TextDelta {
                id: "0".to_string(),
                text: "Understood, ending here.".to_string(),
            }),
            Step::Event(LlmEvent::Finish {
                reason: "stop".to_string(),
            }),
        ],
    ]);
    let registry = SessionRegistry::new(test_context(llm.clone()));
    let handles = spawn_session(&registry, "S1", SessionRole::Solo).await;
    let session = &handles.session;

    session.on_transcript("hello there agent", None).await;
    assert!(wait_until(|| session.state() == CallState::Speaking).await);

    session.on_transcript("stop", None).await;
    assert!(
        wait_until(|| llm.call_count() == 2 && session.state() == CallState::Listening).await
    );

    // Five codepoints is under the keep threshold: no interrupted message
    let snapshot = session.with_conversation(|c| c.snapshot());
    assert!(snapshot.iter().all(|m| {
        !matches!(&m.content, MessageContent::Text(t) if t.ends_with(" [interrupted]"))
    }));

    // The user turns and the second reply are all there
    let texts: Vec<String> = snapshot
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::Text(t) => Some(t.clone()),
            _ => None,
        })
        .collect();
    assert!(texts.contains(&"hello there agent".to_string()));
    assert!(texts.contains(&"stop".to_string()));
    assert!(texts.contains(&"Understood, ending here.".to_string()));
}

#[tokio::test]
async fn transcript_dropped_outside_listening_and_speaking() {
    // A generation that never produces text holds the session in THINKING
    let llm = MockLlm::new(vec![
        vec![
            Step::Event(LlmEvent::Start),
            Step::Wait(300),
            Step::Event(LlmEvent::Finish {
                reason: "stop".to_string(),
            }),
        ],
    ]);
    let registry = SessionRegistry::new(test_context(llm.clone()));
    let handles = spawn_session(&registry, "S1", SessionRole::Solo).await;
    let session = &handles.session;

    session.on_transcript("first", None).await;
    assert!(wait_until(|| session.state() == CallState::Thinking).await);

    // Arrives while THINKING: dropped with a log, no second generation
    session.on_transcript("second", None).await;

    assert!(wait_until(|| session.state() == CallState::Listening).await);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(llm.call_count(), 1);
    assert_eq!(session.with_conversation(|c| c.len()), 1);
}

#[tokio::test]
async fn speak_verbatim_bypasses_the_language_service() {
    let llm = MockLlm::new(vec![]);
    let registry = SessionRegistry::new(test_context(llm.clone()));
    let handles = spawn_session(&registry, "S1", SessionRole::Solo).await;
    let session = &handles.session;

    session.speak_verbatim("One moment please.").await.unwrap();
    assert_eq!(handles.tts_sent.lock().as_slice(), ["One moment please."]);
    assert!(handles.sink.media_count() >= 1);

    // SPEAKING appears in the history; the mock reports drained right away
    // and the loop settles back to LISTENING with the gate closed
    assert!(wait_until(|| session.state() == CallState::Listening).await);
    let states: Vec<CallState> = session
        .state_machine()
        .history()
        .iter()
        .map(|t| t.to)
        .collect();
    assert!(states.contains(&CallState::Speaking));
    assert!(!session.gate().is_enabled());

    // No generation was involved
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn transfer_without_control_plane_fails_cleanly() {
    let llm = MockLlm::new(vec![]);
    let registry = SessionRegistry::new(test_context(llm));
    let handles = spawn_session(&registry, "S1", SessionRole::Solo).await;
    let session = &handles.session;

    let result = session.transfer_to_human("caller asked for a person").await;
    assert!(result.is_err());

    // The failure left the session where it was
    assert_eq!(session.state(), CallState::Listening);
    assert!(!session.is_transferring());
    assert!(!session.gate().is_enabled());
}

#[tokio::test]
async fn dtmf_emits_one_frame_per_digit() {
    let llm = MockLlm::new(vec![]);
    let registry = SessionRegistry::new(test_context(llm));
    let handles = spawn_session(&registry, "S1", SessionRole::Solo).await;

    handles.session.send_dtmf("12#").unwrap();
    assert_eq!(handles.sink.dtmf_digits(), "12#");

    // Invalid digits are rejected outright
    assert!(handles.session.send_dtmf("12a").is_err());
    assert_eq!(handles.sink.dtmf_digits(), "12#");
}
