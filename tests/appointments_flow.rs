//! Appointment outcome recording: persistence failures are non-fatal and
//! the outcome is retried on cleanup.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use common::*;
use parking_lot::Mutex;

use dialflow::appointments::{
    Appointment, AppointmentError, AppointmentPatch, AppointmentRecord, AppointmentStatus,
    AppointmentStore, UserProfile,
};
use dialflow::core::registry::SessionRegistry;
use dialflow::core::session::{SessionContext, SessionParams, SessionRole};

/// Store whose first update fails, mimicking a transient outage.
struct FlakyStore {
    fail_next: AtomicBool,
    updates: Mutex<Vec<(String, AppointmentStatus)>>,
}

impl FlakyStore {
    fn new(fail_first: bool) -> Arc<Self> {
        Arc::new(Self {
            fail_next: AtomicBool::new(fail_first),
            updates: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl AppointmentStore for FlakyStore {
    async fn fetch(&self, id: &str) -> Result<AppointmentRecord, AppointmentError> {
        Ok(AppointmentRecord {
            appointment: Appointment {
                id: id.to_string(),
                status: AppointmentStatus::Pending,
                notes: None,
                contact_name: None,
                contact_phone: None,
            },
            user: UserProfile::default(),
        })
    }

    async fn update(&self, id: &str, patch: AppointmentPatch) -> Result<(), AppointmentError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AppointmentError::RequestFailed("store down".to_string()));
        }
        self.updates.lock().push((id.to_string(), patch.status));
        Ok(())
    }
}

async fn session_with_store(
    store: Arc<FlakyStore>,
) -> (Arc<SessionRegistry>, SessionHandles) {
    let llm = MockLlm::new(vec![]);
    let ctx = SessionContext {
        appointments: Some(store),
        ..test_context(llm)
    };
    let registry = SessionRegistry::new(ctx);

    let sink = Arc::new(RecordingSink::default());
    let stt_probe = Arc::new(AdapterProbe::default());
    let tts_probe = Arc::new(AdapterProbe::default());
    let tts_sent = Arc::new(Mutex::new(Vec::new()));
    let tts_clears = Arc::new(AtomicUsize::new(0));
    let session = registry
        .create(
            SessionParams {
                stream_sid: "S1".to_string(),
                call_sid: "CA-S1".to_string(),
                caller: None,
                role: SessionRole::Solo,
                appointment_id: Some("apt-1".to_string()),
            },
            Box::new(MockStt::new(stt_probe.clone())),
            Box::new(MockTts::new(tts_probe.clone(), tts_sent.clone(), tts_clears.clone())),
            sink.clone(),
        )
        .await
        .unwrap();

    (
        registry,
        SessionHandles {
            session,
            sink,
            stt_probe,
            tts_probe,
            tts_sent,
            tts_clears,
        },
    )
}

#[tokio::test]
async fn outcome_persists_immediately_when_store_healthy() {
    let store = FlakyStore::new(false);
    let (_registry, handles) = session_with_store(store.clone()).await;

    handles
        .session
        .record_outcome(AppointmentStatus::Success, Some("booked Tuesday".to_string()))
        .await;

    let updates = store.updates.lock().clone();
    assert_eq!(updates, vec![("apt-1".to_string(), AppointmentStatus::Success)]);
}

#[tokio::test]
async fn failed_outcome_write_is_retried_on_cleanup() {
    let store = FlakyStore::new(true);
    let (registry, handles) = session_with_store(store.clone()).await;

    handles
        .session
        .record_outcome(AppointmentStatus::FailedBusinessClosed, None)
        .await;

    // First write failed; nothing persisted yet
    assert!(store.updates.lock().is_empty());

    // Cleanup retries the retained outcome
    registry.delete("S1").await;
    let updates = store.updates.lock().clone();
    assert_eq!(
        updates,
        vec![("apt-1".to_string(), AppointmentStatus::FailedBusinessClosed)]
    );
}

#[tokio::test]
async fn later_outcome_supersedes_earlier_one() {
    let store = FlakyStore::new(false);
    let (registry, handles) = session_with_store(store.clone()).await;

    handles
        .session
        .record_outcome(AppointmentStatus::InProgress, None)
        .await;
    handles
        .session
        .record_outcome(AppointmentStatus::Success, None)
        .await;

    registry.delete("S1").await;
    let updates = store.updates.lock().clone();
    // Two live writes, no duplicate retry at cleanup
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].1, AppointmentStatus::Success);
}
