//! Integration test for the process-wide presence reads.
//!
//! The global registry can only be installed once per process, so the whole
//! lifecycle runs as one test in its own binary:
//! 1. Reads are false before anything is installed.
//! 2. After install and mount, reads stay not-ready until the snapshot.
//! 3. The snapshot makes reads answer from the online set.
//! 4. Dropping the last tracker resets reads to false.

use std::sync::Arc;

use tahweel_proto::ServerEvent;
use tahweel_realtime::presence::{
    PresenceRegistry, PresenceTracker, is_presence_ready, is_user_online_global,
};
use tahweel_realtime::transport::loopback::LoopbackTransport;

#[tokio::test]
async fn global_reads_follow_installed_registry() {
    assert!(!is_presence_ready());
    assert!(!is_user_online_global("alice"));

    let transport = LoopbackTransport::new();
    let registry = PresenceRegistry::new(Arc::new(transport.clone()));
    assert!(registry.install_global());
    assert!(!registry.install_global());

    let tracker = PresenceTracker::mount(&registry);
    assert!(!is_presence_ready());
    assert!(!is_user_online_global("alice"));

    transport.deliver(&ServerEvent::PresenceInitial {
        user_ids: vec!["alice".to_string()],
    });
    assert!(is_presence_ready());
    assert!(is_user_online_global("alice"));
    assert!(!is_user_online_global("bob"));

    transport.deliver(&ServerEvent::UserOnline {
        user_id: "bob".to_string(),
    });
    assert!(is_user_online_global("bob"));

    drop(tracker);
    assert!(!is_presence_ready());
    assert!(!is_user_online_global("alice"));
    assert!(!is_user_online_global("bob"));
}
