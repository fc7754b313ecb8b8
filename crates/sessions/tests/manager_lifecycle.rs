use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_domain::config::SessionsConfig;
use tether_domain::Error;
use tether_protocol::FrameKind;
use tether_sessions::{handler_fn, SessionHandler, SessionManager, SessionMessage, SessionState};

fn echo() -> Arc<dyn SessionHandler> {
    handler_fn(|msg, session| async move {
        if let SessionMessage::Message(text) = msg {
            session.send(&text);
        }
        Ok(())
    })
}

#[tokio::test]
async fn polling_transport_round_trip() {
    let sm = SessionManager::new(SessionsConfig::default(), echo());

    // First poll: opens the session and drains the `o` frame.
    let session = sm.get_or_create("abc");
    sm.acquire_with("abc", false).await.unwrap();
    assert_eq!(session.wait().await.unwrap(), (FrameKind::Open, "o".into()));
    sm.release(&session);

    // Client sends while no poll is attached.
    session
        .remote_messages(vec!["one".to_string(), "two".to_string()])
        .await;

    // Next poll drains both echoes as one batch.
    sm.acquire_with("abc", false).await.unwrap();
    assert_eq!(
        session.wait().await.unwrap(),
        (FrameKind::Message, r#"a["one","two"]"#.into())
    );
    sm.release(&session);
    assert_eq!(session.hits(), 2);
}

#[tokio::test]
async fn second_transport_is_rejected_until_release() {
    let sm = SessionManager::new(SessionsConfig::default(), echo());
    let session = sm.get_or_create("abc");

    sm.acquire("abc").await.unwrap();
    assert!(matches!(
        sm.acquire("abc").await,
        Err(Error::AlreadyAcquired(_))
    ));

    sm.release(&session);
    assert!(sm.acquire("abc").await.is_ok());
}

#[tokio::test]
async fn long_poll_times_out_without_leaking_waiter() {
    let sm = SessionManager::new(SessionsConfig::default(), echo());
    let session = sm.get_or_create("abc");
    sm.acquire("abc").await.unwrap();
    session.wait().await.unwrap();

    let polled = tokio::time::timeout(Duration::from_millis(10), session.wait()).await;
    assert!(polled.is_err());
    assert!(!session.has_waiter());
}

#[tokio::test]
async fn handler_sees_full_lifecycle() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = seen.clone();
        handler_fn(move |msg, _session| {
            let seen = seen.clone();
            async move {
                seen.lock().push(msg.kind());
                Ok(())
            }
        })
    };
    let sm = SessionManager::new(SessionsConfig::default(), handler);
    let session = sm.get_or_create("abc");

    sm.acquire("abc").await.unwrap();
    session.remote_message("hi".into()).await;
    session.remote_close(Some("socket reset".into())).await;
    session.remote_closed().await;
    sm.release(&session);

    assert_eq!(*seen.lock(), vec!["open", "message", "close", "closed"]);
    assert!(session.interrupted());
    assert_eq!(session.state(), SessionState::Closed);

    let report = sm.sweep().await;
    assert_eq!(report.evicted, 1);
    assert!(sm.is_empty());
}

#[tokio::test]
async fn broadcast_then_clear() {
    let sm = SessionManager::new(SessionsConfig::default(), echo());
    for id in ["a", "b", "c"] {
        let s = sm.get_or_create(id);
        sm.acquire(id).await.unwrap();
        s.wait().await.unwrap();
        sm.release(&s);
    }

    assert_eq!(sm.broadcast("hello all"), 3);
    let a = sm.get("a").unwrap();
    assert_eq!(
        a.wait().await.unwrap(),
        (FrameKind::MessageBlob, r#"a["hello all"]"#.into())
    );

    sm.clear().await;
    assert!(sm.is_empty());
    assert!(a.wait().await.unwrap_err().is_end_of_stream());
}
