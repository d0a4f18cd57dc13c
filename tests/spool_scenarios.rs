//! End-to-end daemon scenarios
//!
//! Each test drives a real [`Supervisor`] over a temporary directory with a
//! recording transfer client.

use r66_client::{MemoryTaskLedger, SpecialId};
use r66_integration_tests::{Call, RecordingClient, Workspace, drive, supervisor, supervisor_with};
use r66_spool::{FileState, SpoolError, SupervisorState, TransferMode};
use std::time::Duration;

#[tokio::test]
async fn test_single_host_direct() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    let path = ws.write("a.txt", b"0123456789").unwrap();

    let mut daemon = supervisor(ws.config(&["hostA"]), client.clone());
    assert!(daemon.prepare().await.unwrap());
    drive(&mut daemon, 2).await.unwrap();

    assert_eq!(
        client.direct_calls(),
        vec![Call::Direct {
            host: "hostA".into(),
            path: path.clone(),
            special_id: SpecialId::ILLEGAL,
        }]
    );
    let item = daemon.ledger().lock().get(&path).cloned().unwrap();
    assert_eq!(item.state, FileState::DoneOk);
    assert!(item.special_id.is_legal());

    let report = daemon.finish().await;
    assert_eq!((report.sent, report.error), (1, 0));
}

#[tokio::test]
async fn test_fan_out_with_one_failing_host() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    client.fail_host("hostB");
    let path = ws.write("a.txt", b"0123456789").unwrap();

    let mut daemon = supervisor(ws.config(&["hostA", "hostB"]), client.clone());
    daemon.prepare().await.unwrap();
    drive(&mut daemon, 2).await.unwrap();

    let calls = client.direct_calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        let Call::Direct { special_id, .. } = call else {
            panic!("direct call expected");
        };
        assert_eq!(*special_id, SpecialId::ILLEGAL);
    }

    let item = daemon.ledger().lock().get(&path).cloned().unwrap();
    assert_eq!(item.state, FileState::DoneOk);
    // Several hosts share one file: no single id can be kept
    assert_eq!(item.special_id, SpecialId::ILLEGAL);

    let report = daemon.finish().await;
    assert_eq!((report.sent, report.error), (1, 1));
}

#[tokio::test]
async fn test_every_host_failing_leaves_done_err() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    client.fail_host("hostA");
    let path = ws.write("a.txt", b"0123456789").unwrap();

    let mut daemon = supervisor(ws.config(&["hostA"]), client.clone());
    daemon.prepare().await.unwrap();
    drive(&mut daemon, 4).await.unwrap();

    // Failed files wait for a content change
    assert_eq!(client.direct_calls().len(), 1);
    let state = daemon.ledger().lock().get(&path).map(|i| i.state);
    assert_eq!(state, Some(FileState::DoneErr));
    let report = daemon.finish().await;
    assert_eq!((report.sent, report.error), (0, 1));
}

#[tokio::test]
async fn test_modified_file_is_sent_again() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    let path = ws.write("a.txt", b"0123456789").unwrap();

    let mut daemon = supervisor(ws.config(&["hostA"]), client.clone());
    daemon.prepare().await.unwrap();
    drive(&mut daemon, 2).await.unwrap();
    let first_id = daemon.ledger().lock().get(&path).map(|i| i.special_id).unwrap();

    ws.write("a.txt", b"01234567890123456789").unwrap();

    daemon.run_cycle().await.unwrap();
    let item = daemon.ledger().lock().get(&path).cloned().unwrap();
    assert_eq!(item.state, FileState::Seen);
    assert_eq!(item.size, 20);
    assert_eq!(item.special_id, SpecialId::ILLEGAL);

    drive(&mut daemon, 1).await.unwrap();
    let item = daemon.ledger().lock().get(&path).cloned().unwrap();
    assert_eq!(item.state, FileState::DoneOk);
    assert_ne!(item.special_id, first_id);
    assert_eq!(client.direct_calls().len(), 2);
}

#[tokio::test]
async fn test_stop_file_during_run() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    ws.write("a.txt", b"0123456789").unwrap();

    let daemon = supervisor(ws.config(&["hostA"]), client.clone());
    let handle = daemon.handle();
    let task = tokio::spawn(daemon.run());

    for _ in 0..50 {
        if handle.status().sent == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(handle.state(), SupervisorState::Running);

    ws.request_stop().unwrap();
    ws.write("b.txt", b"late").unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.state, SupervisorState::Stopped);
    assert_eq!((report.sent, report.error), (1, 0));
    assert_eq!(client.direct_calls().len(), 1);
    assert!(ws.status_file().is_file());

    // A second stop request on a stopped daemon is harmless
    handle.stop();
    assert_eq!(handle.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_submit_without_task_database() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    ws.write("a.txt", b"0123456789").unwrap();
    let mut config = ws.config(&["hostA"]);
    config.mode = TransferMode::Submit;

    let daemon = supervisor(config, client.clone());
    let handle = daemon.handle();
    let err = daemon.run().await.unwrap_err();

    assert!(matches!(err, SpoolError::Validation(_)));
    assert!(err.is_config());
    assert_eq!(handle.state(), SupervisorState::Stopped);
    assert!(client.calls().is_empty());
    assert!(!ws.status_file().exists());
}

#[tokio::test]
async fn test_submit_with_task_database() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    let path = ws.write("a.txt", b"0123456789").unwrap();
    let mut config = ws.config(&["hostA"]);
    config.mode = TransferMode::Submit;

    let mut daemon = supervisor_with(config, client.clone(), MemoryTaskLedger::connected());
    daemon.prepare().await.unwrap();
    drive(&mut daemon, 2).await.unwrap();

    assert_eq!(
        client.calls(),
        vec![Call::Submit {
            host: "hostA".into(),
            path,
        }]
    );
}

#[tokio::test]
async fn test_heartbeat_reaches_observers() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    client.fail_host("obs2");
    let mut config = ws.config(&["hostA"]);
    config.waarp_hosts = vec!["obs1".into(), " obs2 ".into()];
    config.elapse_waarp = Duration::from_millis(1100);

    let daemon = supervisor(config, client.clone());
    let handle = daemon.handle();
    let task = tokio::spawn(daemon.run());

    tokio::time::sleep(Duration::from_millis(5000)).await;
    handle.stop();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Nominal firings at 1.1, 2.2, 3.3 and 4.4 s
    let reached = client.business_to("obs1");
    let failed = client.business_to("obs2");
    assert!((3..=5).contains(&reached), "obs1 got {reached} heartbeats");
    assert_eq!(reached, failed);

    let payload = client
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Business { payload, .. } => Some(payload),
            _ => None,
        })
        .unwrap();
    assert!(payload.starts_with("SpooledInformTask {"));
}

#[tokio::test]
async fn test_restart_resumes_from_status_file() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    let sent = ws.write("sent.txt", b"0123456789").unwrap();

    let mut first = supervisor(ws.config(&["hostA"]), client.clone());
    first.prepare().await.unwrap();
    drive(&mut first, 2).await.unwrap();
    first.finish().await;
    assert_eq!(client.direct_calls().len(), 1);

    let fresh = ws.write("fresh.txt", b"new").unwrap();
    let mut second = supervisor(ws.config(&["hostA"]), client.clone());
    second.prepare().await.unwrap();
    drive(&mut second, 3).await.unwrap();

    let paths: Vec<_> = client
        .direct_calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Direct { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(paths, vec![sent, fresh]);
}

#[tokio::test]
async fn test_regex_filter_and_recursion() {
    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    std::fs::create_dir(ws.input().join("sub")).unwrap();
    let wanted = ws.write("a.dat", b"x").unwrap();
    ws.write("b.tmp", b"x").unwrap();
    std::fs::write(ws.input().join("sub").join("c.dat"), b"x").unwrap();

    let mut config = ws.config(&["hostA"]);
    config.regex = Some(r".*\.dat".into());
    let mut daemon = supervisor(config, client.clone());
    daemon.prepare().await.unwrap();
    drive(&mut daemon, 2).await.unwrap();

    let paths: Vec<_> = client
        .direct_calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Direct { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(paths, vec![wanted]);

    let mut config = ws.config(&["hostA"]);
    config.regex = Some(r".*\.dat".into());
    config.recursive = true;
    config.status_file = ws.root().join("recursive.status");
    let client = RecordingClient::new();
    let mut daemon = supervisor(config, client.clone());
    daemon.prepare().await.unwrap();
    drive(&mut daemon, 2).await.unwrap();
    assert_eq!(client.direct_calls().len(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_utf8_file_name_is_persisted() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let ws = Workspace::new().unwrap();
    let client = RecordingClient::new();
    ws.write("good.txt", b"0123456789").unwrap();
    std::fs::write(ws.input().join(OsStr::from_bytes(b"bad\xff.txt")), b"odd").unwrap();

    let mut daemon = supervisor(ws.config(&["hostA"]), client.clone());
    daemon.prepare().await.unwrap();
    drive(&mut daemon, 4).await.unwrap();

    assert_eq!(client.direct_calls().len(), 2);
    daemon.finish().await;

    // Both entries come back on restart and nothing is sent twice
    let mut again = supervisor(ws.config(&["hostA"]), client.clone());
    again.prepare().await.unwrap();
    assert_eq!(again.ledger().lock().len(), 2);
    drive(&mut again, 2).await.unwrap();
    assert_eq!(client.direct_calls().len(), 2);
}
