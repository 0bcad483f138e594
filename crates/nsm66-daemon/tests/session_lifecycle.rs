//! End-to-end session lifecycle tests over the loopback transport.

mod common;

use std::time::{Duration, Instant};

use common::{Controller, FakeClient, error_code_of, fixture, has_reply_with, pump, pump_until};
use nsm66_core::lockfile;
use nsm66_core::osc::{self, Endpoint, OscAddr, OscMessage, Tag};
use nsm66_core::session::SESSION_FILE;

#[test]
fn test_new_session_creates_directory_manifest_and_lock() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);

    let session_dir = fx.session_root.join("alpha");
    assert!(session_dir.join(SESSION_FILE).is_file());
    assert_eq!(fx.daemon.session_path(), Some(session_dir.as_path()));

    let lock = lockfile::lock_file_path(&fx.lock_dir, "alpha", &session_dir);
    assert!(lock.is_file(), "lockfile must exist for the open session");

    let replies = controller.drain();
    assert!(has_reply_with(&replies, "Created"));
    assert!(has_reply_with(&replies, "Session created"));
}

#[test]
fn test_new_session_rejects_traversal_names() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("../escape")]);
    pump(&mut fx.daemon, 2);

    let replies = controller.drain();
    assert!(replies.iter().any(|m| error_code_of(m) == Some(-10)));
    assert!(!fx.session_root.join("../escape").exists());
}

#[test]
fn test_announce_save_writes_manifest_line() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    let client = FakeClient::start(fx.daemon.url(), "Mytool", "mytool", ":switch:");
    assert!(pump_until(&mut fx.daemon, 5, |d| {
        d.roster().iter().any(|c| c.active && !c.reply_pending())
    }));

    // The announced client got acknowledged and opened.
    let paths = client.received_paths();
    assert!(paths.contains(&"/reply".to_string()));
    assert!(paths.contains(&"/nsm/client/open".to_string()));

    controller.send(Tag::SrvSave, vec![]);
    assert!(pump_until(&mut fx.daemon, 10, |d| {
        !d.roster().replies_still_pending()
    }));
    let replies = controller.drain();
    assert!(has_reply_with(&replies, "Saved"));

    let manifest =
        std::fs::read_to_string(fx.session_root.join("alpha").join(SESSION_FILE)).unwrap();
    let line = manifest.lines().next().unwrap();
    let fields: Vec<&str> = line.split(':').collect();
    assert_eq!(fields[0], "Mytool");
    assert_eq!(fields[1], "mytool");
    assert!(nsm66_core::session::ClientId::is_valid(fields[2]));
    assert!(client.received_paths().contains(&"/nsm/client/save".to_string()));
}

#[test]
fn test_switch_capable_client_is_reopened_not_restarted() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    let mut client = FakeClient::start(fx.daemon.url(), "Mytool", "mytool", ":switch:");
    assert!(pump_until(&mut fx.daemon, 5, |d| {
        d.roster().iter().any(|c| c.active && !c.reply_pending())
    }));

    // A second session wanting the same client under a new identifier.
    let beta = fx.session_root.join("beta");
    std::fs::create_dir_all(&beta).unwrap();
    std::fs::write(beta.join(SESSION_FILE), "Mytool:mytool:nWXYZ\n").unwrap();

    controller.send(Tag::SrvOpen, vec![osc::s("beta")]);
    assert!(pump_until(&mut fx.daemon, 20, |d| {
        d.session_path() == Some(beta.as_path()) && !d.roster().replies_still_pending()
    }));
    let replies = controller.drain();
    assert!(has_reply_with(&replies, "Loaded"));

    // No restart: the sleep child never saw a SIGTERM.
    assert!(client.child_is_alive());

    // The client took on the manifest identifier and was re-opened with
    // the new per-client project path.
    assert_eq!(fx.daemon.roster().len(), 1);
    let record = fx.daemon.roster().iter().next().unwrap();
    assert_eq!(record.client_id.as_str(), "nWXYZ");

    let opens: Vec<OscMessage> = client
        .received_messages()
        .into_iter()
        .filter(|m| m.addr == "/nsm/client/open")
        .collect();
    assert!(opens.len() >= 2, "announce open plus switch open");
    let last_open = opens.last().unwrap();
    let project = osc::str_arg(last_open, 0).unwrap();
    assert!(project.ends_with("beta/Mytool.nWXYZ"), "got {project}");
    assert!(client
        .received_paths()
        .contains(&"/nsm/client/session_is_loaded".to_string()));

    let lock = lockfile::lock_file_path(&fx.lock_dir, "beta", &beta);
    assert!(lock.is_file());
}

#[test]
fn test_non_switch_client_is_terminated_and_relaunched() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    // Announces but advertises no capabilities at all.
    let mut client = FakeClient::start(fx.daemon.url(), "Mytool", "mytool", "");
    assert!(pump_until(&mut fx.daemon, 5, |d| {
        d.roster().iter().any(|c| c.active && !c.reply_pending())
    }));

    let beta = fx.session_root.join("beta");
    std::fs::create_dir_all(&beta).unwrap();
    std::fs::write(beta.join(SESSION_FILE), "Mytool:mytool:nWXYZ\n").unwrap();

    controller.send(Tag::SrvOpen, vec![osc::s("beta")]);
    assert!(pump_until(&mut fx.daemon, 30, |d| {
        d.session_path() == Some(beta.as_path())
    }));
    pump(&mut fx.daemon, 4);

    // The old process was terminated and a fresh launch was attempted;
    // "mytool" does not exist, so the slot shows the launch failure.
    assert!(!client.child_is_alive(), "non-switch client must be SIGTERMed");
    assert_eq!(fx.daemon.roster().len(), 1);
    let record = fx.daemon.roster().iter().next().unwrap();
    assert_eq!(record.client_id.as_str(), "nWXYZ");
    assert!(record.launch_error);
    assert_eq!(record.label, "Launch error!");
}

#[test]
fn test_duplicate_rejects_existing_name() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    controller.send(Tag::SrvDuplicate, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);

    let replies = controller.drain();
    let error = replies
        .iter()
        .find(|m| m.addr == "/error")
        .expect("duplicate of an existing session must fail");
    assert_eq!(error_code_of(error), Some(-10));
    assert_eq!(osc::str_arg(error, 2), Some("Session name already exists"));
}

#[test]
fn test_duplicate_copies_session_tree() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    // Some client data that must travel with the copy.
    let data_dir = fx.session_root.join("alpha/Mytool.nAAAA");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("state"), "bytes").unwrap();

    controller.send(Tag::SrvDuplicate, vec![osc::s("copy")]);
    assert!(pump_until(&mut fx.daemon, 20, |d| {
        d.session_path() == Some(fx.session_root.join("copy").as_path())
    }));

    let copied = fx.session_root.join("copy/Mytool.nAAAA/state");
    assert_eq!(std::fs::read_to_string(copied).unwrap(), "bytes");
    let replies = controller.drain();
    assert!(has_reply_with(&replies, "Duplicated"));
}

#[test]
fn test_open_locked_session_fails() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    let gamma = fx.session_root.join("gamma");
    std::fs::create_dir_all(&gamma).unwrap();
    std::fs::write(gamma.join(SESSION_FILE), "").unwrap();
    let lock = lockfile::lock_file_path(&fx.lock_dir, "gamma", &gamma);
    lockfile::write_lock_file(&lock, &gamma, "osc.udp://127.0.0.1:1/").unwrap();

    controller.send(Tag::SrvOpen, vec![osc::s("gamma")]);
    pump(&mut fx.daemon, 4);

    let replies = controller.drain();
    assert!(replies.iter().any(|m| error_code_of(m) == Some(-11)));
    assert!(fx.daemon.session_path().is_none());
}

#[test]
fn test_open_missing_session_fails() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvOpen, vec![osc::s("nope")]);
    pump(&mut fx.daemon, 4);

    let replies = controller.drain();
    assert!(replies.iter().any(|m| error_code_of(m) == Some(-5)));
}

#[test]
fn test_add_rejects_paths() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    controller.send(Tag::SrvAdd, vec![osc::s("/usr/bin/mytool")]);
    pump(&mut fx.daemon, 2);

    let replies = controller.drain();
    assert!(replies.iter().any(|m| error_code_of(m) == Some(-4)));
}

#[test]
fn test_add_requires_open_session() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvAdd, vec![osc::s("mytool")]);
    pump(&mut fx.daemon, 2);

    let replies = controller.drain();
    assert!(replies.iter().any(|m| error_code_of(m) == Some(-6)));
}

#[test]
fn test_list_streams_sessions_with_empty_sentinel() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    for name in ["one", "two/nested"] {
        let dir = fx.session_root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SESSION_FILE), "").unwrap();
    }

    controller.send(Tag::SrvList, vec![]);
    pump(&mut fx.daemon, 2);

    let replies: Vec<OscMessage> = controller
        .drain()
        .into_iter()
        .filter(|m| m.addr == "/reply" && osc::str_arg(m, 0) == Some("/nsm/server/list"))
        .collect();
    let names: Vec<&str> = replies.iter().filter_map(|m| osc::str_arg(m, 1)).collect();
    assert!(names.contains(&"one"));
    assert!(names.contains(&"two/nested"));
    assert_eq!(names.last(), Some(&""), "stream must end with the sentinel");
}

#[test]
fn test_broadcast_filters_reserved_namespace_and_sender() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    let sender = FakeClient::start(fx.daemon.url(), "Alpha", "alphatool", ":broadcast:");
    let receiver = FakeClient::start(fx.daemon.url(), "Beta", "betatool", ":broadcast:");
    assert!(pump_until(&mut fx.daemon, 5, |d| {
        d.roster().iter().filter(|c| c.active).count() == 2
    }));

    // Reserved namespace: must not be relayed to anyone.
    let sender_addr = {
        let record = fx
            .daemon
            .roster()
            .iter()
            .find(|c| c.name == "Alpha")
            .unwrap();
        record.address.unwrap()
    };
    let reserved = osc::message(
        Tag::SrvBroadcast,
        vec![osc::s("/nsm/gui/client/status"), osc::s("foo")],
    );
    let free = osc::message(
        Tag::SrvBroadcast,
        vec![osc::s("/custom/ping"), osc::s("hello")],
    );
    fx.daemon.dispatch(&reserved, sender_addr);
    fx.daemon.dispatch(&free, sender_addr);
    pump(&mut fx.daemon, 2);
    std::thread::sleep(Duration::from_millis(200));

    let receiver_paths = receiver.received_paths();
    assert!(
        !receiver_paths.contains(&"/nsm/gui/client/status".to_string()),
        "reserved namespace must never be forwarded"
    );
    assert!(receiver_paths.contains(&"/custom/ping".to_string()));
    assert!(
        !sender.received_paths().contains(&"/custom/ping".to_string()),
        "the sender is excluded from its own broadcast"
    );
}

#[test]
fn test_second_operation_is_rejected_while_one_is_pending() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    // This client holds its save reply back for a moment, keeping the
    // save operation in flight while the second request arrives.
    let _client = FakeClient::start_with_delay(
        fx.daemon.url(),
        "Slowpoke",
        "slowpoke",
        ":switch:",
        Duration::from_millis(700),
    );
    assert!(pump_until(&mut fx.daemon, 5, |d| {
        d.roster().iter().any(|c| c.active && !c.reply_pending())
    }));
    controller.drain();

    // A second controller fires its save while the first one is still
    // in flight (the slow client holds the operation open for ~700ms).
    let daemon_url = fx.daemon.url().to_string();
    let second = std::thread::spawn(move || {
        let endpoint = Endpoint::bind(0).unwrap();
        let daemon_addr = OscAddr::parse_url(&daemon_url).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        endpoint
            .send(daemon_addr, osc::message(Tag::SrvSave, vec![]))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut messages = Vec::new();
        while Instant::now() < deadline && messages.is_empty() {
            messages.extend(
                endpoint
                    .wait(Duration::from_millis(100))
                    .into_iter()
                    .map(|(m, _)| m),
            );
        }
        messages
    });

    controller.send(Tag::SrvSave, vec![]);
    assert!(pump_until(&mut fx.daemon, 15, |d| {
        !d.roster().replies_still_pending()
    }));
    pump(&mut fx.daemon, 2);

    let second_messages = second.join().unwrap();
    assert!(
        second_messages
            .iter()
            .any(|m| error_code_of(m) == Some(-12)),
        "second save must be rejected with operation_pending"
    );
    let replies = controller.drain();
    assert!(has_reply_with(&replies, "Saved"));
}

#[test]
fn test_abort_discards_unsaved_state() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::SrvNew, vec![osc::s("alpha")]);
    pump(&mut fx.daemon, 4);
    controller.drain();

    let client = FakeClient::start(fx.daemon.url(), "Mytool", "mytool", ":switch:");
    assert!(pump_until(&mut fx.daemon, 5, |d| {
        d.roster().iter().any(|c| c.active && !c.reply_pending())
    }));

    controller.send(Tag::SrvAbort, vec![]);
    assert!(pump_until(&mut fx.daemon, 20, |d| d.session_path().is_none()));

    let replies = controller.drain();
    assert!(has_reply_with(&replies, "Aborted"));
    assert_eq!(fx.daemon.roster().len(), 0);
    // Abort never asks anyone to save.
    assert!(!client
        .received_paths()
        .contains(&"/nsm/client/save".to_string()));

    let lock = lockfile::lock_file_path(&fx.lock_dir, "alpha", &fx.session_root.join("alpha"));
    assert!(!lock.exists(), "lockfile must be released on abort");
}

#[test]
fn test_ping_is_answered() {
    let mut fx = fixture();
    let controller = Controller::new(&fx.daemon);

    controller.send(Tag::Ping, vec![]);
    pump(&mut fx.daemon, 2);

    let replies = controller.drain();
    assert!(replies
        .iter()
        .any(|m| m.addr == "/reply" && osc::str_arg(m, 0) == Some("/osc/ping")));
}
