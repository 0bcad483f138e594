//! Restore-and-monitor flow driven through the port event queue.

use nsm66_patch::graph::event_queue;
use nsm66_patch::{MemoryGraph, PatchBay, PortEvent};

fn drain(bay: &mut PatchBay, graph: &mut MemoryGraph, rx: &crossbeam_channel::Receiver<PortEvent>) {
    while let Ok(event) = rx.try_recv() {
        bay.handle_event(&event, graph);
    }
}

#[test]
fn test_restore_connects_as_ports_appear() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("project.jackpatch");
    std::fs::write(
        &file,
        "synth:out_l |> system:playback_1\nsynth:out_r |> system:playback_2\n",
    )
    .unwrap();

    let mut bay = PatchBay::new();
    assert_eq!(bay.read_config(&file).unwrap(), 2);

    let mut graph = MemoryGraph::new();
    let (tx, rx) = event_queue();

    // Ports register one by one, the way a client starting up looks.
    for port in [
        "system:playback_1",
        "system:playback_2",
        "synth:out_l",
        "synth:out_r",
    ] {
        graph.add_output(port);
        tx.send(PortEvent::new(port, true)).unwrap();
        drain(&mut bay, &mut graph, &rx);
    }

    assert!(graph.connected("synth:out_l", "system:playback_1"));
    assert!(graph.connected("synth:out_r", "system:playback_2"));
    assert!(bay.patches().iter().all(|p| p.active));
}

#[test]
fn test_unregister_deactivates_but_remembers() {
    let mut bay = PatchBay::new();
    bay.load("synth:out |> system:in\n");

    let mut graph = MemoryGraph::new();
    graph.add_output("synth:out");
    graph.add_input("system:in");
    let (tx, rx) = event_queue();
    tx.send(PortEvent::new("synth:out", true)).unwrap();
    tx.send(PortEvent::new("system:in", true)).unwrap();
    drain(&mut bay, &mut graph, &rx);
    assert!(bay.patches()[0].active);

    // The synth goes away; its edge stays on the books.
    graph.remove_port("synth:out");
    tx.send(PortEvent::new("synth:out", false)).unwrap();
    drain(&mut bay, &mut graph, &rx);
    assert_eq!(bay.patches().len(), 1);
    assert!(!bay.patches()[0].active);

    // A save while the synth is gone must keep the line verbatim.
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("project.jackpatch");
    bay.save(&file, &graph).unwrap();
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "synth:out |> system:in\n"
    );

    // And when the synth returns, the connection comes back.
    graph.add_output("synth:out");
    tx.send(PortEvent::new("synth:out", true)).unwrap();
    drain(&mut bay, &mut graph, &rx);
    assert!(graph.connected("synth:out", "system:in"));
}

#[test]
fn test_bidirectional_line_restores_both_edges() {
    let mut bay = PatchBay::new();
    assert_eq!(bay.load("midi-a:duplex | midi-b:duplex\n"), 2);

    let mut graph = MemoryGraph::new();
    graph.add_output("midi-a:duplex");
    graph.add_output("midi-b:duplex");
    bay.register_preexisting(&mut graph);

    assert!(graph.connected("midi-a:duplex", "midi-b:duplex"));
    assert!(graph.connected("midi-b:duplex", "midi-a:duplex"));
}

#[test]
fn test_snapshot_of_restored_state_is_stable() {
    let text = "a:out |> sink:in\nghost:out |> sink:in\n";
    let mut graph = MemoryGraph::new();
    graph.add_output("a:out");
    graph.add_input("sink:in");

    let mut bay = PatchBay::new();
    bay.load(text);
    bay.register_preexisting(&mut graph);

    // One edge live, one remembered; the canonical form is unchanged.
    assert_eq!(bay.snapshot(&graph), text);
    // Snapshotting twice in a row is idempotent.
    assert_eq!(bay.snapshot(&graph), text);
}
