//! Record-and-replay against a real fixture, per the snap workflow.

mod helpers;

use helpers::service_from;
use pipefish_lang::snap::{Snap, SnapOutcome};

#[test]
fn test_record_save_replay_good() {
    let mut recording = service_from("function_test.pf");
    let snap = Snap::record(&mut recording, "function_test.pf", &["qux 8", "fib 8"]);
    assert_eq!(snap.exchanges[0].output, "\"foo 10 bar\"");
    assert_eq!(snap.exchanges[1].output, "21");

    let dir = std::env::temp_dir().join("pipefish-snap-integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("GOOD.snap");
    snap.save(&path).unwrap();

    // Replaying later, with the same source, must pass.
    let loaded = Snap::load(&path).unwrap();
    let mut replaying = service_from("function_test.pf");
    let outcome = loaded.replay(&mut replaying);
    assert_eq!(outcome.report(), "Test passed!");
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_replay_against_changed_behavior_fails() {
    let mut recording = service_from("function_test.pf");
    let mut snap = Snap::record(&mut recording, "function_test.pf", &["fib 8"]);
    snap.exchanges[0].output = "22".to_string();

    let mut replaying = service_from("function_test.pf");
    match snap.replay(&mut replaying) {
        SnapOutcome::Failed { got, want, .. } => {
            assert_eq!(got, "21");
            assert_eq!(want, "22");
        }
        SnapOutcome::Passed => panic!("doctored snap should not pass"),
    }
}
