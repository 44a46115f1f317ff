//! Record-and-replay tests ("snaps").
//!
//! A snap is a recorded REPL session against a script: the inputs and the
//! outputs the service produced. Saved to disk, it can be replayed later;
//! if the script still produces the same outputs the snap passes. File
//! handles are scoped, so they are released on every path, including
//! errors.

use crate::service::Service;
use pipefish_vm::CapturingHandler;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One recorded exchange: what went in, what came out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// A recorded session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snap {
    /// The script the session ran against.
    pub script: String,
    pub exchanges: Vec<Exchange>,
}

/// The verdict of a replay.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapOutcome {
    Passed,
    Failed {
        input: String,
        want: String,
        got: String,
    },
}

impl SnapOutcome {
    /// The line shown to the user.
    pub fn report(&self) -> String {
        match self {
            SnapOutcome::Passed => "Test passed!".to_string(),
            SnapOutcome::Failed { input, want, got } => format!(
                "Test failed!\nOn input {:?}\n    wanted : {}\n    got    : {}",
                input, want, got
            ),
        }
    }
}

/// Run one input and render what the user would see: posted output if the
/// line posted, the value's literal otherwise.
fn exchange_output(service: &mut Service, input: &str) -> String {
    service.set_out_handler(Box::new(CapturingHandler::new()));
    let value = service.do_line(input);
    let posted = service.vm.out.captured().unwrap_or_default();
    if service.vm.post_happened {
        posted.trim_end().to_string()
    } else {
        service.to_literal(&value)
    }
}

impl Snap {
    /// Record a session: run each input and keep what came out.
    pub fn record(service: &mut Service, script: &str, inputs: &[&str]) -> Snap {
        let exchanges = inputs
            .iter()
            .map(|input| Exchange {
                input: input.to_string(),
                output: exchange_output(service, input),
            })
            .collect();
        Snap {
            script: script.to_string(),
            exchanges,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Snap> {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    /// Re-run the recorded inputs; the first divergence fails the snap.
    pub fn replay(&self, service: &mut Service) -> SnapOutcome {
        for exchange in &self.exchanges {
            let got = exchange_output(service, &exchange.input);
            if got != exchange.output {
                return SnapOutcome::Failed {
                    input: exchange.input.clone(),
                    want: exchange.output.clone(),
                    got,
                };
            }
        }
        SnapOutcome::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_replay_pass() {
        let mut service = Service::new();
        let snap = Snap::record(&mut service, "", &["2 + 2", "5 / 2"]);
        assert_eq!(snap.exchanges[0].output, "4");
        assert_eq!(snap.exchanges[1].output, "2.5");
        let mut replay_service = Service::new();
        assert_eq!(snap.replay(&mut replay_service), SnapOutcome::Passed);
        assert_eq!(snap.replay(&mut replay_service).report(), "Test passed!");
    }

    #[test]
    fn test_replay_detects_divergence() {
        let snap = Snap {
            script: String::new(),
            exchanges: vec![Exchange {
                input: "2 + 2".to_string(),
                output: "5".to_string(),
            }],
        };
        let mut service = Service::new();
        match snap.replay(&mut service) {
            SnapOutcome::Failed { got, .. } => assert_eq!(got, "4"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join("pipefish-snap-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("qux.snap");
        let snap = Snap {
            script: "qux.pf".to_string(),
            exchanges: vec![Exchange {
                input: "qux 8".to_string(),
                output: "foo 10 bar".to_string(),
            }],
        };
        snap.save(&path).unwrap();
        let loaded = Snap::load(&path).unwrap();
        assert_eq!(loaded.script, "qux.pf");
        assert_eq!(loaded.exchanges, snap.exchanges);
        std::fs::remove_file(&path).ok();
    }
}
