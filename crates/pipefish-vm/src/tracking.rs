//! Runtime tracking instrumentation.
//!
//! The compiler plants `Track` instructions at conditions, `else` branches,
//! function calls, logs and returns; executing one appends a `TrackingData`
//! record to the VM's in-memory log. Rendering the log afterwards produces
//! the human-readable account of what the program did.
//!
//! Whether a record carries a timestamp is decided at the emitting call
//! site from the `$_logTime` flag slot named by the instruction, so two
//! sites with different settings coexist in one log.

use crate::values::Value;
use crate::vm::Vm;
use serde::Serialize;

/// What kind of event a tracking record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackingFlavor {
    Condition,
    Else,
    FnCall,
    Literal,
    Result,
    Return,
}

/// One argument of a tracking record.
#[derive(Debug, Clone)]
pub enum TrackArg {
    /// Source text captured at compile time (a condition, a name).
    Str(String),
    /// A value captured at runtime.
    Val(Value),
}

/// One recorded event.
#[derive(Debug, Clone)]
pub struct TrackingData {
    pub flavor: TrackingFlavor,
    /// Index into the VM's token table.
    pub tok: u32,
    pub args: Vec<TrackArg>,
    /// `HH:MM:SS`, present iff the log-time flag was set when emitted.
    pub timestamp: Option<String>,
}

fn emph(s: &str) -> String {
    format!("`{}`", s)
}

impl Vm {
    fn tracking_is(&self, data: &[TrackingData], i: isize, flavor: TrackingFlavor) -> bool {
        if i < 0 {
            return false;
        }
        data.get(i as usize).map(|d| d.flavor) == Some(flavor)
    }

    fn track_str<'a>(&self, arg: Option<&'a TrackArg>) -> &'a str {
        match arg {
            Some(TrackArg::Str(s)) => s,
            _ => "?",
        }
    }

    /// Render a tracking log as prose.
    pub fn tracking_to_string(&self, data: &[TrackingData]) -> String {
        if data.is_empty() {
            return "\nNo tracking data exists.\n".to_string();
        }
        let mut out = String::new();
        for (i, td) in data.iter().enumerate() {
            let line = self
                .tokens
                .get(td.tok as usize)
                .map(|t| t.line)
                .unwrap_or(0);
            let at_time = |capital: &str, lower: &str| -> String {
                match &td.timestamp {
                    Some(ts) => format!("At {}, {}", ts, lower),
                    None => capital.to_string(),
                }
            };
            match td.flavor {
                TrackingFlavor::Condition => {
                    out.push_str(&at_time("At ", "at "));
                    out.push_str(&format!(
                        "line {} we evaluated the condition {}. ",
                        line,
                        emph(self.track_str(td.args.first()))
                    ));
                }
                TrackingFlavor::Else => {
                    out.push_str(&at_time("At ", "at "));
                    out.push_str(&format!("line {} we took the {} branch", line, emph("else")));
                    if !self.tracking_is(data, i as isize + 1, TrackingFlavor::Return) {
                        out.push_str(".\n");
                    }
                }
                TrackingFlavor::FnCall => {
                    out.push_str(&at_time("W", "w"));
                    out.push_str(&format!(
                        "e called function {} - defined at line {} ",
                        emph(self.track_str(td.args.first())),
                        line
                    ));
                    if td.args.len() > 1 {
                        out.push_str("- with ");
                        let mut sep = "";
                        let mut k = 1;
                        while k + 1 < td.args.len() {
                            let name = self.track_str(td.args.get(k));
                            let val = match td.args.get(k + 1) {
                                Some(TrackArg::Val(v)) => self.literal(v),
                                _ => "?".to_string(),
                            };
                            out.push_str(&format!("{}{} = {}", sep, emph(name), emph(&val)));
                            sep = ", ";
                            k += 2;
                        }
                    }
                    out.push_str(".\n");
                }
                TrackingFlavor::Literal => {
                    out.push_str(&at_time("L", "l"));
                    out.push_str(&format!("og at line {} : ", line));
                    if let Some(TrackArg::Val(v)) = td.args.first() {
                        out.push_str(&self.describe(v));
                    }
                    out.push('\n');
                }
                TrackingFlavor::Result => {
                    out.push_str(&at_time("T", "t"));
                    let succeeded = matches!(
                        td.args.first(),
                        Some(TrackArg::Val(v)) if v.as_bool() == Some(true)
                    );
                    if succeeded {
                        out.push_str("he condition succeeded.\n");
                    } else {
                        out.push_str("he condition failed.\n");
                    }
                }
                TrackingFlavor::Return => {
                    let value = match td.args.get(1) {
                        Some(TrackArg::Val(v)) => v.clone(),
                        _ => continue,
                    };
                    if value.is_unsat() {
                        continue;
                    }
                    if self.tracking_is(data, i as isize - 1, TrackingFlavor::Else) {
                        out.push_str(", so at ");
                    } else {
                        out.push_str("At ");
                    }
                    if let Some(ts) = &td.timestamp {
                        out.push_str(&format!("{}, at ", ts));
                    }
                    out.push_str(&format!(
                        "line {} function {} returned {}.\n",
                        line,
                        emph(self.track_str(td.args.first())),
                        self.literal(&value)
                    ));
                }
            }
        }
        out
    }
}
