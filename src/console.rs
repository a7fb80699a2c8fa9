//! Interactive console grammar
//!
//! Lines follow `<target> <action> [value]`, mirroring the control
//! surface one verb per line: `audio start 5000`, `both stop`,
//! `sensor load {"vflip":1}`. Parsing is deliberately forgiving about
//! whitespace and case.

use crate::controller::{Action, ControlRequest, TargetMask};
use crate::error::ControlError;

pub const HELP: &str = "\
commands:
  <audio|video|both> start [budget_ms]   begin streaming
  <audio|video|both> stop                end streaming
  <audio|video|both> watch               attach console meters
  query                                  show stream status
  config dump [json]                     print the sensor attribute table
  config set <json>                      apply sensor settings
  help                                   this text
  quit                                   leave the console
";

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Control(ControlRequest),
    Help,
    Quit,
    Empty,
}

/// Parse one console line.
pub fn parse(line: &str) -> Result<ConsoleCommand, ControlError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleCommand::Empty);
    }
    let mut words = line.split_whitespace();
    let first = words.next().unwrap_or_default().to_ascii_lowercase();
    match first.as_str() {
        "help" | "?" => return Ok(ConsoleCommand::Help),
        "quit" | "exit" => return Ok(ConsoleCommand::Quit),
        "query" | "status" => {
            return Ok(ConsoleCommand::Control(ControlRequest {
                target: TargetMask::BOTH,
                action: Action::Query,
            }))
        }
        _ => {}
    }

    if first == "config" || first == "sensor" {
        let verb_raw = words.next().unwrap_or_default();
        let verb = verb_raw.to_ascii_lowercase();
        let action = match verb.as_str() {
            "dump" => Action::SensorDump {
                json: words.next() == Some("json"),
            },
            "set" | "load" => {
                // The rest of the line is the JSON document.
                let json: String = match line.split_once(verb_raw) {
                    Some((_, rest)) if !rest.trim().is_empty() => rest.trim().to_string(),
                    _ => {
                        return Err(ControlError::InvalidArgument(format!(
                            "{} {} needs a JSON document",
                            first, verb
                        )))
                    }
                };
                Action::SensorLoad { json }
            }
            other => {
                return Err(ControlError::InvalidArgument(format!(
                    "Unknown {} verb '{}'",
                    first, other
                )))
            }
        };
        return Ok(ConsoleCommand::Control(ControlRequest {
            target: TargetMask::default(),
            action,
        }));
    }

    let target = TargetMask::parse(&first)
        .ok_or_else(|| ControlError::InvalidArgument(format!("Unknown target '{}'", first)))?;
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let action = match verb.as_str() {
        "start" => {
            let budget_ms = match words.next() {
                Some(value) => value.parse::<u64>().map_err(|_| {
                    ControlError::InvalidArgument(format!("Bad budget '{}'", value))
                })?,
                None => 0,
            };
            Action::Start { budget_ms }
        }
        "stop" => Action::Stop,
        "query" | "status" => Action::Query,
        "watch" | "meter" => Action::Meter,
        other => {
            return Err(ControlError::InvalidArgument(format!(
                "Unknown action '{}'",
                other
            )))
        }
    };
    Ok(ConsoleCommand::Control(ControlRequest { target, action }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_with_budget() {
        let ConsoleCommand::Control(req) = parse("audio start 5000").unwrap() else {
            panic!("expected control request");
        };
        assert_eq!(req.target, TargetMask::AUDIO);
        assert!(matches!(req.action, Action::Start { budget_ms: 5000 }));
    }

    #[test]
    fn test_start_defaults_to_unbounded() {
        let ConsoleCommand::Control(req) = parse("both start").unwrap() else {
            panic!("expected control request");
        };
        assert_eq!(req.target, TargetMask::BOTH);
        assert!(matches!(req.action, Action::Start { budget_ms: 0 }));
    }

    #[test]
    fn test_short_target_names() {
        let ConsoleCommand::Control(req) = parse("vid stop").unwrap() else {
            panic!("expected control request");
        };
        assert_eq!(req.target, TargetMask::VIDEO);
        assert!(matches!(req.action, Action::Stop));
    }

    #[test]
    fn test_bare_query() {
        assert!(matches!(
            parse("query").unwrap(),
            ConsoleCommand::Control(ControlRequest {
                action: Action::Query,
                ..
            })
        ));
    }

    #[test]
    fn test_sensor_load_keeps_json_intact() {
        let ConsoleCommand::Control(req) = parse(r#"sensor load {"vflip": 1}"#).unwrap() else {
            panic!("expected control request");
        };
        let Action::SensorLoad { json } = req.action else {
            panic!("expected sensor load");
        };
        assert_eq!(json, r#"{"vflip": 1}"#);
    }

    #[test]
    fn test_sensor_dump_json_flag() {
        let ConsoleCommand::Control(req) = parse("sensor dump json").unwrap() else {
            panic!("expected control request");
        };
        assert!(matches!(req.action, Action::SensorDump { json: true }));
    }

    #[test]
    fn test_watch_is_meter_alias() {
        let ConsoleCommand::Control(req) = parse("audio watch").unwrap() else {
            panic!("expected control request");
        };
        assert!(matches!(req.action, Action::Meter));
    }

    #[test]
    fn test_config_prefix_matches_sensor() {
        let ConsoleCommand::Control(req) = parse(r#"config set {"hmirror": 1}"#).unwrap() else {
            panic!("expected control request");
        };
        let Action::SensorLoad { json } = req.action else {
            panic!("expected sensor load");
        };
        assert_eq!(json, r#"{"hmirror": 1}"#);
    }

    #[test]
    fn test_rejects_unknown_target() {
        assert!(parse("midi start").is_err());
    }

    #[test]
    fn test_rejects_bad_budget() {
        assert!(parse("audio start soon").is_err());
    }

    #[test]
    fn test_blank_and_meta_lines() {
        assert_eq!(parse("").unwrap(), ConsoleCommand::Empty);
        assert_eq!(parse("  help ").unwrap(), ConsoleCommand::Help);
        assert_eq!(parse("quit").unwrap(), ConsoleCommand::Quit);
    }
}
