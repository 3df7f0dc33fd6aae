use std::collections::{BTreeMap, HashMap};

use sync_proto::TrafficLightRecord;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAspect {
    Green,
    Yellow,
    Red,
}

impl SignalAspect {
    /// Maps one phase-state character; anything unrecognised shows red.
    pub fn from_code(code: char) -> Self {
        match code {
            'G' | 'g' => SignalAspect::Green,
            'y' | 'Y' => SignalAspect::Yellow,
            _ => SignalAspect::Red,
        }
    }
}

/// Lamp activity of one signal head. Exactly one lamp is lit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalLamps {
    pub green: bool,
    pub yellow: bool,
    pub red: bool,
}

impl SignalLamps {
    pub fn showing(aspect: SignalAspect) -> Self {
        Self {
            green: aspect == SignalAspect::Green,
            yellow: aspect == SignalAspect::Yellow,
            red: aspect == SignalAspect::Red,
        }
    }

    pub fn aspect(&self) -> SignalAspect {
        if self.green {
            SignalAspect::Green
        } else if self.yellow {
            SignalAspect::Yellow
        } else {
            SignalAspect::Red
        }
    }
}

/// Junction and signal-head lookup provided by the host scene.
pub trait SignalScene {
    fn has_junction(&self, junction_id: &str) -> bool;
    /// Applies lamp state to a named head. Returns `false` when the head
    /// cannot be resolved.
    fn set_head(&mut self, junction_id: &str, head: &str, lamps: SignalLamps) -> bool;
}

pub fn head_name(index: usize) -> String {
    format!("Head{index}")
}

/// In-memory scene used by the headless runtime.
#[derive(Debug, Clone, Default)]
pub struct SignalBoard {
    junctions: BTreeMap<String, BTreeMap<String, SignalLamps>>,
    /// Unknown junctions and heads are created on first write.
    permissive: bool,
    writes: u64,
}

impl SignalBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::default()
        }
    }

    /// Registers a junction with `heads` heads named `Head0..`, all red.
    pub fn with_junction(mut self, junction_id: impl Into<String>, heads: usize) -> Self {
        let lamps = (0..heads)
            .map(|index| (head_name(index), SignalLamps::showing(SignalAspect::Red)))
            .collect();
        self.junctions.insert(junction_id.into(), lamps);
        self
    }

    pub fn lamps(&self, junction_id: &str, head: &str) -> Option<SignalLamps> {
        self.junctions.get(junction_id)?.get(head).copied()
    }

    pub fn junction_count(&self) -> usize {
        self.junctions.len()
    }

    /// Total number of head writes applied so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl SignalScene for SignalBoard {
    fn has_junction(&self, junction_id: &str) -> bool {
        self.permissive || self.junctions.contains_key(junction_id)
    }

    fn set_head(&mut self, junction_id: &str, head: &str, lamps: SignalLamps) -> bool {
        let heads = if self.permissive {
            self.junctions.entry(junction_id.to_string()).or_default()
        } else {
            match self.junctions.get_mut(junction_id) {
                Some(heads) => heads,
                None => return false,
            }
        };
        match heads.get_mut(head) {
            Some(slot) => *slot = lamps,
            None if self.permissive => {
                heads.insert(head.to_string(), lamps);
            }
            None => return false,
        }
        self.writes += 1;
        true
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SignalOutcome {
    pub junctions_changed: usize,
    pub junctions_unchanged: usize,
    pub heads_written: usize,
    pub heads_unresolved: usize,
}

/// Applies junction phase strings to a [`SignalScene`], skipping junctions
/// whose state matches the last one applied.
#[derive(Debug, Default)]
pub struct SignalPropagator {
    last_seen: HashMap<String, String>,
}

impl SignalPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self, junction_id: &str) -> Option<&str> {
        self.last_seen.get(junction_id).map(String::as_str)
    }

    pub fn apply<S>(&mut self, scene: &mut S, lights: &[TrafficLightRecord]) -> SignalOutcome
    where
        S: SignalScene + ?Sized,
    {
        let mut outcome = SignalOutcome::default();
        for light in lights {
            if self.last_seen.get(&light.junction_id) == Some(&light.state) {
                outcome.junctions_unchanged += 1;
                continue;
            }
            // Cached even when the junction is missing so the warning fires
            // once per state change rather than once per broadcast.
            self.last_seen
                .insert(light.junction_id.clone(), light.state.clone());
            outcome.junctions_changed += 1;

            if !scene.has_junction(&light.junction_id) {
                warn!(
                    target: "traffic_bridge::signals",
                    junction = %light.junction_id,
                    "signals.junction_unresolved"
                );
                continue;
            }

            for (index, code) in light.state.chars().enumerate() {
                let head = head_name(index);
                let lamps = SignalLamps::showing(SignalAspect::from_code(code));
                if scene.set_head(&light.junction_id, &head, lamps) {
                    outcome.heads_written += 1;
                } else {
                    outcome.heads_unresolved += 1;
                    warn!(
                        target: "traffic_bridge::signals",
                        junction = %light.junction_id,
                        head = %head,
                        "signals.head_unresolved"
                    );
                }
            }
            debug!(
                target: "traffic_bridge::signals",
                junction = %light.junction_id,
                state = %light.state,
                "signals.junction_applied"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(junction: &str, state: &str) -> TrafficLightRecord {
        TrafficLightRecord {
            junction_id: junction.to_string(),
            state: state.to_string(),
        }
    }

    #[test]
    fn phase_codes_map_to_single_lamp() {
        for (code, aspect) in [
            ('G', SignalAspect::Green),
            ('g', SignalAspect::Green),
            ('y', SignalAspect::Yellow),
            ('Y', SignalAspect::Yellow),
            ('r', SignalAspect::Red),
            ('s', SignalAspect::Red),
            ('o', SignalAspect::Red),
        ] {
            let lamps = SignalLamps::showing(SignalAspect::from_code(code));
            let lit = [lamps.green, lamps.yellow, lamps.red]
                .iter()
                .filter(|lit| **lit)
                .count();
            assert_eq!(lit, 1, "{code}");
            assert_eq!(lamps.aspect(), aspect, "{code}");
        }
    }

    #[test]
    fn state_string_addresses_heads_by_position() {
        let mut board = SignalBoard::new().with_junction("J1", 2);
        let mut propagator = SignalPropagator::new();
        let outcome = propagator.apply(&mut board, &[light("J1", "Gr")]);

        assert_eq!(outcome.heads_written, 2);
        let head0 = board.lamps("J1", "Head0").unwrap();
        assert!(head0.green && !head0.red && !head0.yellow);
        assert_eq!(board.lamps("J1", "Head1").unwrap().aspect(), SignalAspect::Red);
    }

    #[test]
    fn repeated_state_writes_nothing() {
        let mut board = SignalBoard::new().with_junction("J1", 2);
        let mut propagator = SignalPropagator::new();
        propagator.apply(&mut board, &[light("J1", "Gr")]);
        let writes = board.writes();

        let outcome = propagator.apply(&mut board, &[light("J1", "Gr")]);
        assert_eq!(outcome.junctions_unchanged, 1);
        assert_eq!(board.writes(), writes);
    }

    #[test]
    fn missing_head_is_skipped_without_aborting_junction() {
        let mut board = SignalBoard::new().with_junction("J1", 1);
        let mut propagator = SignalPropagator::new();
        let outcome = propagator.apply(&mut board, &[light("J1", "yG"), light("J2", "G")]);

        assert_eq!(outcome.heads_written, 1);
        assert_eq!(outcome.heads_unresolved, 1);
        assert_eq!(board.lamps("J1", "Head0").unwrap().aspect(), SignalAspect::Yellow);
        assert_eq!(propagator.last_seen("J2"), Some("G"));
    }

    #[test]
    fn permissive_board_creates_heads() {
        let mut board = SignalBoard::permissive();
        let mut propagator = SignalPropagator::new();
        propagator.apply(&mut board, &[light("J9", "rgy")]);

        assert_eq!(board.junction_count(), 1);
        assert_eq!(board.lamps("J9", "Head2").unwrap().aspect(), SignalAspect::Yellow);
    }
}
