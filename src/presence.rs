use std::fmt;

use crate::beacon::{BeaconFrame, BeaconUuid};

/// Inclusive RSSI window in dBm. `far` is the weaker (more negative) edge,
/// `near` the stronger one; `far <= near` is enforced at config time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssiBand {
    pub far: i16,
    pub near: i16,
}

impl RssiBand {
    /// Inclusive on both edges: a sample sitting exactly on either bound
    /// counts as in range.
    pub fn contains(&self, rssi: i16) -> bool {
        self.far <= rssi && rssi <= self.near
    }
}

impl fmt::Display for RssiBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {} dBm", self.far, self.near)
    }
}

/// One qualifying advertisement: a decoded frame plus its reception
/// context. Built per event and dropped right after `observe`.
#[derive(Debug, Clone, Copy)]
pub struct Sighting<'a> {
    pub frame: &'a BeaconFrame,
    pub rssi: i16,
    /// Adapter-reported device address, treated as an opaque string.
    pub source: &'a str,
}

/// What the driver should do with a sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// The beacon just came into range: run one toggle round.
    Trigger,
    /// The beacon left range: re-arm for the next approach.
    Reset,
}

/// Debounced presence state for one target beacon.
///
/// A single `engaged` flag behind an inclusive RSSI band: the first in-range
/// sighting triggers, further in-range sightings while engaged are quiet,
/// and only an out-of-range sighting re-arms the gate. That keeps one dwell
/// in front of the bulbs from toggling them more than once.
pub struct ProximityGate {
    uuid: BeaconUuid,
    address: Option<String>,
    band: RssiBand,
    engaged: bool,
}

impl ProximityGate {
    pub fn new(uuid: BeaconUuid, address: Option<String>, band: RssiBand) -> Self {
        ProximityGate {
            uuid,
            address,
            band,
            engaged: false,
        }
    }

    pub fn band(&self) -> RssiBand {
        self.band
    }

    #[allow(dead_code)]
    pub fn engaged(&self) -> bool {
        self.engaged
    }

    /// A sighting matches on beacon uuid or on source address; either alone
    /// qualifies. Address comparison is case-insensitive.
    pub fn matches(&self, sighting: &Sighting<'_>) -> bool {
        if sighting.frame.uuid == self.uuid {
            return true;
        }
        match &self.address {
            Some(address) => sighting.source.eq_ignore_ascii_case(address),
            None => false,
        }
    }

    /// Advances the gate by one sighting and says what to do about it.
    ///
    /// Non-matching sightings never change state. For matching ones:
    ///
    /// | engaged | in range | action  | engaged after |
    /// |---------|----------|---------|---------------|
    /// | false   | true     | Trigger | true          |
    /// | false   | false    | None    | false         |
    /// | true    | true     | None    | true          |
    /// | true    | false    | Reset   | false         |
    ///
    /// Single-writer: one task feeds sightings in arrival order.
    pub fn observe(&mut self, sighting: Sighting<'_>) -> Action {
        if !self.matches(&sighting) {
            return Action::None;
        }
        match (self.engaged, self.band.contains(sighting.rssi)) {
            (false, true) => {
                self.engaged = true;
                Action::Trigger
            }
            (true, false) => {
                self.engaged = false;
                Action::Reset
            }
            _ => Action::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "FDA50693-A4E2-4FB1-AFCF-C6EB07647825";
    const OTHER: &str = "00112233-4455-6677-8899-AABBCCDDEEFF";
    const BAND: RssiBand = RssiBand { far: -80, near: -30 };

    fn frame(uuid: &str) -> BeaconFrame {
        BeaconFrame {
            uuid: uuid.parse().unwrap(),
            major: 1,
            minor: 2,
            tx_power: -59,
        }
    }

    fn fresh_gate() -> ProximityGate {
        ProximityGate::new(TARGET.parse().unwrap(), Some("AA:BB:CC:DD:EE:FF".into()), BAND)
    }

    fn observe_all(gate: &mut ProximityGate, frame: &BeaconFrame, rssis: &[i16]) -> Vec<Action> {
        rssis
            .iter()
            .map(|&rssi| {
                gate.observe(Sighting {
                    frame,
                    rssi,
                    source: "11:22:33:44:55:66",
                })
            })
            .collect()
    }

    #[test]
    fn walk_in_dwell_walk_out() {
        let mut gate = fresh_gate();
        let frame = frame(TARGET);
        let actions = observe_all(&mut gate, &frame, &[-90, -40, -40, -90]);
        assert_eq!(
            actions,
            vec![Action::None, Action::Trigger, Action::None, Action::Reset]
        );
        assert!(!gate.engaged());
    }

    #[test]
    fn dwelling_never_retriggers() {
        let mut gate = fresh_gate();
        let frame = frame(TARGET);
        let actions = observe_all(&mut gate, &frame, &[-40; 10]);
        let triggers = actions.iter().filter(|a| **a == Action::Trigger).count();
        assert_eq!(triggers, 1);
        assert!(gate.engaged());
    }

    #[test]
    fn band_edges_count_as_in_range() {
        let mut gate = fresh_gate();
        let frame = frame(TARGET);
        assert_eq!(observe_all(&mut gate, &frame, &[-80]), vec![Action::Trigger]);
        assert_eq!(observe_all(&mut gate, &frame, &[-30]), vec![Action::None]);
        assert_eq!(observe_all(&mut gate, &frame, &[-81]), vec![Action::Reset]);

        let mut gate = fresh_gate();
        assert_eq!(observe_all(&mut gate, &frame, &[-30]), vec![Action::Trigger]);
        assert_eq!(observe_all(&mut gate, &frame, &[-29]), vec![Action::Reset]);
    }

    #[test]
    fn foreign_beacons_never_touch_the_state() {
        let mut gate = fresh_gate();
        let target = frame(TARGET);
        let foreign = frame(OTHER);

        assert_eq!(observe_all(&mut gate, &foreign, &[-40]), vec![Action::None]);
        assert!(!gate.engaged());

        assert_eq!(observe_all(&mut gate, &target, &[-40]), vec![Action::Trigger]);
        // Out-of-range sightings of some other beacon must not re-arm us.
        assert_eq!(observe_all(&mut gate, &foreign, &[-95, -40]), vec![Action::None, Action::None]);
        assert!(gate.engaged());

        assert_eq!(observe_all(&mut gate, &target, &[-95]), vec![Action::Reset]);
    }

    #[test]
    fn source_address_match_alone_qualifies() {
        let mut gate = fresh_gate();
        let foreign = frame(OTHER);
        let action = gate.observe(Sighting {
            frame: &foreign,
            rssi: -40,
            source: "aa:bb:cc:dd:ee:ff",
        });
        assert_eq!(action, Action::Trigger);
    }

    #[test]
    fn uuid_match_is_case_insensitive() {
        let mut gate = ProximityGate::new(
            TARGET.to_lowercase().parse().unwrap(),
            None,
            BAND,
        );
        let frame = frame(TARGET);
        assert_eq!(observe_all(&mut gate, &frame, &[-40]), vec![Action::Trigger]);
    }
}
